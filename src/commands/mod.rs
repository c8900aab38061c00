pub mod download;
pub mod ledger;
pub mod search;
pub mod status;
pub mod verify;

use crate::error::SyncError;
use crate::sync::audit;
use crate::sync::context::RequestContext;
use crate::sync::paths::SyncPaths;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Outcome of a trigger command: the JSON body for stdout and whether it succeeded.
#[derive(Debug, Clone)]
pub struct TriggerReply {
    pub ok: bool,
    pub body: serde_json::Value,
}

impl TriggerReply {
    pub fn from_result<T: Serialize>(result: Result<T, SyncError>) -> anyhow::Result<Self> {
        Ok(match result {
            Ok(value) => Self {
                ok: true,
                body: serde_json::to_value(value)?,
            },
            Err(err) => Self {
                ok: false,
                body: serde_json::to_value(err.envelope())?,
            },
        })
    }
}

/// Record the trigger outcome in the audit log. A failing audit write is
/// logged and otherwise ignored.
pub(crate) fn audit_outcome<T>(
    paths: &SyncPaths,
    ctx: &RequestContext,
    phase: &str,
    result: &Result<T, SyncError>,
    success_message: impl FnOnce(&T) -> String,
) {
    let (status, message) = match result {
        Ok(value) => ("ok", success_message(value)),
        Err(err) => (err.kind().as_str(), err.to_string()),
    };
    if let Err(err) = audit::append_event(paths, ctx.request_id(), phase, status, &message) {
        warn!(error = %format!("{err:#}"), "failed to append audit event");
    }
}
