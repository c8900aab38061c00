//! In-memory collaborators for exercising the pipeline without disk or network.

use crate::error::SyncError;
use crate::sync::catalog::{RemoteCatalog, RemoteProfile};
use crate::sync::context::RequestContext;
use crate::sync::model::{
    ArchiveRecord, DownloadSession, Platform, SearchRecord, UserRecord, user_table_key,
};
use crate::sync::queue::{CommandQueue, OutboundMessage, PublishReceipt};
use crate::sync::store::{ArchiveLedger, SearchTable, SessionTable, UserTable};
use crate::sync::validator::BoardValidator;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Ordered log of side effects shared between stubs, to assert sequencing.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct LedgerState {
    records: BTreeMap<(String, String), ArchiveRecord>,
    rejections: BTreeMap<String, usize>,
    fail_on_call: Option<usize>,
    call_sizes: Vec<usize>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    log: EventLog,
}

impl MemoryLedger {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            state: Mutex::default(),
            log,
        }
    }

    pub fn seed(&self, records: &[ArchiveRecord]) {
        let mut state = self.state.lock().unwrap();
        for r in records {
            state
                .records
                .insert((r.user_id.clone(), r.archive_id.clone()), r.clone());
        }
    }

    /// Hand back items with these ids as unprocessed on their next `times` submissions.
    pub fn reject_ids(&self, ids: &[&str], times: usize) {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            state.rejections.insert(id.to_string(), times);
        }
    }

    /// Fail the `call`-th batch write (1-based) with a hard error.
    pub fn fail_on_call(&self, call: usize) {
        self.state.lock().unwrap().fail_on_call = Some(call);
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().call_sizes.clone()
    }
}

impl ArchiveLedger for MemoryLedger {
    fn query_by_user(&self, user_id: &str) -> Result<Vec<ArchiveRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn batch_write(&self, items: &[ArchiveRecord]) -> Result<Vec<ArchiveRecord>> {
        let mut state = self.state.lock().unwrap();
        state.call_sizes.push(items.len());
        if state.fail_on_call == Some(state.call_sizes.len()) {
            anyhow::bail!("ledger unreachable");
        }
        self.log.push(format!("ledger.batch_write:{}", items.len()));

        let mut unprocessed = Vec::new();
        for item in items {
            if let Some(remaining) = state.rejections.get_mut(&item.archive_id)
                && *remaining > 0
            {
                *remaining -= 1;
                unprocessed.push(item.clone());
                continue;
            }
            state
                .records
                .insert((item.user_id.clone(), item.archive_id.clone()), item.clone());
        }
        Ok(unprocessed)
    }
}

#[derive(Default)]
pub struct MemoryUsers {
    records: Mutex<BTreeMap<String, UserRecord>>,
}

impl UserTable for MemoryUsers {
    fn get(&self, username: &str, platform: Platform) -> Result<Option<UserRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.get(&user_table_key(username, platform)).cloned())
    }

    fn put(&self, record: &UserRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.table_key(), record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessions {
    sessions: Mutex<Vec<DownloadSession>>,
    log: EventLog,
    fail: bool,
}

impl MemorySessions {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn all(&self) -> Vec<DownloadSession> {
        self.sessions.lock().unwrap().clone()
    }
}

impl SessionTable for MemorySessions {
    fn put(&self, session: &DownloadSession) -> Result<()> {
        if self.fail {
            anyhow::bail!("session table unreachable");
        }
        self.log.push(format!("session.put:{}", session.expected_command_count));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySearches {
    records: Mutex<Vec<SearchRecord>>,
}

impl MemorySearches {
    pub fn all(&self) -> Vec<SearchRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl SearchTable for MemorySearches {
    fn put(&self, record: &SearchRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Queue that records every publish and honours deduplication ids forever.
#[derive(Default)]
pub struct RecordingQueue {
    published: Mutex<Vec<OutboundMessage>>,
    seen: Mutex<BTreeSet<String>>,
    fail_on_publish: Option<usize>,
    attempts: Mutex<usize>,
    log: EventLog,
}

impl RecordingQueue {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Fail the `n`-th publish attempt (1-based).
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_publish: Some(n),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }
}

impl CommandQueue for RecordingQueue {
    fn publish(&self, message: &OutboundMessage) -> Result<PublishReceipt> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if self.fail_on_publish == Some(*attempts) {
            anyhow::bail!("queue unavailable");
        }
        self.log.push(format!("queue.publish:{}", message.deduplication_id));
        let duplicate = !self
            .seen
            .lock()
            .unwrap()
            .insert(message.deduplication_id.clone());
        if !duplicate {
            self.published.lock().unwrap().push(message.clone());
        }
        Ok(PublishReceipt {
            message_id: format!("m-{}", *attempts),
            duplicate,
        })
    }
}

pub enum CatalogReply {
    Found {
        user_id: String,
        archives: Vec<String>,
    },
    NotFound,
    Unavailable,
}

pub struct StubCatalog {
    reply: CatalogReply,
}

impl StubCatalog {
    pub fn found(user_id: &str, archives: &[&str]) -> Self {
        Self {
            reply: CatalogReply::Found {
                user_id: user_id.to_string(),
                archives: archives.iter().map(|a| a.to_string()).collect(),
            },
        }
    }

    pub fn not_found() -> Self {
        Self {
            reply: CatalogReply::NotFound,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            reply: CatalogReply::Unavailable,
        }
    }
}

impl RemoteCatalog for StubCatalog {
    fn fetch_profile(
        &self,
        _ctx: &RequestContext,
        username: &str,
        platform: Platform,
    ) -> std::result::Result<RemoteProfile, SyncError> {
        match &self.reply {
            CatalogReply::Found { user_id, .. } => Ok(RemoteProfile {
                user_id: user_id.clone(),
            }),
            CatalogReply::NotFound => Err(SyncError::ProfileNotFound {
                username: username.to_string(),
                platform: platform.to_string(),
            }),
            CatalogReply::Unavailable => {
                Err(SyncError::UpstreamUnavailable("status 503".to_string()))
            }
        }
    }

    fn fetch_archives(
        &self,
        _ctx: &RequestContext,
        _username: &str,
    ) -> std::result::Result<Vec<String>, SyncError> {
        match &self.reply {
            CatalogReply::Found { archives, .. } => Ok(archives.clone()),
            _ => Err(SyncError::UpstreamUnavailable("status 503".to_string())),
        }
    }
}

pub struct StubValidator(pub bool);

impl BoardValidator for StubValidator {
    fn is_valid(&self, _board: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// A validator whose program crashes on every board.
pub struct BrokenValidator;

impl BoardValidator for BrokenValidator {
    fn is_valid(&self, _board: &str) -> Result<bool> {
        anyhow::bail!("board validator failed with exit status: 3")
    }
}
