use crate::error::SyncError;
use crate::sync::context::RequestContext;
use crate::sync::model::{DownloadGamesCommand, Platform};
use crate::sync::queue::{CommandQueue, OutboundMessage};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutOutcome {
    pub published: usize,
    /// Publishes the queue absorbed because the archive was already in flight.
    pub deduplicated: usize,
}

#[derive(Debug, Clone)]
pub struct FanoutTarget<'a> {
    pub username: &'a str,
    pub platform: Platform,
    pub user_id: &'a str,
    pub session_id: &'a str,
}

/// Publish one download command per archive, in order, stopping at the first
/// failure. Publishing is idempotent per archive, so a later invocation over
/// the same list finishes whatever this one did not.
pub fn publish_download_commands(
    ctx: &RequestContext,
    queue: &dyn CommandQueue,
    target: &FanoutTarget<'_>,
    archive_ids: &[&str],
) -> Result<FanoutOutcome, SyncError> {
    let _span = ctx.span().enter();
    info!(eligible_archives = archive_ids.len(), "publishing download game commands");

    let mut outcome = FanoutOutcome::default();
    for (position, archive_id) in archive_ids.iter().enumerate() {
        let command = DownloadGamesCommand {
            username: target.username.to_string(),
            platform: target.platform,
            archive_id: archive_id.to_string(),
            user_id: target.user_id.to_string(),
            session_id: target.session_id.to_string(),
        };
        let stop = |message: String| SyncError::Fanout {
            published: position,
            expected: archive_ids.len(),
            message,
        };

        let body = serde_json::to_string(&command).map_err(|err| {
            error!(archive_id, error = %err, "failed to encode download game command");
            stop(format!("failed to encode command for {archive_id}: {err}"))
        })?;
        let message = OutboundMessage {
            body,
            deduplication_id: archive_id.to_string(),
            group_id: target.user_id.to_string(),
        };

        let receipt = queue.publish(&message).map_err(|err| {
            error!(archive_id, error = %format!("{err:#}"), "failed to publish download game command");
            stop(format!("{err:#}"))
        })?;
        if receipt.duplicate {
            outcome.deduplicated += 1;
        }
        outcome.published += 1;
    }

    info!(
        published = outcome.published,
        deduplicated = outcome.deduplicated,
        "download game commands published"
    );
    Ok(outcome)
}
