use anyhow::Result;

use crate::commands::{TriggerReply, audit_outcome};
use crate::error::SyncError;
use crate::sync::config::SyncConfig;
use crate::sync::context::RequestContext;
use crate::sync::model::SearchRequest;
use crate::sync::paths::SyncPaths;
use crate::sync::queue::FileQueue;
use crate::sync::search::{SearchOutcome, SearchPipeline};
use crate::sync::store::{FileArchiveLedger, FileSearchTable, FileUserTable};
use crate::sync::validator::CommandBoardValidator;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub username: String,
    pub platform: String,
    pub board: String,
    pub request_id: Option<String>,
}

fn initiate(
    paths: &SyncPaths,
    cfg: &SyncConfig,
    ctx: &RequestContext,
    opts: &SearchOptions,
) -> Result<SearchOutcome, SyncError> {
    let request = SearchRequest::new(&opts.username, &opts.platform, &opts.board)?;
    let validator = CommandBoardValidator::resolve(cfg.validator.board_validator_bin.as_deref())
        .map_err(|err| SyncError::InvalidConfig(format!("{err:#}")))?;
    let users = FileUserTable::open(&paths.tables_dir);
    let ledger = FileArchiveLedger::open(&paths.tables_dir);
    let searches = FileSearchTable::open(&paths.tables_dir);
    let queue = FileQueue::open(
        &paths.queues_dir,
        &cfg.queue.search_queue,
        cfg.queue.dedup_window_secs,
    );

    SearchPipeline {
        validator: &validator,
        users: &users,
        ledger: &ledger,
        searches: &searches,
        queue: &queue,
    }
    .run(ctx, &request)
}

pub fn run(paths: &SyncPaths, cfg: &SyncConfig, opts: &SearchOptions) -> Result<TriggerReply> {
    let ctx = match opts.request_id.as_deref() {
        Some(id) => RequestContext::new(id),
        None => RequestContext::generate(),
    };
    let result = initiate(paths, cfg, &ctx, opts);
    audit_outcome(paths, &ctx, "search", &result, |outcome| {
        format!(
            "search {} for {} over {} games",
            outcome.response.search_id, outcome.user_id, outcome.total_games
        )
    });
    TriggerReply::from_result(result.map(|outcome| outcome.response))
}
