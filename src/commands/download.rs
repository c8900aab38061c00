use anyhow::Result;

use crate::commands::{TriggerReply, audit_outcome};
use crate::error::SyncError;
use crate::sync::catalog::ChessDotComCatalog;
use crate::sync::config::SyncConfig;
use crate::sync::context::RequestContext;
use crate::sync::download::{DownloadOutcome, DownloadPipeline};
use crate::sync::model::DownloadRequest;
use crate::sync::paths::SyncPaths;
use crate::sync::queue::FileQueue;
use crate::sync::store::{FileArchiveLedger, FileSessionTable, FileUserTable};

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub username: Option<String>,
    pub platform: String,
    /// Raw JSON request body; takes precedence over `username`/`platform`.
    pub request: Option<String>,
    pub request_id: Option<String>,
}

fn build_request(opts: &DownloadOptions) -> Result<DownloadRequest, SyncError> {
    if let Some(body) = opts.request.as_deref() {
        return DownloadRequest::parse(body);
    }
    DownloadRequest::new(opts.username.as_deref().unwrap_or_default(), &opts.platform)
}

fn initiate(
    paths: &SyncPaths,
    cfg: &SyncConfig,
    ctx: &RequestContext,
    opts: &DownloadOptions,
) -> Result<DownloadOutcome, SyncError> {
    let request = build_request(opts)?;
    let catalog = ChessDotComCatalog::new(&cfg.catalog).map_err(|err| {
        SyncError::UpstreamUnavailable(format!("failed to build catalog client: {err:#}"))
    })?;
    let users = FileUserTable::open(&paths.tables_dir);
    let ledger = FileArchiveLedger::open(&paths.tables_dir);
    let sessions = FileSessionTable::open(&paths.tables_dir);
    let queue = FileQueue::open(
        &paths.queues_dir,
        &cfg.queue.download_queue,
        cfg.queue.dedup_window_secs,
    );

    let pipeline = DownloadPipeline {
        catalog: &catalog,
        users: &users,
        ledger: &ledger,
        sessions: &sessions,
        queue: &queue,
        config: cfg,
    };
    pipeline.run(ctx, &request)
}

pub fn run(paths: &SyncPaths, cfg: &SyncConfig, opts: &DownloadOptions) -> Result<TriggerReply> {
    let ctx = match opts.request_id.as_deref() {
        Some(id) => RequestContext::new(id),
        None => RequestContext::generate(),
    };
    let result = initiate(paths, cfg, &ctx, opts);
    audit_outcome(paths, &ctx, "download", &result, |outcome| {
        format!(
            "session {} for {}: pending={} missing={} persisted={} retries={} published={} deduplicated={}",
            outcome.response.session_id,
            outcome.user_id,
            outcome.pending,
            outcome.missing,
            outcome.persist.persisted,
            outcome.persist.retries,
            outcome.fanout.published,
            outcome.fanout.deduplicated
        )
    });
    TriggerReply::from_result(result.map(|outcome| outcome.response))
}
