use crate::error::SyncError;
use crate::sync::catalog::RemoteCatalog;
use crate::sync::config::SyncConfig;
use crate::sync::context::RequestContext;
use crate::sync::fanout::{FanoutOutcome, FanoutTarget, publish_download_commands};
use crate::sync::model::{
    ArchiveRecord, DownloadRequest, DownloadResponse, DownloadSession, UserRecord,
};
use crate::sync::persist::{BatchPersistor, PersistOutcome};
use crate::sync::queue::CommandQueue;
use crate::sync::reconcile::{parse_archive_period, reconcile};
use crate::sync::store::{ArchiveLedger, SessionTable, UserTable};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

/// Collaborators the download pipeline talks to.
pub struct DownloadPipeline<'a> {
    pub catalog: &'a dyn RemoteCatalog,
    pub users: &'a dyn UserTable,
    pub ledger: &'a dyn ArchiveLedger,
    pub sessions: &'a dyn SessionTable,
    pub queue: &'a dyn CommandQueue,
    pub config: &'a SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub response: DownloadResponse,
    pub user_id: String,
    pub missing: usize,
    pub pending: usize,
    pub persist: PersistOutcome,
    pub fanout: FanoutOutcome,
}

fn build_missing_records(
    user_id: &str,
    missing: &[String],
) -> Result<Vec<ArchiveRecord>, SyncError> {
    missing
        .iter()
        .map(|archive_id| {
            let (year, month) = parse_archive_period(archive_id).ok_or_else(|| {
                error!(archive_id = %archive_id, "archive identifier carries no year/month suffix");
                SyncError::UpstreamUnavailable(format!(
                    "archive identifier without year/month suffix: {archive_id}"
                ))
            })?;
            Ok(ArchiveRecord::fresh(user_id, archive_id, year, month))
        })
        .collect()
}

impl DownloadPipeline<'_> {
    /// Reconcile the remote catalog with the ledger and fan out one command
    /// per eligible archive. The session is recorded before the first publish.
    pub fn run(
        &self,
        ctx: &RequestContext,
        request: &DownloadRequest,
    ) -> Result<DownloadOutcome, SyncError> {
        let ctx = ctx.for_user(&request.username, request.platform.as_str());

        let profile = self
            .catalog
            .fetch_profile(&ctx, &request.username, request.platform)?;
        let ctx = ctx.for_user_id(&profile.user_id);
        let user = UserRecord {
            username: request.username.clone(),
            platform: request.platform,
            user_id: profile.user_id,
        };
        self.register_user(&ctx, &user)?;

        let remote = self.catalog.fetch_archives(&ctx, &user.username)?;
        let known = self.read_ledger(&ctx, &user.user_id)?;
        let plan = reconcile(&remote, &known);

        let missing_records = build_missing_records(&user.user_id, &plan.missing)?;
        let persist = BatchPersistor::new(
            self.ledger,
            self.config.store.batch_size,
            self.config.retry.clone(),
        )
        .persist(&ctx, &missing_records)?;

        let session = DownloadSession {
            session_id: Uuid::new_v4().to_string(),
            expected_command_count: plan.expected_command_count(),
            created_at: Utc::now(),
        };
        self.record_session(&ctx, &session)?;

        let eligible = plan
            .pending
            .iter()
            .map(|record| record.archive_id.as_str())
            .chain(plan.missing.iter().map(String::as_str))
            .collect::<Vec<_>>();
        let fanout = publish_download_commands(
            &ctx,
            self.queue,
            &FanoutTarget {
                username: &user.username,
                platform: user.platform,
                user_id: &user.user_id,
                session_id: &session.session_id,
            },
            &eligible,
        )?;

        Ok(DownloadOutcome {
            response: DownloadResponse {
                session_id: session.session_id,
            },
            user_id: user.user_id,
            missing: plan.missing.len(),
            pending: plan.pending.len(),
            persist,
            fanout,
        })
    }

    fn register_user(&self, ctx: &RequestContext, user: &UserRecord) -> Result<(), SyncError> {
        let _span = ctx.span().enter();
        self.users.put(user).map_err(|err| {
            error!(error = %format!("{err:#}"), "failed to persist the user");
            SyncError::persistence(&err)
        })?;
        info!("user persisted");
        Ok(())
    }

    fn read_ledger(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<Vec<ArchiveRecord>, SyncError> {
        let _span = ctx.span().enter();
        let records = self.ledger.query_by_user(user_id).map_err(|err| {
            error!(error = %format!("{err:#}"), "failed to query the archive ledger");
            SyncError::persistence(&err)
        })?;
        info!(known_archives = records.len(), "archives found in ledger");
        Ok(records)
    }

    fn record_session(
        &self,
        ctx: &RequestContext,
        session: &DownloadSession,
    ) -> Result<(), SyncError> {
        let _span = ctx.span().enter();
        self.sessions.put(session).map_err(|err| {
            error!(error = %format!("{err:#}"), "failed to persist the download session");
            SyncError::persistence(&err)
        })?;
        info!(
            session_id = %session.session_id,
            expected_commands = session.expected_command_count,
            "download session recorded"
        );
        Ok(())
    }
}
