use crate::error::SyncError;
use crate::sync::context::RequestContext;
use crate::sync::model::{
    SearchBoardCommand, SearchRecord, SearchRequest, SearchResponse, SearchStatus,
};
use crate::sync::queue::{CommandQueue, OutboundMessage};
use crate::sync::store::{ArchiveLedger, SearchTable, UserTable};
use crate::sync::validator::BoardValidator;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct SearchPipeline<'a> {
    pub validator: &'a dyn BoardValidator,
    pub users: &'a dyn UserTable,
    pub ledger: &'a dyn ArchiveLedger,
    pub searches: &'a dyn SearchTable,
    pub queue: &'a dyn CommandQueue,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub response: SearchResponse,
    pub user_id: String,
    pub total_games: u64,
}

impl SearchPipeline<'_> {
    /// Register a board search over every game already downloaded for a
    /// cached user and hand it to the search workers.
    pub fn run(
        &self,
        ctx: &RequestContext,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, SyncError> {
        let ctx = ctx.for_user(&request.username, request.platform.as_str());
        let _span = ctx.span().enter();

        // A board the validator cannot judge is rejected like an invalid one.
        let valid = self.validator.is_valid(&request.board).unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "board validator failed, rejecting board");
            false
        });
        if !valid {
            info!("search board rejected");
            return Err(SyncError::InvalidSearchBoard);
        }

        let user = self
            .users
            .get(&request.username, request.platform)
            .map_err(|err| SyncError::persistence(&err))?
            .ok_or_else(|| SyncError::ProfileNotCached {
                username: request.username.clone(),
                platform: request.platform.to_string(),
            })?;

        let archives = self
            .ledger
            .query_by_user(&user.user_id)
            .map_err(|err| SyncError::persistence(&err))?;
        let total_games = archives.iter().map(|a| a.downloaded_count).sum::<u64>();
        if total_games == 0 {
            info!(user_id = %user.user_id, "no downloaded games to search");
            return Err(SyncError::NoGameAvailable(user.user_id));
        }

        let record = SearchRecord {
            search_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            total_games,
            status: SearchStatus::InProgress,
        };
        self.searches.put(&record).map_err(|err| {
            error!(error = %format!("{err:#}"), "failed to persist the search record");
            SyncError::persistence(&err)
        })?;

        let command = SearchBoardCommand {
            user_id: user.user_id.clone(),
            search_id: record.search_id.clone(),
            board: request.board.clone(),
        };
        let fanout_failure = |message: String| SyncError::Fanout {
            published: 0,
            expected: 1,
            message,
        };
        let body = serde_json::to_string(&command)
            .map_err(|err| fanout_failure(format!("failed to encode search command: {err}")))?;
        self.queue
            .publish(&OutboundMessage {
                body,
                deduplication_id: record.search_id.clone(),
                group_id: user.user_id.clone(),
            })
            .map_err(|err| {
                error!(error = %format!("{err:#}"), "failed to publish search board command");
                fanout_failure(format!("{err:#}"))
            })?;

        info!(search_id = %record.search_id, total_games, "search board command published");
        Ok(SearchOutcome {
            response: SearchResponse {
                search_id: record.search_id,
            },
            user_id: user.user_id,
            total_games,
        })
    }
}
