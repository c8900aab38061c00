use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "CHESS_DOT_COM")]
    ChessDotCom,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChessDotCom => "CHESS_DOT_COM",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "CHESS_DOT_COM" => Some(Self::ChessDotCom),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub platform: Platform,
    pub user_id: String,
}

impl UserRecord {
    pub fn table_key(&self) -> String {
        user_table_key(&self.username, self.platform)
    }
}

pub fn user_table_key(username: &str, platform: Platform) -> String {
    format!("{}/{}", platform.as_str(), username)
}

/// One ledger entry per (user, archive). Progress fields belong to the
/// downstream worker; records created here start at zero / absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub user_id: String,
    pub archive_id: String,
    pub resource: String,
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub downloaded_count: u64,
    #[serde(default)]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl ArchiveRecord {
    pub fn fresh(user_id: &str, archive_id: &str, year: i32, month: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            archive_id: archive_id.to_string(),
            resource: archive_id.to_string(),
            year,
            month,
            downloaded_count: 0,
            downloaded_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSession {
    pub session_id: String,
    pub expected_command_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub search_id: String,
    pub started_at: DateTime<Utc>,
    pub total_games: u64,
    pub status: SearchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGamesCommand {
    pub username: String,
    pub platform: Platform,
    pub archive_id: String,
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBoardCommand {
    pub user_id: String,
    pub search_id: String,
    pub board: String,
}

#[derive(Debug, Deserialize)]
struct RawDownloadRequest {
    username: Option<String>,
    platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub username: String,
    pub platform: Platform,
}

impl DownloadRequest {
    pub fn new(username: &str, platform: &str) -> Result<Self, SyncError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SyncError::MalformedRequest(
                "username cannot be empty".to_string(),
            ));
        }
        let Some(platform) = Platform::parse(platform) else {
            return Err(SyncError::MalformedRequest(format!(
                "unsupported platform `{}`",
                platform.trim()
            )));
        };
        Ok(Self {
            username: username.to_string(),
            platform,
        })
    }

    /// Parse a `{"username": ..., "platform": ...}` request body.
    pub fn parse(body: &str) -> Result<Self, SyncError> {
        let raw: RawDownloadRequest = serde_json::from_str(body)
            .map_err(|err| SyncError::MalformedRequest(format!("invalid body: {err}")))?;
        Self::new(
            raw.username.as_deref().unwrap_or_default(),
            raw.platform.as_deref().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub username: String,
    pub platform: Platform,
    pub board: String,
}

impl SearchRequest {
    pub fn new(username: &str, platform: &str, board: &str) -> Result<Self, SyncError> {
        let base = DownloadRequest::new(username, platform)?;
        if board.trim().is_empty() {
            return Err(SyncError::MalformedRequest("board cannot be empty".to_string()));
        }
        Ok(Self {
            username: base.username,
            platform: base.platform,
            board: board.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub search_id: String,
}
