use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("profile {username} not found on {platform}")]
    ProfileNotFound { username: String, platform: String },
    #[error("profile {username} from {platform} is not cached; download its games first")]
    ProfileNotCached { username: String, platform: String },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("no games available for {0}")]
    NoGameAvailable(String),
    #[error("invalid search board")]
    InvalidSearchBoard,
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("fan-out stopped after {published} of {expected} commands: {message}")]
    Fanout {
        published: usize,
        expected: usize,
        message: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    ProfileNotFound,
    ProfileNotCached,
    UpstreamUnavailable,
    NoGameAvailable,
    InvalidSearchBoard,
    PersistenceFailure,
    FanoutFailure,
    InvalidConfig,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "MALFORMED_REQUEST",
            Self::ProfileNotFound => "PROFILE_NOT_FOUND",
            Self::ProfileNotCached => "PROFILE_NOT_CACHED",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::NoGameAvailable => "NO_GAME_AVAILABLE",
            Self::InvalidSearchBoard => "INVALID_SEARCH_BOARD",
            Self::PersistenceFailure => "PERSISTENCE_FAILURE",
            Self::FanoutFailure => "FANOUT_FAILURE",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }
}

impl SyncError {
    pub fn persistence(err: &anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::ProfileNotFound { .. } => ErrorKind::ProfileNotFound,
            Self::ProfileNotCached { .. } => ErrorKind::ProfileNotCached,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::NoGameAvailable(_) => ErrorKind::NoGameAvailable,
            Self::InvalidSearchBoard => ErrorKind::InvalidSearchBoard,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
            Self::Fanout { .. } => ErrorKind::FanoutFailure,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Whether the caller may resubmit the same request and expect progress.
    ///
    /// Persistence and fan-out failures leave partial state behind, but the
    /// pipeline re-derives eligibility and the queue deduplicates, so a retry
    /// completes the remainder.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamUnavailable | ErrorKind::PersistenceFailure | ErrorKind::FanoutFailure
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind().as_str(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}
