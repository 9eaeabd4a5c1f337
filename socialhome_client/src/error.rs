use thiserror::Error;

use crate::models::ContentId;

/// Failure of a single API call, already classified for the caller.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced an HTTP response.
    #[error("{message}")]
    Transport { message: String },

    /// 401/403 while the session was believed to be authenticated.
    #[error("session expired (HTTP {status})")]
    SessionExpired { status: u16 },

    /// 403/404 for an anonymous or unauthorized viewer.
    #[error("{message}")]
    Unavailable { status: u16, message: String },

    /// 4xx with a structured body; the message is meant for the user.
    #[error("{message}")]
    Validation { status: u16, message: String },

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transport { .. } | FetchError::Decode(_) => None,
            FetchError::SessionExpired { status }
            | FetchError::Unavailable { status, .. }
            | FetchError::Validation { status, .. }
            | FetchError::Http { status, .. } => Some(*status),
        }
    }

    /// Whether a stream fetch failing with this error should prompt a login.
    pub fn marks_auth_required(&self) -> bool {
        matches!(self, FetchError::Unavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("content {0} is not cached")]
    UnknownContent(ContentId),

    #[error("profile {0} is not cached")]
    UnknownProfile(String),

    #[error("invalid stream parameters: {0}")]
    InvalidParams(String),
}

impl SyncError {
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            SyncError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}
