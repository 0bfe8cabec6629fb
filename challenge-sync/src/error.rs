use challenge_model::{GroupId, RequirementError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a transport reports when the server (or the wire) rejects a call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("remote call failed ({status}): {message}")]
pub struct RemoteError {
    pub status: u16,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A reply that arrived but could not be decoded.
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::new(0, format!("malformed reply: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("response for {key} was superseded by a newer call")]
    StaleResponse { key: String },
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        SyncError::Authorization(message.into())
    }

    /// Stale responses are expected under rapid re-triggering and carry no user-facing meaning.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleResponse { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A channel event that could not be applied. Logged, never surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconciliationWarning {
    #[error("event referenced unknown group {0}")]
    UnknownGroup(GroupId),

    #[error("event referenced unknown progress key {key:?} on group {group_id}")]
    UnknownProgressKey { group_id: GroupId, key: String },

    #[error("penalty selection for group {group_id} has angles that disagree with its picks")]
    UnexpectedDescriptor { group_id: GroupId },
}

#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("local challenge {0} not found")]
    NotFound(String),

    #[error("invalid requirements: {0}")]
    InvalidRequirements(#[from] RequirementError),

    #[error("invalid local challenge: {0}")]
    Invalid(String),

    #[error("record encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("record decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("record backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<LocalStoreError> for RemoteError {
    fn from(err: LocalStoreError) -> Self {
        match err {
            LocalStoreError::NotFound(_) => RemoteError::new(404, err.to_string()),
            LocalStoreError::InvalidRequirements(_) | LocalStoreError::Invalid(_) => {
                RemoteError::new(400, err.to_string())
            }
            _ => RemoteError::new(500, err.to_string()),
        }
    }
}
