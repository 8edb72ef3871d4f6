use crate::relay::Role;
use thiserror::Error;

/// Failure reported by a remote lobby or relay service call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("full: {0}")]
    Full(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited")]
    RateLimited,
}

impl ServiceError {
    /// True for failures worth retrying on the next timer tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("lobby is full")]
    Capacity,

    #[error("not a member of lobby {0}")]
    NotAMember(String),

    #[error("transport already active as {0}")]
    TransportActive(Role),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote service error: {0}")]
    Remote(#[source] ServiceError),

    #[error("lobby changed while the request was in flight")]
    Superseded,
}

impl LobbyError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

impl From<ServiceError> for LobbyError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Full(_) => Self::Capacity,
            other => Self::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LobbyError>;
