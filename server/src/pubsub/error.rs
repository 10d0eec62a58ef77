//! Engine error types

use thiserror::Error;

/// Error type for pub/sub engine operations.
///
/// Every variant mirrors the HTTP status the API layer will answer with.
#[derive(Error, Debug)]
pub enum PubSubError {
    #[error("invalid access token")]
    Unauthorized,

    #[error("pubsub not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl PubSubError {
    /// Integer code mirroring the HTTP status
    pub fn code(&self) -> u16 {
        match self {
            PubSubError::Unauthorized => 401,
            PubSubError::NotFound => 404,
            PubSubError::BadRequest(_) => 400,
            PubSubError::Internal(_) => 500,
        }
    }
}
