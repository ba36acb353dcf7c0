//! Error types for donation transitions.

use thiserror::Error;

use crate::model::DonationId;
use crate::store::StoreError;

/// Error returned by every [`Engine`](super::Engine) entry point.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("donation {0} not found")]
    NotFound(DonationId),

    /// Deliberately says nothing about which check failed.
    #[error("not authorized")]
    Unauthorized,

    #[error("too many requests")]
    RateLimited,

    /// The record kept changing under us.
    #[error("donation {0} was modified concurrently")]
    Conflict(DonationId),

    #[error("donation {0} already exists")]
    Duplicate(DonationId),

    #[error("storage failure: {0}")]
    Infrastructure(#[from] StoreError),
}

impl EngineError {
    /// Whether the caller sent something wrong, as opposed to the system failing.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Infrastructure(_))
    }
}
