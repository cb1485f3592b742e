//! Remote call and verification error types

use thiserror::Error;

/// Failure of a single remote fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote service answered 404: the entity does not exist
    #[error("Remote entity {id} not found")]
    NotFound { id: String },

    /// Timeout, connection failure, 5xx or an unreadable body
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Outcome of a verification that produced no verdict
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Dependency {dependency} unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("Verification against {dependency} cancelled")]
    Cancelled { dependency: String },
}
