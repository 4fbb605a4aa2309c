//! Errors that abort a discovery or processing run.
//!
//! Per-item failures never show up here; the processing loop counts them in
//! [`ProcessStats`](crate::export::ProcessStats) and moves on.

use thiserror::Error;

use crate::api::{ApiError, AuthError};
use crate::config::ConfigError;
use crate::export::DiscoveryError;
use crate::progress::ProgressError;
use crate::sink::SinkError;

/// Fatal error for a whole run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Token acquisition or renewal failed.
    #[error("authentication failed: {0}")]
    Auth(#[source] AuthError),

    #[error("discovery failed: {0}")]
    Discovery(#[source] DiscoveryError),

    /// Progress could not be read or persisted.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// The output table could not be opened.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The HTTP client could not be set up.
    #[error("API client setup failed: {0}")]
    Client(#[source] ApiError),
}

impl From<AuthError> for ExportError {
    fn from(error: AuthError) -> Self {
        Self::Auth(error)
    }
}

impl From<DiscoveryError> for ExportError {
    fn from(error: DiscoveryError) -> Self {
        match error {
            DiscoveryError::Auth(source) => Self::Auth(source),
            other => Self::Discovery(other),
        }
    }
}

impl From<ApiError> for ExportError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Auth(source) => Self::Auth(source),
            other => Self::Client(other),
        }
    }
}
