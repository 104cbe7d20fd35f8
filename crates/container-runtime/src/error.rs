//! Error types for the container runtime

use thiserror::Error;

/// Container runtime error type
#[derive(Error, Debug)]
pub enum Error {
    /// The container does not exist (never created, or already removed)
    #[error("container not found: {id}")]
    NotFound {
        /// The container ID that was not found
        id: String,
    },

    /// The runtime refused the request, e.g. because a host port is taken
    #[error("container runtime rejected request: {0}")]
    Rejected(String),

    /// The runtime answered with something we could not make sense of
    #[error("unexpected runtime output: {0}")]
    InvalidOutput(String),

    /// Running the runtime CLI failed
    #[error(transparent)]
    Command(#[from] command_runner::Error),

    /// JSON decoding error
    #[error("JSON decoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the error means the container does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
