//! Error types for command execution

use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// The program could not be located on `$PATH`
    #[error("command not found: {program}")]
    CommandNotFound {
        /// The program that was not found
        program: String,
    },

    /// Failed to spawn a process
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        /// The program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully
    #[error("`{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        /// Rendered command line
        command: String,
        /// Exit status of the process
        status: crate::runner::ExitStatus,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// I/O error while talking to the process
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn failed error, mapping `NotFound` to [`Error::CommandNotFound`]
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::CommandNotFound { program }
        } else {
            Self::SpawnFailed { program, source }
        }
    }

    /// Standard error of the failed process, if the process got far enough to print any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
