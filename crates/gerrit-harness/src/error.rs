//! Error types for the harness.
//!
//! Every failure carries enough structure to tell "the container never became
//! reachable" apart from "the container is up but bootstrapping it failed".
//! Tests should match on [`Error::category`] rather than on message text.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::readiness::ProbeKind;

/// Why a context stopped being live
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was cancelled explicitly
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Why a single readiness probe did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The context was cancelled before the probe succeeded
    #[error("context cancelled")]
    Cancelled,

    /// The deadline passed before the probe succeeded
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The probe task died without reporting a result
    #[error("probe task failed: {0}")]
    TaskFailed(String),

    /// The HTTP client used for probing could not be built
    #[error("failed to build http client: {0}")]
    Client(String),
}

impl From<ContextError> for ProbeError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => ProbeError::Cancelled,
            ContextError::DeadlineExceeded => ProbeError::DeadlineExceeded,
        }
    }
}

/// One failed probe
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    /// Which kind of probe failed
    pub kind: ProbeKind,
    /// What it was probing (`host:port` or a URL)
    pub target: String,
    /// How it failed
    pub error: ProbeError,
    /// How long it ran before giving up
    pub elapsed: Duration,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} probe of {} after {:?}: {}",
            self.kind, self.target, self.elapsed, self.error
        )
    }
}

/// The combined outcome of a failed readiness wait
///
/// Holds every failed probe, not just the first one, plus the error from
/// removing the container afterwards if that failed too.
#[derive(Debug)]
pub struct ReadinessError {
    /// All probes that failed
    pub failures: Vec<ProbeFailure>,
    /// Error from the rollback termination, if it failed
    pub rollback: Option<container_runtime::Error>,
}

impl ReadinessError {
    /// Returns true if any probe ran into the deadline
    pub fn is_timeout(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.error == ProbeError::DeadlineExceeded)
    }

    /// Returns true if any probe was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.error == ProbeError::Cancelled)
    }
}

impl fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "readiness failed: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        if let Some(rollback) = &self.rollback {
            write!(f, "; rollback failed: {}", rollback)?;
        }
        Ok(())
    }
}

impl std::error::Error for ReadinessError {}

/// Setup pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupStage {
    /// Load or generate the SSH key pair
    Key,
    /// Create the administrative account and upload its public key
    Account,
    /// Authenticate over HTTP and settle the password
    HttpClient,
    /// Verify SSH access with the key
    SshClient,
}

impl SetupStage {
    /// Stage name as used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Key => "key",
            SetupStage::Account => "account",
            SetupStage::HttpClient => "http-client",
            SetupStage::SshClient => "ssh-client",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key material errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// Reading or removing a key file failed
    #[error("key file {}: {source}", path.display())]
    Io {
        /// The key file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a usable private key
    #[error("invalid private key {}: {reason}", path.display())]
    InvalidKey {
        /// The key file
        path: PathBuf,
        /// What ssh-keygen said about it
        reason: String,
    },

    /// Running ssh-keygen failed
    #[error("ssh-keygen failed: {0}")]
    Keygen(#[from] command_runner::Error),
}

/// HTTP protocol client errors
#[derive(Error, Debug)]
pub enum HttpError {
    /// A username is required to talk to the service
    #[error("username not provided")]
    MissingUsername,

    /// The endpoint does not form a valid URL
    #[error("invalid URL {0}")]
    InvalidUrl(String),

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with an unexpected status code
    #[error("{method} {url}: response code {status} != {expected}: {body}")]
    UnexpectedStatus {
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// Status received
        status: u16,
        /// Status expected
        expected: u16,
        /// Response body, trimmed
        body: String,
    },

    /// The response body could not be decoded
    #[error("invalid response body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// SSH protocol client errors
#[derive(Error, Debug)]
pub enum SshError {
    /// Running the ssh client failed
    #[error("ssh to {address}: {source}")]
    Command {
        /// `host:port` that was dialled
        address: String,
        /// Underlying command error
        #[source]
        source: command_runner::Error,
    },

    /// `gerrit version` printed something unexpected
    #[error("unexpected version output: {0:?}")]
    UnexpectedVersion(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        /// The file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The configuration is inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of one setup stage
#[derive(Error, Debug)]
pub enum SetupError {
    /// Key material problem
    #[error(transparent)]
    Key(#[from] KeyError),

    /// HTTP client problem
    #[error(transparent)]
    Http(#[from] HttpError),

    /// SSH client problem
    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Harness error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A port was requested for an internal port the service does not declare
    #[error("unknown internal port {0}")]
    UnknownPort(u16),

    /// No local port could be reserved
    #[error("failed to reserve a local port: {0}")]
    PortResolution(#[source] std::io::Error),

    /// The runtime failed to create or start the container
    #[error("failed to start container: {0}")]
    ContainerStart(#[source] container_runtime::Error),

    /// The started container does not publish one of the service ports
    #[error("container {container} does not publish internal port {port}")]
    PublishedPortsMissing {
        /// Container id
        container: String,
        /// The missing internal port
        port: u16,
    },

    /// The container did not become ready; it has been removed
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// A bootstrap stage failed after the container became ready
    #[error("setup stage {stage} failed: {source}")]
    Setup {
        /// The failed stage
        stage: SetupStage,
        /// What went wrong
        #[source]
        source: SetupError,
    },

    /// Any other container runtime failure
    #[error("container runtime error: {0}")]
    Runtime(#[source] container_runtime::Error),

    /// One or more teardown steps failed
    #[error("teardown failed: {}", join(.0))]
    Teardown(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse failure classes callers can assert on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Bad configuration
    Config,
    /// Port allocation failed before anything was started
    PortResolution,
    /// The container could not be started; nothing to roll back
    ContainerStart,
    /// Readiness probes ran into the deadline
    ReadinessTimeout,
    /// Readiness probes were cancelled
    ReadinessCancelled,
    /// Readiness failed for another reason
    Readiness,
    /// The container is ready but bootstrapping it failed at this stage
    Setup(SetupStage),
    /// Container runtime failure outside start
    Runtime,
    /// Teardown failed
    Teardown,
}

impl Error {
    /// Tag a setup failure with its stage
    pub fn setup(stage: SetupStage, source: impl Into<SetupError>) -> Self {
        Error::Setup {
            stage,
            source: source.into(),
        }
    }

    /// Classify the error
    pub fn category(&self) -> FailureCategory {
        match self {
            Error::Config(_) => FailureCategory::Config,
            Error::UnknownPort(_) | Error::PortResolution(_) => FailureCategory::PortResolution,
            Error::ContainerStart(_) => FailureCategory::ContainerStart,
            Error::PublishedPortsMissing { .. } => FailureCategory::Readiness,
            Error::Readiness(e) if e.is_cancelled() => FailureCategory::ReadinessCancelled,
            Error::Readiness(e) if e.is_timeout() => FailureCategory::ReadinessTimeout,
            Error::Readiness(_) => FailureCategory::Readiness,
            Error::Setup { stage, .. } => FailureCategory::Setup(*stage),
            Error::Runtime(_) => FailureCategory::Runtime,
            Error::Teardown(_) => FailureCategory::Teardown,
        }
    }

    /// Returns true if the container never became usable and was not left behind
    pub fn never_ready(&self) -> bool {
        matches!(
            self.category(),
            FailureCategory::PortResolution
                | FailureCategory::ContainerStart
                | FailureCategory::ReadinessTimeout
                | FailureCategory::ReadinessCancelled
                | FailureCategory::Readiness
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: ProbeKind, error: ContextError) -> ProbeFailure {
        ProbeFailure {
            kind,
            target: "127.0.0.1:1".to_string(),
            error: error.into(),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_readiness_categories() {
        let timeout = Error::Readiness(ReadinessError {
            failures: vec![failure(ProbeKind::Tcp, ContextError::DeadlineExceeded)],
            rollback: None,
        });
        assert_eq!(timeout.category(), FailureCategory::ReadinessTimeout);
        assert!(timeout.never_ready());

        let cancelled = Error::Readiness(ReadinessError {
            failures: vec![
                failure(ProbeKind::Tcp, ContextError::Cancelled),
                failure(ProbeKind::Http, ContextError::Cancelled),
            ],
            rollback: None,
        });
        assert_eq!(cancelled.category(), FailureCategory::ReadinessCancelled);
    }

    #[test]
    fn test_readiness_message_lists_every_failure() {
        let err = ReadinessError {
            failures: vec![
                failure(ProbeKind::Tcp, ContextError::DeadlineExceeded),
                failure(ProbeKind::Http, ContextError::DeadlineExceeded),
            ],
            rollback: None,
        };
        let message = err.to_string();
        assert!(message.starts_with("readiness failed: "));
        assert!(message.contains("tcp probe"));
        assert!(message.contains("http probe"));
    }

    #[test]
    fn test_setup_errors_carry_stage() {
        let err = Error::setup(SetupStage::Account, HttpError::MissingUsername);
        assert_eq!(err.category(), FailureCategory::Setup(SetupStage::Account));
        assert!(!err.never_ready());
        assert_eq!(
            err.to_string(),
            "setup stage account failed: username not provided"
        );
    }

    #[test]
    fn test_stage_order() {
        assert!(SetupStage::Key < SetupStage::Account);
        assert!(SetupStage::Account < SetupStage::HttpClient);
        assert!(SetupStage::HttpClient < SetupStage::SshClient);
    }
}
