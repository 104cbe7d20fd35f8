//! # Gerrit harness
//!
//! Ephemeral Gerrit servers for integration tests.
//!
//! A run has two halves:
//!
//! * The [`Orchestrator`] picks host ports, starts a container and waits until
//!   both the SSH and the HTTP listener answer. If they do not, the container
//!   is removed before the error is returned.
//! * The [`SetupSequencer`] then bootstraps the ready instance: key material,
//!   admin account, HTTP password and an SSH round trip.
//!
//! [`Harness`] runs both and tears everything down again.
//!
//! ## Example
//!
//! ```no_run
//! use gerrit_harness::{Config, Harness, RunContext};
//! use std::time::Duration;
//!
//! # async fn example() -> gerrit_harness::Result<()> {
//! let ctx = RunContext::with_timeout(Duration::from_secs(600));
//! let harness = Harness::start(Config::default(), &ctx).await?;
//!
//! let spec = harness.spec();
//! println!("{} as {}", spec.url, spec.admin.login);
//!
//! harness.destroy().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod harness;
pub mod http;
pub mod keys;
pub mod orchestrator;
pub mod ports;
pub mod readiness;
pub mod setup;
pub mod spec;
pub mod ssh;

pub use config::{Config, DEFAULT_IMAGE, IMAGE_ENV_VAR, resolve_image};
pub use context::RunContext;
pub use error::{
    ContextError, Error, FailureCategory, ProbeError, ProbeFailure, ReadinessError, Result,
    SetupError, SetupStage,
};
pub use harness::Harness;
pub use http::HttpClient;
pub use keys::KeyMaterial;
pub use orchestrator::{Endpoint, Instance, Orchestrator, Phase};
pub use readiness::{ProbeKind, ProbeResult, ProbeTarget, WAIT_DELAY, wait_ready};
pub use setup::{Bootstrap, BootstrapIdentity, SetupSequencer};
pub use spec::{ServiceSpec, User};
pub use ssh::SshClient;

/// Port the HTTP listener uses inside the container
pub const HTTP_PORT: u16 = 8080;

/// Port the SSH listener uses inside the container
pub const SSH_PORT: u16 = 29418;
