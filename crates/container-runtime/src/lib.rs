//! # Container runtime
//!
//! The harness only ever needs four things from a container runtime: start a
//! container, look at it, list the ones it started and remove one. This crate
//! defines that capability as the [`ContainerRuntime`] trait and implements it
//! on top of the `docker` CLI.
//!
//! Code that orchestrates containers should depend on the trait, never on
//! [`DockerCli`] directly, so it can be driven by the in-memory runtime
//! available behind the `test-utils` feature.

#![warn(missing_docs)]

pub mod docker;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod models;
mod runtime;

pub use docker::DockerCli;
pub use error::{Error, Result};
pub use models::{
    ContainerId, ContainerInfo, ContainerSpec, ContainerState, PortBinding, Protocol,
    PublishedPort,
};
pub use runtime::ContainerRuntime;
