//! Runtime command execution for the harness
//!
//! Every interaction with the outside world that is not a socket goes through
//! a CLI tool: `docker` for the container runtime, `ssh` for the service's SSH
//! interface and `ssh-keygen` for key material. This crate builds those
//! commands, runs them to completion and hands back what they printed.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod runner;

pub use command::{Command, CommandBuilder};
pub use error::{Error, Result};
pub use runner::{find_in_path, CommandOutput, ExitStatus, Runner};
