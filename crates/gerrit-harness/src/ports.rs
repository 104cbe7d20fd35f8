//! Host port selection.
//!
//! The HTTP port has to be known before the container exists because it is
//! baked into the canonical URL the service advertises. That port is reserved
//! by binding an ephemeral listener on loopback, reading the port the OS
//! assigned and closing the listener again. Nothing holds the port between
//! that moment and docker binding it, so another process can take it; the
//! start then fails and the failure is reported, not retried.
//!
//! The SSH port has no such constraint and is left to docker.

use container_runtime::PortBinding;
use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::{HTTP_PORT, SSH_PORT};

/// Turn a requested host port into the value handed to the runtime
///
/// * `Some(port)` is returned unchanged, without checking it is free.
/// * `None` for [`HTTP_PORT`] reserves a free loopback port now.
/// * `None` for [`SSH_PORT`] stays `None`; the runtime picks at start.
/// * Any other internal port is an [`Error::UnknownPort`].
pub fn resolve_port(requested: Option<u16>, internal: u16) -> Result<Option<u16>> {
    if internal != HTTP_PORT && internal != SSH_PORT {
        return Err(Error::UnknownPort(internal));
    }

    match requested {
        Some(port) => Ok(Some(port)),
        None if internal == HTTP_PORT => reserve_local_port().map(Some),
        None => Ok(None),
    }
}

/// Ask the OS for a free port on loopback
fn reserve_local_port() -> Result<u16> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(Error::PortResolution)?;
    let port = listener.local_addr().map_err(Error::PortResolution)?.port();
    drop(listener);

    debug!(port, "Reserved local port");
    Ok(port)
}

/// Resolve both service ports into the bindings for the container
pub fn bindings(config: &Config) -> Result<Vec<PortBinding>> {
    Ok(vec![
        PortBinding::tcp(HTTP_PORT, resolve_port(config.http_port, HTTP_PORT)?),
        PortBinding::tcp(SSH_PORT, resolve_port(config.ssh_port, SSH_PORT)?),
    ])
}
