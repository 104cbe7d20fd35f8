//! SSH access through the `ssh` command line client.

use async_trait::async_trait;
use command_runner::{Command, CommandOutput, Runner};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SshError;
use crate::keys::KeyMaterial;
use crate::orchestrator::Endpoint;
use crate::setup::{SshConnector, SshSession};

/// Options passed to every `ssh` invocation
///
/// The service's host key changes with every container, so it is neither
/// checked nor recorded. Batch mode makes a missing or rejected key fail
/// instead of prompting.
const SSH_OPTIONS: &[&str] = &[
    "StrictHostKeyChecking=no",
    "UserKnownHostsFile=/dev/null",
    "BatchMode=yes",
    "IdentitiesOnly=yes",
    "ConnectTimeout=10",
    "LogLevel=ERROR",
];

/// Runs commands on the service over SSH as one account
#[derive(Debug, Clone)]
pub struct SshClient {
    runner: Runner,
    endpoint: Endpoint,
    username: String,
    private_key: PathBuf,
}

impl SshClient {
    /// Client for `username` at `endpoint` authenticating with `private_key`
    pub fn new(
        endpoint: Endpoint,
        username: impl Into<String>,
        private_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner: Runner::new("ssh"),
            endpoint,
            username: username.into(),
            private_key: private_key.into(),
        }
    }

    /// The endpoint this client dials
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The private key in use
    pub fn private_key(&self) -> &Path {
        &self.private_key
    }

    /// The `ssh` invocation that runs `remote` on the service
    pub fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.endpoint.port.to_string())
            .arg("-i")
            .arg(&self.private_key);
        for option in SSH_OPTIONS {
            cmd.arg("-o").arg(option);
        }
        cmd.arg(format!("{}@{}", self.username, self.endpoint.address))
            .arg(remote);
        cmd
    }

    /// Run `remote` and fail unless it exits successfully
    pub async fn run(&self, remote: &str) -> Result<CommandOutput, SshError> {
        debug!(addr = %self.endpoint, command = remote, "ssh");
        self.runner
            .run(&self.command(remote))
            .await
            .map_err(|source| SshError::Command {
                address: self.endpoint.to_string(),
                source,
            })
    }
}

#[async_trait]
impl SshSession for SshClient {
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        SshClient::run(self, command).await
    }

    async fn close(self) -> Result<(), SshError> {
        // Every command is its own connection; nothing stays open
        Ok(())
    }
}

/// Builds [`SshClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SshClientConnector;

#[async_trait]
impl SshConnector for SshClientConnector {
    type Session = SshClient;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        username: &str,
        key: &KeyMaterial,
    ) -> Result<SshClient, SshError> {
        Ok(SshClient::new(
            endpoint.clone(),
            username,
            key.private_key_path.clone(),
        ))
    }
}

/// Pull the version out of `gerrit version` output (`gerrit version 2.14.3`)
pub fn parse_version(output: &str) -> Result<String, SshError> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    match fields.as_slice() {
        [_, _, version, ..] => Ok(version.to_string()),
        _ => Err(SshError::UnexpectedVersion(output.trim().to_string())),
    }
}
