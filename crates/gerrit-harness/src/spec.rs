//! Connection details of a running service, for handing to tests.

use container_runtime::PublishedPort;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::orchestrator::Instance;
use crate::setup::Bootstrap;

/// The administrative account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name
    pub login: String,
    /// HTTP password
    pub password: String,
    /// Private key registered for SSH
    pub private_key: PathBuf,
}

/// How to reach and authenticate against one running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Admin credentials
    pub admin: User,
    /// Container id
    pub container: String,
    /// Service version
    pub version: String,
    /// Published SSH port
    pub ssh: PublishedPort,
    /// Published HTTP port
    pub http: PublishedPort,
    /// Base URL
    pub url: String,
    /// Ready-to-paste command for an interactive SSH session
    pub ssh_command: String,
}

impl ServiceSpec {
    /// Describe a set-up instance
    pub fn new(instance: &Instance, bootstrap: &Bootstrap) -> Self {
        let identity = &bootstrap.identity;
        let ssh = instance.ssh_endpoint();
        let ssh_command = format!(
            "ssh -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no -i {} -p {} {}@{}",
            identity.private_key.display(),
            ssh.port,
            identity.login,
            ssh.address
        );

        Self {
            admin: User {
                login: identity.login.clone(),
                password: identity.password.clone(),
                private_key: identity.private_key.clone(),
            },
            container: instance.id.to_string(),
            version: bootstrap.version.clone(),
            ssh: instance.ssh.clone(),
            http: instance.http.clone(),
            url: instance.url(),
            ssh_command,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
