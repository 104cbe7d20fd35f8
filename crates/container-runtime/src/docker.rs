//! Docker CLI backend.

use async_trait::async_trait;
use command_runner::{Command, Runner};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::{
    ContainerId, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, Error, Protocol,
    PublishedPort, Result,
};

/// [`ContainerRuntime`] backed by the `docker` command line client
///
/// Talks to whatever daemon the CLI is configured for (`$DOCKER_HOST`,
/// contexts, ...), so it works the same against a local daemon and a remote
/// one.
#[derive(Debug, Clone)]
pub struct DockerCli {
    runner: Runner,
    binary: String,
}

impl DockerCli {
    /// Use `docker` from `$PATH`
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker-compatible binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            runner: Runner::new("docker-runtime"),
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Build the `docker create` invocation for a spec
    pub(crate) fn create_command(&self, spec: &ContainerSpec) -> Command {
        let mut cmd = self.command();
        cmd.arg("create");

        if let Some(name) = &spec.name {
            cmd.arg("--name").arg(name);
        }
        for (key, value) in &spec.labels {
            cmd.arg("--label").arg(format!("{}={}", key, value));
        }
        for (key, value) in &spec.env {
            cmd.arg("--env").arg(format!("{}={}", key, value));
        }
        for binding in &spec.ports {
            cmd.arg("--publish").arg(binding.publish_spec());
        }

        cmd.arg(&spec.image);
        cmd
    }

    pub(crate) fn start_command(&self, id: &ContainerId) -> Command {
        let mut cmd = self.command();
        cmd.arg("start").arg(id.as_str());
        cmd
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// The id docker prints as the last line of `docker create`
fn parse_container_id(stdout: &str) -> Result<ContainerId> {
    stdout
        .lines()
        .last()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ContainerId::new)
        .ok_or_else(|| Error::InvalidOutput("docker create printed no container id".into()))
}

/// Docker prints one of these on stderr when an object does not exist
fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        info!(image = %spec.image, ports = spec.ports.len(), "Starting container");

        let output = self.runner.run(&self.create_command(spec)).await?;
        let id = parse_container_id(&output.stdout)?;

        // A failed start (e.g. a taken host port) leaves the created container behind
        if let Err(e) = self.runner.run(&self.start_command(&id)).await {
            warn!(container = %id.short(), error = %e, "Container failed to start, removing it");
            if let Err(cleanup) = self.remove(&id).await {
                warn!(
                    container = %id.short(),
                    error = %cleanup,
                    "Failed to remove unstarted container"
                );
            }
            return Err(e.into());
        }

        info!(container = %id.short(), "Container started");
        Ok(id)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo> {
        let mut cmd = self.command();
        cmd.args(["inspect", "--type", "container"]).arg(id.as_str());

        let output = self.runner.output(&cmd).await?;
        if !output.success() {
            if is_missing(&output.stderr) {
                return Err(Error::NotFound {
                    id: id.to_string(),
                });
            }
            return Err(Error::Rejected(output.stderr.trim().to_string()));
        }

        parse_inspect(&output.stdout)
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        debug!(container = %id.short(), "Removing container");

        let mut cmd = self.command();
        cmd.args(["rm", "--force", "--volumes"]).arg(id.as_str());

        let output = self.runner.output(&cmd).await?;
        if output.success() {
            info!(container = %id.short(), "Container removed");
            return Ok(());
        }
        if is_missing(&output.stderr) {
            return Err(Error::NotFound {
                id: id.to_string(),
            });
        }
        Err(Error::Rejected(output.stderr.trim().to_string()))
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>> {
        let mut cmd = self.command();
        cmd.args(["ps", "--all", "--quiet", "--no-trunc", "--filter"])
            .arg(format!("label={}={}", label, value));

        let output = self.runner.run(&cmd).await?;
        let mut containers = Vec::new();
        for id in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.inspect(&ContainerId::new(id)).await {
                Ok(info) => containers.push(info),
                // Removed between `ps` and `inspect`
                Err(Error::NotFound { .. }) => continue,
                Err(e) => {
                    warn!(container = %id, error = %e, "Failed to inspect listed container");
                    return Err(e);
                }
            }
        }
        Ok(containers)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    config: InspectConfig,
    state: InspectState,
    network_settings: InspectNetwork,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBinding {
    #[serde(default)]
    host_ip: String,
    host_port: String,
}

/// Parse the JSON array printed by `docker inspect`
pub(crate) fn parse_inspect(json: &str) -> Result<ContainerInfo> {
    let mut entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    if entries.len() != 1 {
        return Err(Error::InvalidOutput(format!(
            "expected exactly one container from inspect, got {}",
            entries.len()
        )));
    }
    let entry = entries.remove(0);

    let ports = match entry.network_settings.ports {
        Some(ports) => published_ports(ports)?,
        None => Vec::new(),
    };

    Ok(ContainerInfo {
        id: ContainerId::new(entry.id),
        image: entry.config.image,
        state: ContainerState::from_status(&entry.state.status),
        ports,
        labels: entry.config.labels.unwrap_or_default(),
    })
}

/// Turn docker's `"8080/tcp": [{HostIp, HostPort}]` map into published ports
///
/// Exposed-but-unpublished ports (`null` bindings) are skipped. When docker
/// publishes on both IPv4 and IPv6 the IPv4 binding wins.
fn published_ports(
    ports: BTreeMap<String, Option<Vec<HostBinding>>>,
) -> Result<Vec<PublishedPort>> {
    let mut published = Vec::new();

    for (key, bindings) in ports {
        let Some(bindings) = bindings else { continue };

        let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
        let internal: u16 = port
            .parse()
            .map_err(|_| Error::InvalidOutput(format!("bad container port '{}'", key)))?;
        let protocol: Protocol = protocol.parse().map_err(Error::InvalidOutput)?;

        let Some(binding) = bindings
            .iter()
            .find(|b| !b.host_ip.contains(':'))
            .or_else(|| bindings.first())
        else {
            continue;
        };

        let external: u16 = binding.host_port.parse().map_err(|_| {
            Error::InvalidOutput(format!("bad host port '{}'", binding.host_port))
        })?;

        published.push(PublishedPort {
            internal,
            external,
            protocol,
            address: host_address(&binding.host_ip),
        });
    }

    published.sort_by_key(|p| p.internal);
    Ok(published)
}

/// Wildcard bind addresses are reachable through loopback
fn host_address(host_ip: &str) -> String {
    match host_ip {
        "" | "0.0.0.0" => "127.0.0.1".to_string(),
        "::" => "::1".to_string(),
        other => other.to_string(),
    }
}
