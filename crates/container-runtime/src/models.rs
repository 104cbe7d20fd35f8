//! Data types shared by every runtime implementation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Runtime-assigned container identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wrap a raw id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12 character prefix docker shows by default
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Transport protocol of a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Name as used in docker port specs
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// A requested port publication
///
/// `external` of `None` lets the runtime pick a free host port when the
/// container starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port the service listens on inside the container
    pub internal: u16,
    /// Host port to publish on
    pub external: Option<u16>,
    /// Transport protocol
    pub protocol: Protocol,
}

impl PortBinding {
    /// A TCP binding
    pub fn tcp(internal: u16, external: Option<u16>) -> Self {
        Self {
            internal,
            external,
            protocol: Protocol::Tcp,
        }
    }

    /// Render as a `docker run -p` argument
    pub fn publish_spec(&self) -> String {
        match self.external {
            Some(external) => format!("{}:{}/{}", external, self.internal, self.protocol),
            None => format!("{}/{}", self.internal, self.protocol),
        }
    }
}

/// A port the runtime actually published, as observed on a running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    /// Port inside the container
    pub internal: u16,
    /// Port on the host
    pub external: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Host address the port is reachable on from this machine
    pub address: String,
}

/// Everything needed to start one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,
    /// Optional container name
    pub name: Option<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Labels attached to the container
    pub labels: BTreeMap<String, String>,
    /// Ports to publish
    pub ports: Vec<PortBinding>,
}

impl ContainerSpec {
    /// Spec for the given image with nothing else set
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Attach a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Publish a port
    pub fn with_port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }
}

/// Lifecycle state reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Created but never started
    Created,
    /// Running
    Running,
    /// Paused
    Paused,
    /// Restarting
    Restarting,
    /// Being removed
    Removing,
    /// Exited
    Exited,
    /// Dead
    Dead,
    /// Anything else the runtime reports
    Other(String),
}

impl ContainerState {
    /// Parse the `State.Status` string docker reports
    pub fn from_status(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true if the container is running
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A container as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Container id
    pub id: ContainerId,
    /// Image the container was created from
    pub image: String,
    /// Lifecycle state
    pub state: ContainerState,
    /// Published ports, sorted by internal port
    pub ports: Vec<PublishedPort>,
    /// Labels
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    /// The publication of `internal`, if any
    pub fn port(&self, internal: u16) -> Option<&PublishedPort> {
        self.ports.iter().find(|p| p.internal == internal)
    }
}
