//! The container runtime capability.

use async_trait::async_trait;

use crate::{ContainerId, ContainerInfo, ContainerSpec, Result};

/// The operations the harness needs from a container runtime
///
/// Implementations must report a missing container as [`crate::Error::NotFound`]
/// from both [`inspect`](ContainerRuntime::inspect) and
/// [`remove`](ContainerRuntime::remove); callers rely on that to make
/// termination idempotent.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container, returning its id once it is running
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Current state and published ports of a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo>;

    /// Stop and remove a container, whatever state it is in
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// All containers, running or not, carrying `label=value`
    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>>;
}
