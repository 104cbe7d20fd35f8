//! In-memory runtime for tests.
//!
//! Behaves like a docker daemon that never runs anything: containers are
//! records, published ports are bookkeeping. Host port conflicts are rejected
//! the same way docker rejects them.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::{
    ContainerId, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, Error,
    PublishedPort, Result,
};

/// First port handed out for bindings without an explicit host port
const FIRST_DYNAMIC_PORT: u16 = 49152;

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<ContainerId, ContainerInfo>,
    started: Vec<ContainerSpec>,
    remove_calls: usize,
    next_id: u64,
    next_port: u16,
}

/// A [`ContainerRuntime`] that keeps containers in memory
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    /// Host port to publish an internal port on, regardless of the request
    overrides: BTreeMap<u16, u16>,
    /// Reject every start with this reason
    reject_starts: Option<String>,
}

impl FakeRuntime {
    /// An empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Always publish `internal` on host port `external`, ignoring the request
    ///
    /// Models a runtime that publishes somewhere other than what was asked,
    /// and lets tests point a "container" at a local listener.
    pub fn publish_as(mut self, internal: u16, external: u16) -> Self {
        self.overrides.insert(internal, external);
        self
    }

    /// Make every start fail with `reason`
    pub fn reject_starts(mut self, reason: impl Into<String>) -> Self {
        self.reject_starts = Some(reason.into());
        self
    }

    /// Specs of every successful start, in order
    pub fn started(&self) -> Vec<ContainerSpec> {
        self.lock().started.clone()
    }

    /// How many times `remove` has been called, successful or not
    pub fn remove_calls(&self) -> usize {
        self.lock().remove_calls
    }

    /// Ids of containers that currently exist
    pub fn containers(&self) -> Vec<ContainerId> {
        self.lock().containers.keys().cloned().collect()
    }

    /// Remove a container behind the caller's back
    pub fn remove_out_of_band(&self, id: &ContainerId) {
        self.lock().containers.remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake runtime state poisoned")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        if let Some(reason) = &self.reject_starts {
            return Err(Error::Rejected(reason.clone()));
        }

        let mut state = self.lock();

        let mut in_use: BTreeSet<u16> = state
            .containers
            .values()
            .flat_map(|c| c.ports.iter().map(|p| p.external))
            .collect();

        let mut ports = Vec::with_capacity(spec.ports.len());
        for binding in &spec.ports {
            let external = match self.overrides.get(&binding.internal) {
                Some(port) => *port,
                None => match binding.external {
                    Some(port) => port,
                    None => {
                        if state.next_port == 0 {
                            state.next_port = FIRST_DYNAMIC_PORT;
                        }
                        while in_use.contains(&state.next_port) {
                            state.next_port += 1;
                        }
                        state.next_port
                    }
                },
            };

            if !in_use.insert(external) {
                return Err(Error::Rejected(format!(
                    "Bind for 0.0.0.0:{} failed: port is already allocated",
                    external
                )));
            }

            ports.push(PublishedPort {
                internal: binding.internal,
                external,
                protocol: binding.protocol,
                address: "127.0.0.1".to_string(),
            });
        }
        ports.sort_by_key(|p| p.internal);

        state.next_id += 1;
        let id = ContainerId::new(format!("{:064x}", state.next_id));
        state.containers.insert(
            id.clone(),
            ContainerInfo {
                id: id.clone(),
                image: spec.image.clone(),
                state: ContainerState::Running,
                ports,
                labels: spec.labels.clone(),
            },
        );
        state.started.push(spec.clone());

        Ok(id)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo> {
        self.lock()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                id: id.to_string(),
            })
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.lock();
        state.remove_calls += 1;
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                id: id.to_string(),
            }),
        }
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|c| c.labels.get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }
}
