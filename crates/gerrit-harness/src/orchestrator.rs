//! Container lifecycle: start, wait for readiness, terminate.

use container_runtime::{
    ContainerId, ContainerInfo, ContainerRuntime, ContainerSpec, PublishedPort,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::ports;
use crate::readiness::{self, ProbeTarget};
use crate::{HTTP_PORT, SSH_PORT};

/// Label put on every container the harness starts
pub const CONTAINER_LABEL: &str = "gerrittest";

/// Value of [`CONTAINER_LABEL`]
pub const CONTAINER_LABEL_VALUE: &str = "1";

/// Environment variable carrying the URL the service advertises
pub const CANONICAL_URL_ENV: &str = "GERRIT_CANONICAL_URL";

/// An address and port reachable from the test process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address
    pub address: String,
    /// Port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// `http://address:port`, without a trailing slash
    pub fn http_url(&self) -> String {
        format!("http://{}", self)
    }

    fn from_published(port: &PublishedPort) -> Self {
        Self::new(port.address.clone(), port.external)
    }

    /// The HTTP endpoint uses `localhost` instead of `127.0.0.1` so cookies
    /// the service sets are scoped to the host name clients send
    fn for_http(port: &PublishedPort) -> Self {
        let address = match port.address.as_str() {
            "127.0.0.1" => "localhost".to_string(),
            other => other.to_string(),
        };
        Self::new(address, port.external)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// A started container whose every readiness probe succeeded
#[derive(Debug, Clone)]
pub struct Instance {
    /// Container id
    pub id: ContainerId,
    /// Image it runs
    pub image: String,
    /// Published HTTP port
    pub http: PublishedPort,
    /// Published SSH port
    pub ssh: PublishedPort,
    context: RunContext,
}

impl Instance {
    /// Where to reach the HTTP listener
    pub fn http_endpoint(&self) -> Endpoint {
        Endpoint::for_http(&self.http)
    }

    /// Where to reach the SSH listener
    pub fn ssh_endpoint(&self) -> Endpoint {
        Endpoint::from_published(&self.ssh)
    }

    /// Base URL of the service
    pub fn url(&self) -> String {
        self.http_endpoint().http_url()
    }

    /// The context the instance was started under
    pub fn context(&self) -> &RunContext {
        &self.context
    }
}

/// Lifecycle phase of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has happened yet
    Unstarted,
    /// Resolving ports and starting the container
    Starting,
    /// Waiting for the probes
    ProbingReady,
    /// Every probe succeeded
    Ready,
    /// Start or readiness failed
    Failed,
    /// The container was removed after a failure
    Terminated,
}

impl Phase {
    /// Whether `self -> next` is a legal transition
    ///
    /// There is no way back from `Ready`, `Failed` or `Terminated` to an
    /// earlier phase; a new run needs a new start.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Unstarted, Starting)
                | (Starting, ProbingReady)
                | (Starting, Failed)
                | (ProbingReady, Ready)
                | (ProbingReady, Failed)
                | (Failed, Terminated)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unstarted => "unstarted",
            Phase::Starting => "starting",
            Phase::ProbingReady => "probing-ready",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the phase of a single start
struct Lifecycle {
    phase: Phase,
    started: Instant,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            phase: Phase::Unstarted,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, elapsed = ?self.started.elapsed(), "phase");
        self.phase = next;
    }
}

/// Starts and stops service containers through a [`ContainerRuntime`]
#[derive(Debug)]
pub struct Orchestrator<R> {
    runtime: Arc<R>,
}

impl<R> Clone for Orchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<R: ContainerRuntime> Orchestrator<R> {
    /// Orchestrate containers on `runtime`
    pub fn new(runtime: R) -> Self {
        Self::from_arc(Arc::new(runtime))
    }

    /// Share a runtime with other users
    pub fn from_arc(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// The runtime in use
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Start a container for `config` and wait until it is reachable
    ///
    /// Readiness is bounded by `ctx` and by the config's start timeout. If any
    /// probe fails the container is removed before returning, so an error
    /// from here never leaves a container behind. A container that fails to
    /// start at all is not touched.
    pub async fn start(&self, config: &Config, ctx: &RunContext) -> Result<Instance> {
        config.validate()?;
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(Phase::Starting);

        let bindings = ports::bindings(config)?;
        let spec = container_spec(config, &bindings);

        let id = self
            .runtime
            .create_and_start(&spec)
            .await
            .map_err(Error::ContainerStart)?;
        info!(container = %id.short(), image = %spec.image, "Container started");

        let (http, ssh) = match self.published_ports(&id).await {
            Ok(ports) => ports,
            Err(e) => {
                lifecycle.advance(Phase::Failed);
                self.rollback(&id).await;
                lifecycle.advance(Phase::Terminated);
                return Err(e);
            }
        };

        lifecycle.advance(Phase::ProbingReady);
        let probe_ctx = ctx.child_with_timeout(config.start_timeout());
        let targets = vec![
            ProbeTarget::tcp(Endpoint::from_published(&ssh)),
            ProbeTarget::http(Endpoint::from_published(&http)),
        ];

        if let Err(mut err) = readiness::wait_ready(&probe_ctx, targets).await {
            lifecycle.advance(Phase::Failed);
            warn!(container = %id.short(), error = %err, "Container did not become ready");
            if let Err(rollback) = self.remove(&id).await {
                warn!(container = %id.short(), error = %rollback, "Rollback failed");
                err.rollback = Some(rollback);
            }
            lifecycle.advance(Phase::Terminated);
            return Err(Error::Readiness(err));
        }

        lifecycle.advance(Phase::Ready);
        info!(
            container = %id.short(),
            http = http.external,
            ssh = ssh.external,
            elapsed = ?lifecycle.started.elapsed(),
            "Container ready"
        );

        Ok(Instance {
            id,
            image: spec.image,
            http,
            ssh,
            context: ctx.clone(),
        })
    }

    /// Remove the instance's container
    ///
    /// Removing a container that is already gone succeeds.
    pub async fn terminate(&self, instance: &Instance) -> Result<()> {
        self.terminate_id(&instance.id).await
    }

    /// Remove a container by id; already gone counts as success
    pub async fn terminate_id(&self, id: &ContainerId) -> Result<()> {
        self.remove(id).await.map_err(Error::Runtime)
    }

    /// Every container carrying the harness label
    pub async fn containers(&self) -> Result<Vec<ContainerInfo>> {
        self.runtime
            .list(CONTAINER_LABEL, CONTAINER_LABEL_VALUE)
            .await
            .map_err(Error::Runtime)
    }

    async fn remove(&self, id: &ContainerId) -> container_runtime::Result<()> {
        match self.runtime.remove(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(container = %id.short(), "Container already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort removal when there is already an error to report
    async fn rollback(&self, id: &ContainerId) {
        if let Err(e) = self.remove(id).await {
            warn!(container = %id.short(), error = %e, "Rollback failed");
        }
    }

    /// Read back which host ports the runtime actually published
    async fn published_ports(&self, id: &ContainerId) -> Result<(PublishedPort, PublishedPort)> {
        let info = self.runtime.inspect(id).await.map_err(Error::Runtime)?;
        let find = |internal: u16| {
            info.port(internal)
                .cloned()
                .ok_or_else(|| Error::PublishedPortsMissing {
                    container: id.to_string(),
                    port: internal,
                })
        };
        Ok((find(HTTP_PORT)?, find(SSH_PORT)?))
    }
}

fn container_spec(config: &Config, bindings: &[container_runtime::PortBinding]) -> ContainerSpec {
    let mut spec = ContainerSpec::new(config.image())
        .with_label(CONTAINER_LABEL, CONTAINER_LABEL_VALUE);

    if let Some(http) = bindings
        .iter()
        .find(|b| b.internal == HTTP_PORT)
        .and_then(|b| b.external)
    {
        spec = spec.with_env(CANONICAL_URL_ENV, format!("http://127.0.0.1:{}/", http));
    }

    bindings
        .iter()
        .fold(spec, |spec, binding| spec.with_port(*binding))
}
