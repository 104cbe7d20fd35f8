//! One service instance from start to teardown.

use container_runtime::{ContainerRuntime, DockerCli};
use tracing::{info, warn};

use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result, SetupStage};
use crate::orchestrator::{Instance, Orchestrator};
use crate::setup::{Bootstrap, HttpConnector, SetupSequencer, SshConnector};
use crate::spec::ServiceSpec;

/// A started, ready and bootstrapped service
///
/// ```no_run
/// # async fn demo() -> gerrit_harness::Result<()> {
/// use gerrit_harness::{Config, Harness, RunContext};
///
/// let harness = Harness::start(Config::default(), &RunContext::new()).await?;
/// println!("{}", harness.spec().url);
/// harness.destroy().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Harness<R = DockerCli> {
    orchestrator: Orchestrator<R>,
    config: Config,
    instance: Instance,
    bootstrap: Bootstrap,
}

impl Harness<DockerCli> {
    /// Start a service on the local docker daemon and bootstrap it
    pub async fn start(config: Config, ctx: &RunContext) -> Result<Self> {
        Self::start_with(
            Orchestrator::new(DockerCli::new()),
            &SetupSequencer::new(),
            config,
            ctx,
        )
        .await
    }
}

impl<R: ContainerRuntime> Harness<R> {
    /// Start and bootstrap with a specific runtime and set of clients
    ///
    /// If a setup stage fails and `cleanup_on_failure` is set, the container
    /// is removed before the setup error is returned.
    pub async fn start_with<H: HttpConnector, S: SshConnector>(
        orchestrator: Orchestrator<R>,
        sequencer: &SetupSequencer<H, S>,
        config: Config,
        ctx: &RunContext,
    ) -> Result<Self> {
        let instance = orchestrator.start(&config, ctx).await?;

        let bootstrap = match sequencer.run(&instance, &config).await {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                if config.cleanup_on_failure {
                    if let Err(cleanup) = orchestrator.terminate(&instance).await {
                        warn!(
                            container = %instance.id.short(),
                            error = %cleanup,
                            "Failed to remove container after setup failure"
                        );
                    }
                } else {
                    warn!(
                        container = %instance.id.short(),
                        "Setup failed, leaving container running"
                    );
                }
                return Err(e);
            }
        };

        Ok(Self {
            orchestrator,
            config,
            instance,
            bootstrap,
        })
    }

    /// The running container
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Credentials, key and version from setup
    pub fn bootstrap(&self) -> &Bootstrap {
        &self.bootstrap
    }

    /// The configuration the service was started with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The orchestrator managing the container
    pub fn orchestrator(&self) -> &Orchestrator<R> {
        &self.orchestrator
    }

    /// Connection details for tests
    pub fn spec(&self) -> ServiceSpec {
        ServiceSpec::new(&self.instance, &self.bootstrap)
    }

    /// Remove the container and any generated key
    ///
    /// Every step runs even if an earlier one failed; all failures are
    /// returned together.
    pub async fn destroy(self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.orchestrator.terminate(&self.instance).await {
            errors.push(e);
        }
        if let Err(e) = self.bootstrap.key.remove() {
            errors.push(Error::setup(SetupStage::Key, e));
        }

        if errors.is_empty() {
            info!(container = %self.instance.id.short(), "Destroyed");
            Ok(())
        } else {
            Err(Error::Teardown(errors))
        }
    }
}
