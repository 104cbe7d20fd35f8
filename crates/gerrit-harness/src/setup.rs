//! Bootstrap of a ready instance.
//!
//! Stages run in a fixed order, each depending on the previous one:
//!
//! 1. [`SetupStage::Key`]: load the configured private key or generate one
//! 2. [`SetupStage::Account`]: create the admin account and upload the key
//! 3. [`SetupStage::HttpClient`]: log in and settle the HTTP password
//! 4. [`SetupStage::SshClient`]: prove the key works over SSH
//!
//! The first failure stops the sequence. A key generated in stage 1 is
//! deleted again before the error is returned; the container is left alone.

use async_trait::async_trait;
use command_runner::CommandOutput;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, HttpError, Result, SshError};
use crate::http::HttpClientConnector;
use crate::keys::KeyMaterial;
use crate::orchestrator::{Endpoint, Instance};
use crate::ssh::{SshClientConnector, parse_version};

pub use crate::error::SetupStage;

/// Account operations performed over HTTP
#[async_trait]
pub trait AccountApi: Send {
    /// Create the account the client acts as and return its login
    async fn create_account(&mut self) -> std::result::Result<String, HttpError>;

    /// Establish a session as the account
    async fn login(&mut self) -> std::result::Result<(), HttpError>;

    /// Add an SSH public key to the account
    async fn insert_public_key(&mut self, public_key: &str) -> std::result::Result<(), HttpError>;

    /// Set the HTTP password
    async fn set_password(&mut self, password: &str) -> std::result::Result<(), HttpError>;

    /// Ask the service for a fresh HTTP password
    async fn generate_password(&mut self) -> std::result::Result<String, HttpError>;
}

/// Creates [`AccountApi`] clients
pub trait HttpConnector: Send + Sync {
    /// Client type produced
    type Api: AccountApi;

    /// Client for `username` at `endpoint`
    fn connect(
        &self,
        endpoint: &Endpoint,
        username: &str,
    ) -> std::result::Result<Self::Api, HttpError>;
}

/// An authenticated SSH session
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Run a command, failing unless it exits successfully
    async fn run(&self, command: &str) -> std::result::Result<CommandOutput, SshError>;

    /// The service version reported by `gerrit version`
    async fn version(&self) -> std::result::Result<String, SshError> {
        let output = self.run("gerrit version").await?;
        parse_version(&output.stdout)
    }

    /// End the session
    async fn close(self) -> std::result::Result<(), SshError>
    where
        Self: Sized;
}

/// Opens [`SshSession`]s
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Session type produced
    type Session: SshSession;

    /// Connect as `username` authenticating with `key`
    async fn connect(
        &self,
        endpoint: &Endpoint,
        username: &str,
        key: &KeyMaterial,
    ) -> std::result::Result<Self::Session, SshError>;
}

/// Credentials of the account the harness set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapIdentity {
    /// Login name
    pub login: String,
    /// HTTP password
    pub password: String,
    /// Private key registered with the account
    pub private_key: PathBuf,
}

/// Everything produced by a successful setup
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// Account credentials
    pub identity: BootstrapIdentity,
    /// The key pair in use; owns the files if it was generated
    pub key: KeyMaterial,
    /// Version reported by the service
    pub version: String,
}

/// Runs the setup stages against a ready instance
#[derive(Debug, Clone, Default)]
pub struct SetupSequencer<H = HttpClientConnector, S = SshClientConnector> {
    http: H,
    ssh: S,
    key_dir: Option<PathBuf>,
}

impl SetupSequencer {
    /// Sequencer using the real HTTP and SSH clients
    pub fn new() -> Self {
        Self::default()
    }
}

impl<H: HttpConnector, S: SshConnector> SetupSequencer<H, S> {
    /// Sequencer using the given client factories
    pub fn with_connectors(http: H, ssh: S) -> Self {
        Self {
            http,
            ssh,
            key_dir: None,
        }
    }

    /// Generate keys in `dir` instead of the system temp directory
    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    /// Run every stage in order, stopping at the first failure
    pub async fn run(&self, instance: &Instance, config: &Config) -> Result<Bootstrap> {
        let started = Instant::now();

        let key = self.key_stage(config).await?;
        match self.remaining_stages(instance, config, &key).await {
            Ok((identity, version)) => {
                info!(
                    container = %instance.id.short(),
                    login = %identity.login,
                    %version,
                    elapsed = ?started.elapsed(),
                    "Setup complete"
                );
                Ok(Bootstrap {
                    identity,
                    key,
                    version,
                })
            }
            Err(e) => {
                if let Err(cleanup) = key.remove() {
                    warn!(key = %key, error = %cleanup, "Failed to remove generated key");
                }
                Err(e)
            }
        }
    }

    async fn key_stage(&self, config: &Config) -> Result<KeyMaterial> {
        let stage = SetupStage::Key;
        begin(stage);
        let key = match &config.private_key_path {
            Some(path) => KeyMaterial::load(path).await,
            None => match &self.key_dir {
                Some(dir) => KeyMaterial::generate_in(dir).await,
                None => KeyMaterial::generate().await,
            },
        }
        .map_err(|e| Error::setup(stage, e))?;
        debug!(phase = "setup", task = %stage, %key, "end");
        Ok(key)
    }

    async fn remaining_stages(
        &self,
        instance: &Instance,
        config: &Config,
        key: &KeyMaterial,
    ) -> Result<(BootstrapIdentity, String)> {
        let http_endpoint = instance.http_endpoint();

        // The client belongs to the first stage that uses it
        let connect_stage = if config.create_admin {
            SetupStage::Account
        } else {
            SetupStage::HttpClient
        };
        let mut api = self
            .http
            .connect(&http_endpoint, &config.username)
            .map_err(|e| Error::setup(connect_stage, e))?;

        let stage = SetupStage::Account;
        let login = if config.create_admin {
            begin(stage);
            let login = api
                .create_account()
                .await
                .map_err(|e| Error::setup(stage, e))?;
            api.insert_public_key(&key.public_key)
                .await
                .map_err(|e| Error::setup(stage, e))?;
            debug!(phase = "setup", task = %stage, %login, "end");
            login
        } else {
            debug!(phase = "setup", task = %stage, "skipped");
            config.username.clone()
        };

        let stage = SetupStage::HttpClient;
        begin(stage);
        api.login().await.map_err(|e| Error::setup(stage, e))?;
        let password = match &config.password {
            Some(password) => {
                api.set_password(password)
                    .await
                    .map_err(|e| Error::setup(stage, e))?;
                password.clone()
            }
            None => api
                .generate_password()
                .await
                .map_err(|e| Error::setup(stage, e))?,
        };
        debug!(phase = "setup", task = %stage, "end");

        let stage = SetupStage::SshClient;
        begin(stage);
        let session = self
            .ssh
            .connect(&instance.ssh_endpoint(), &login, key)
            .await
            .map_err(|e| Error::setup(stage, e))?;
        let version = session.version().await;
        let closed = session.close().await;
        let version = version.map_err(|e| Error::setup(stage, e))?;
        closed.map_err(|e| Error::setup(stage, e))?;
        debug!(phase = "setup", task = %stage, %version, "end");

        Ok((
            BootstrapIdentity {
                login,
                password,
                private_key: key.private_key_path.clone(),
            },
            version,
        ))
    }
}

fn begin(stage: SetupStage) {
    debug!(phase = "setup", task = %stage, "begin");
}
