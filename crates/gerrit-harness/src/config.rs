//! Run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Image used when neither the config nor the environment names one
pub const DEFAULT_IMAGE: &str = "opalmer/gerrittest:2.14.3";

/// Environment variable that overrides [`DEFAULT_IMAGE`]
pub const IMAGE_ENV_VAR: &str = "GERRITTEST_DOCKER_IMAGE";

/// Default bound on container start plus readiness, in milliseconds
pub const DEFAULT_START_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Default administrative login
pub const DEFAULT_USERNAME: &str = "admin";

/// Pick the image to run: explicit value, then `$GERRITTEST_DOCKER_IMAGE`,
/// then [`DEFAULT_IMAGE`]
pub fn resolve_image(explicit: Option<&str>) -> String {
    choose_image(explicit, std::env::var(IMAGE_ENV_VAR).ok().as_deref())
}

fn choose_image(explicit: Option<&str>, from_env: Option<&str>) -> String {
    explicit
        .filter(|s| !s.is_empty())
        .or(from_env.filter(|s| !s.is_empty()))
        .unwrap_or(DEFAULT_IMAGE)
        .to_string()
}

/// Input to one harness run
///
/// Every field has a default, so an empty YAML document is a valid config.
///
/// ```yaml
/// image: opalmer/gerrittest:2.14.3
/// http_port: 8081
/// username: admin
/// start_timeout_ms: 120000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image to run; see [`resolve_image`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Host port for the HTTP listener; `None` picks one automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,

    /// Host port for the SSH listener; `None` lets docker pick one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,

    /// Remove the container when setup fails and on destroy
    pub cleanup_on_failure: bool,

    /// Create the administrative account and upload its key
    pub create_admin: bool,

    /// Login of the administrative account
    pub username: String,

    /// HTTP password to set; generated by the service when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Existing private key; a throwaway key is generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,

    /// Bound on container start plus readiness, in milliseconds
    pub start_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: None,
            http_port: None,
            ssh_port: None,
            cleanup_on_failure: true,
            create_admin: true,
            username: DEFAULT_USERNAME.to_string(),
            password: None,
            private_key_path: None,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Parse from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Check the config is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "start_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".into()));
        }
        if matches!(&self.password, Some(p) if p.is_empty()) {
            return Err(ConfigError::Invalid(
                "password must not be empty when set".into(),
            ));
        }
        Ok(())
    }

    /// The image this config runs
    pub fn image(&self) -> String {
        resolve_image(self.image.as_deref())
    }

    /// Start timeout as a duration
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Set the image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Publish HTTP on a fixed host port
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Publish SSH on a fixed host port
    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = Some(port);
        self
    }

    /// Use an existing private key
    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set the HTTP password instead of generating one
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the start timeout; sub-millisecond remainders round up
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
        self.start_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }
}
