//! SSH key material for the administrative account.

use command_runner::{Command, Runner};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::KeyError;

/// File name prefix of generated private keys
pub const GENERATED_KEY_PREFIX: &str = "gerrittest-id_rsa-";

/// Size of generated RSA keys
pub const GENERATED_KEY_BITS: u32 = 2048;

/// A private key on disk plus its public half
///
/// Keys the harness generated are owned by it and deleted by [`remove`];
/// keys a caller supplied are never touched.
///
/// [`remove`]: KeyMaterial::remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Path to the private key
    pub private_key_path: PathBuf,
    /// Public key as an `authorized_keys` line
    pub public_key: String,
    /// Whether the harness created this key
    pub generated: bool,
}

impl KeyMaterial {
    /// Generate a throwaway RSA key in the system temp directory
    pub async fn generate() -> Result<Self, KeyError> {
        Self::generate_in(&std::env::temp_dir()).await
    }

    /// Generate a throwaway RSA key in `dir`
    pub async fn generate_in(dir: &Path) -> Result<Self, KeyError> {
        let path = dir.join(format!("{}{}", GENERATED_KEY_PREFIX, Uuid::new_v4().simple()));

        let cmd = Command::builder("ssh-keygen")
            .arg("-q")
            .args(["-t", "rsa"])
            .arg("-b")
            .arg(GENERATED_KEY_BITS.to_string())
            .args(["-m", "PEM"])
            .args(["-N", ""])
            .args(["-C", "gerrittest"])
            .arg("-f")
            .arg(&path)
            .build();
        runner().run(&cmd).await?;

        let pub_path = public_key_path(&path);
        let public_key = tokio::fs::read_to_string(&pub_path)
            .await
            .map_err(|source| KeyError::Io {
                path: pub_path.clone(),
                source,
            })?
            .trim()
            .to_string();

        info!(path = %path.display(), "Generated SSH key");
        Ok(Self {
            private_key_path: path,
            public_key,
            generated: true,
        })
    }

    /// Load an existing private key and derive its public half
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        tokio::fs::metadata(path)
            .await
            .map_err(|source| KeyError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        // -P "" fails instead of prompting for encrypted keys
        let cmd = Command::builder("ssh-keygen")
            .arg("-y")
            .args(["-P", ""])
            .arg("-f")
            .arg(path)
            .build();
        let output = runner().output(&cmd).await?;
        let public_key = output.stdout.trim();
        if !output.success() || public_key.is_empty() {
            return Err(KeyError::InvalidKey {
                path: path.to_path_buf(),
                reason: output.stderr.trim().to_string(),
            });
        }

        debug!(path = %path.display(), "Loaded SSH key");
        Ok(Self {
            private_key_path: path.to_path_buf(),
            public_key: public_key.to_string(),
            generated: false,
        })
    }

    /// Path of the `.pub` file next to the private key
    pub fn public_key_path(&self) -> PathBuf {
        public_key_path(&self.private_key_path)
    }

    /// Delete the key files if the harness generated them
    ///
    /// Does nothing for caller-supplied keys. Files that are already gone
    /// are not an error.
    pub fn remove(&self) -> Result<(), KeyError> {
        if !self.generated {
            return Ok(());
        }
        for path in [self.private_key_path.clone(), self.public_key_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed key file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(KeyError::Io { path, source }),
            }
        }
        Ok(())
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyMaterial{{path: {}, generated: {}}}",
            self.private_key_path.display(),
            self.generated
        )
    }
}

fn public_key_path(private: &Path) -> PathBuf {
    let mut name = private.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

fn runner() -> Runner {
    Runner::new("ssh-keygen")
}

#[cfg(test)]
mod tests {
    use super::*;
    use command_runner::find_in_path;

    fn keygen_missing() -> bool {
        let missing = find_in_path("ssh-keygen").is_none();
        if missing {
            eprintln!("Skipping test: ssh-keygen not found in PATH");
        }
        missing
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/tmp/id_rsa")),
            PathBuf::from("/tmp/id_rsa.pub")
        );
    }

    #[test]
    fn test_display() {
        let key = KeyMaterial {
            private_key_path: PathBuf::from("/tmp/k"),
            public_key: "ssh-rsa AAAA".into(),
            generated: true,
        };
        assert_eq!(key.to_string(), "KeyMaterial{path: /tmp/k, generated: true}");
    }

    #[test]
    fn test_remove_leaves_supplied_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "not really a key").unwrap();

        let key = KeyMaterial {
            private_key_path: path.clone(),
            public_key: String::new(),
            generated: false,
        };
        key.remove().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_remove_generated_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        let key = KeyMaterial {
            private_key_path: path,
            public_key: String::new(),
            generated: true,
        };
        key.remove().unwrap();
    }

    #[tokio::test]
    async fn test_generate_load_remove() {
        if keygen_missing() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let generated = KeyMaterial::generate_in(dir.path()).await.unwrap();
        assert!(generated.generated);
        assert!(generated.public_key.starts_with("ssh-rsa "));
        assert!(generated
            .private_key_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(GENERATED_KEY_PREFIX));

        let loaded = KeyMaterial::load(&generated.private_key_path).await.unwrap();
        assert!(!loaded.generated);
        assert_eq!(
            loaded.public_key.split_whitespace().nth(1),
            generated.public_key.split_whitespace().nth(1)
        );

        generated.remove().unwrap();
        assert!(!generated.private_key_path.exists());
        assert!(!generated.public_key_path().exists());
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let err = KeyMaterial::load("/definitely/not/a/key").await.unwrap_err();
        assert!(matches!(err, KeyError::Io { .. }));
    }

    #[tokio::test]
    async fn test_load_garbage_key() {
        if keygen_missing() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "garbage").unwrap();

        let err = KeyMaterial::load(&path).await.unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey { .. }));
    }
}
