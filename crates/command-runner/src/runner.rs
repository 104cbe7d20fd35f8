//! Run commands to completion and collect their output

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Everything a finished process printed, plus how it exited
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the process exited successfully
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs commands on the local host
///
/// The name only shows up in log lines so concurrent users can be told apart.
#[derive(Debug, Clone)]
pub struct Runner {
    name: String,
}

impl Runner {
    /// Create a runner identified by `name` in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a command to completion, returning its output whatever the exit status
    pub async fn output(&self, command: &Command) -> Result<CommandOutput> {
        let started = Instant::now();
        debug!(runner = %self.name, command = %command, "running");

        let output = command
            .prepare()
            .output()
            .await
            .map_err(|e| Error::spawn_failed(command.program_name(), e))?;

        let result = CommandOutput {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            runner = %self.name,
            command = %command,
            status = %result.status,
            elapsed = ?started.elapsed(),
            "finished"
        );
        Ok(result)
    }

    /// Run a command and fail with [`Error::NonZeroExit`] unless it succeeded
    pub async fn run(&self, command: &Command) -> Result<CommandOutput> {
        let output = self.output(command).await?;
        if !output.success() {
            let stderr = output.stderr.trim().to_string();
            warn!(
                runner = %self.name,
                command = %command,
                status = %output.status,
                %stderr,
                "command failed"
            );
            return Err(Error::NonZeroExit {
                command: command.to_string(),
                status: output.status,
                stderr,
            });
        }
        Ok(output)
    }
}

/// Locate `program` on `$PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
