//! Transient command log
//!
//! Holds the output of the most recent command only. The file is truncated
//! before every command and removed once the run succeeds, so whatever is
//! left behind after a failure is the output of the command that failed.
//! The log is readable by its owner only, and output of commands marked
//! [`CommandSpec::redacted`] is never written to it.

use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOG_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct CommandLog {
    path: PathBuf,
}

impl CommandLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with the output of `command`
    pub fn record(&self, command: &CommandSpec, output: Option<&CommandOutput>) -> Result<()> {
        let mut text = format!("$ {}\n", command.display());
        match output {
            Some(output) => {
                if command.redact_output {
                    text.push_str("(output withheld)\n");
                } else {
                    text.push_str(&output.combined());
                }
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                match output.status {
                    Some(code) => text.push_str(&format!("exit code: {}\n", code)),
                    None => text.push_str("terminated by signal\n"),
                }
            }
            None => text.push_str("failed to start\n"),
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(LOG_FILE_MODE)
            .open(&self.path)
            .with_context(|| format!("Failed to open command log {}", self.path.display()))?;
        // A log left by an older run keeps its mode on open
        file.set_permissions(fs::Permissions::from_mode(LOG_FILE_MODE))
            .with_context(|| format!("Failed to restrict command log {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write command log {}", self.path.display()))
    }

    /// Remove the log after a successful run
    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove command log {}", self.path.display())),
        }
    }
}

/// Runner that records every command in a [`CommandLog`] before returning
pub struct LoggedRunner<'a> {
    inner: &'a dyn CommandRunner,
    log: &'a CommandLog,
}

impl<'a> LoggedRunner<'a> {
    pub fn new(inner: &'a dyn CommandRunner, log: &'a CommandLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl CommandRunner for LoggedRunner<'_> {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", command.display());
        let result = self.inner.run(command).await;

        if let Err(e) = self.log.record(command, result.as_ref().ok()) {
            debug!("{:#}", e);
        }

        result
    }
}
