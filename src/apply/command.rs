//! Command execution task executor
//!
//! Commands are the escape hatch for operations without a declarative task.
//! Idempotency comes from the task definition: `creates` skips the command
//! once a marker path exists, and `changed: false` declares a read-only
//! command that never reports a change.
//!
//! # Examples
//!
//! ## Run once
//!
//! **YAML Format:**
//! ```yaml
//! - type: command
//!   command: curl -fsSL https://sh.rustup.rs | sh -s -- -y
//!   creates: ~/.cargo/bin/rustup
//! ```
//!
//! ## Read-only command
//!
//! **YAML Format:**
//! ```yaml
//! - type: command
//!   command: fc-cache -f
//!   changed: false
//! ```
//!
//! ## Without a shell
//!
//! **YAML Format:**
//! ```yaml
//! - type: command
//!   command: git config --global init.defaultBranch main
//!   shell: false
//!   cwd: ~/
//!   env:
//!     GIT_CONFIG_NOSYSTEM: "1"
//! ```

use crate::apply::{TaskContext, TaskOutcome};
use crate::process::CommandSpec;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Command execution task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommandTask {
    /// Command to execute
    pub command: String,
    /// Skip the command when this path exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creates: Option<String>,
    /// Whether a successful run counts as a change (default: true)
    #[serde(default = "crate::apply::default_true")]
    pub changed: bool,
    /// Working directory for command execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Environment variables
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub env: HashMap<String, String>,
    /// Run through `sh -c` (default: true)
    #[serde(default = "crate::apply::default_true")]
    pub shell: bool,
    /// Expected exit code (default: 0)
    #[serde(default)]
    pub exit_code: i32,
}

/// Execute a command task
pub async fn execute_command_task(task: &CommandTask, ctx: &TaskContext<'_>) -> Result<TaskOutcome> {
    let command_line = ctx.render(&task.command)?;

    if let Some(creates) = &task.creates {
        let marker = ctx.render_path(creates)?;
        if marker.exists() {
            debug!(
                "Skipping command, {} already exists: {}",
                marker.display(),
                command_line
            );
            return Ok(TaskOutcome::Ok);
        }
    }

    let mut command = if task.shell {
        CommandSpec::shell(&command_line)
    } else {
        CommandSpec::parse(&command_line)?
    };
    match &task.cwd {
        Some(cwd) => command = command.cwd(ctx.render_path(cwd)?),
        None => command = command.cwd(ctx.identity.home.clone()),
    }
    for (key, value) in &task.env {
        command = command.env(key.clone(), ctx.render(value)?);
    }

    let outcome = if task.changed {
        TaskOutcome::Changed
    } else {
        TaskOutcome::Ok
    };

    if ctx.dry_run {
        info!("Would run command: {}", command_line);
        return Ok(outcome);
    }

    let output = ctx
        .runner
        .run(&command)
        .await
        .with_context(|| format!("Failed to execute command: {}", command_line))?;

    let exit_code = output.status.unwrap_or(-1);
    if exit_code != task.exit_code {
        return Err(anyhow::anyhow!(
            "Command exited with code {} (expected {}): {}\n{}",
            exit_code,
            task.exit_code,
            command_line,
            output.combined().trim_end()
        ));
    }

    debug!("Command output: {}", output.combined().trim_end());
    info!("Executed command: {}", command_line);
    Ok(outcome)
}
