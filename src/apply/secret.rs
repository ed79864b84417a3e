//! Secret injection task executor
//!
//! Passes a template holding secrets-CLI placeholders through the CLI's
//! inject command and writes the resolved output readable by the owner only.
//! The template is not rendered with minijinja: its placeholders belong to
//! the secrets CLI.
//!
//! # Examples
//!
//! **YAML Format:**
//! ```yaml
//! - type: secret
//!   src: netrc.tpl
//!   dest: ~/.netrc
//!   when: secrets_authenticated
//! ```
//!
//! With `templates/netrc.tpl`:
//! ```text
//! machine api.github.com
//!   login {{ op://Personal/GitHub/username }}
//!   password {{ op://Personal/GitHub/token }}
//! ```

use crate::apply::file_attrs::{ensure_file, parse_mode, FileAttrs};
use crate::apply::{TaskContext, TaskOutcome};
use crate::process::{run_checked, CommandSpec};
use anyhow::{Context, Result};

/// Mode of injected files unless the task sets a stricter one
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Secret injection task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SecretTask {
    /// Template path, relative to the role's `templates/` directory
    pub src: String,
    /// Destination path
    pub dest: String,
    /// Octal mode; may not grant group or other access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Reject modes that would expose a secret beyond its owner
pub fn validate_mode(mode: Option<&str>) -> Result<()> {
    if let Some(mode) = mode {
        let value = parse_mode(mode)?;
        if value & 0o077 != 0 {
            return Err(anyhow::anyhow!(
                "secret mode {} grants access beyond the owner",
                mode
            ));
        }
    }
    Ok(())
}

/// Execute a secret task
pub async fn execute_secret_task(task: &SecretTask, ctx: &TaskContext<'_>) -> Result<TaskOutcome> {
    let src = ctx.role_source("templates", &task.src)?;
    let dest = ctx.render_path(&task.dest)?;

    if !src.is_file() {
        return Err(anyhow::anyhow!(
            "Secret template does not exist: {}",
            src.display()
        ));
    }

    let mut attrs = FileAttrs::resolve(
        task.mode.as_deref(),
        ctx.render_opt(task.owner.as_deref())?.as_deref(),
        ctx.render_opt(task.group.as_deref())?.as_deref(),
        ctx.identity,
    )?;
    attrs.mode = Some(attrs.mode.unwrap_or(SECRET_FILE_MODE));

    // Injection is read-only, so check mode still resolves to compare content
    let command = CommandSpec::new(ctx.secrets.cli.as_str())
        .args(ctx.secrets.inject_args.iter().cloned())
        .arg("--in-file")
        .arg(src.to_string_lossy().to_string())
        .redacted();
    let output = run_checked(ctx.runner, &command)
        .await
        .with_context(|| format!("Failed to inject secrets into {}", dest.display()))?;

    ensure_file(&dest, output.stdout.as_bytes(), &attrs, ctx.dry_run)
}
