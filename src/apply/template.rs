//! Template rendering task executor
//!
//! Renders a file from the role's `templates/` directory against the merged
//! variable context (role defaults, playbook vars, facts, extra vars) and
//! writes it with the same idempotency rules as `copy`.
//!
//! # Examples
//!
//! **YAML Format:**
//! ```yaml
//! - type: template
//!   src: gitconfig.j2
//!   dest: ~/.gitconfig
//!   mode: "0644"
//! ```
//!
//! With `templates/gitconfig.j2`:
//! ```text
//! [user]
//!     name = {{ git_name }}
//!     email = {{ git_email }}
//! {% if distribution == "arch" %}
//! [credential]
//!     helper = /usr/lib/git-core/git-credential-libsecret
//! {% endif %}
//! ```

use crate::apply::file_attrs::{ensure_file, FileAttrs};
use crate::apply::{TaskContext, TaskOutcome};
use anyhow::{Context, Result};

/// Template rendering task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TemplateTask {
    /// Template path, relative to the role's `templates/` directory
    pub src: String,
    /// Destination path
    pub dest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Execute a template task
pub async fn execute_template_task(
    task: &TemplateTask,
    ctx: &TaskContext<'_>,
) -> Result<TaskOutcome> {
    let src = ctx.role_source("templates", &task.src)?;
    let dest = ctx.render_path(&task.dest)?;

    let template = tokio::fs::read_to_string(&src)
        .await
        .with_context(|| format!("Failed to read template {}", src.display()))?;
    let rendered = ctx
        .vars
        .render(&template)
        .with_context(|| format!("Failed to render template {}", src.display()))?;

    let attrs = FileAttrs::resolve(
        task.mode.as_deref(),
        ctx.render_opt(task.owner.as_deref())?.as_deref(),
        ctx.render_opt(task.group.as_deref())?.as_deref(),
        ctx.identity,
    )?;

    ensure_file(&dest, rendered.as_bytes(), &attrs, ctx.dry_run)
}
