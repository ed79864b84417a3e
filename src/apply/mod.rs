//! Role tasks and their execution
//!
//! A role's `tasks/main.yml` is a list of [`TaskSpec`]s: a typed operation
//! plus an optional name, tags and a `when` guard.
//!
//! **YAML Format:**
//! ```yaml
//! - name: Shell configuration
//!   type: copy
//!   src: bashrc
//!   dest: ~/.bashrc
//!   tags: [bash]
//!
//! - name: Git identity
//!   type: template
//!   src: gitconfig.j2
//!   dest: ~/.gitconfig
//!
//! - name: Install rustup toolchain
//!   type: command
//!   command: rustup default stable
//!   creates: ~/.rustup/toolchains
//!   when: distribution == "arch"
//! ```

use crate::config::SecretsConfig;
use crate::facts::Identity;
use crate::process::CommandRunner;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub mod command;
pub mod copy;
pub mod directory;
pub mod executor;
pub mod file_attrs;
pub mod package;
pub mod secret;
pub mod template;
pub mod templating;
pub mod variables;

pub use command::CommandTask;
pub use copy::CopyTask;
pub use directory::DirectoryTask;
pub use executor::{ExecutorOptions, RoleExecutor};
pub use package::{PackageInstaller, PackageManager, PackageTask};
pub use secret::SecretTask;
pub use template::TemplateTask;
pub use variables::VariableContext;

/// Default true value
pub fn default_true() -> bool {
    true
}

/// Tag that selects a task under any tag filter
pub const ALWAYS_TAG: &str = "always";

/// A task as declared in a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Display name used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Selection labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Guard expression over facts and variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    #[serde(flatten)]
    pub task: Task,
}

impl TaskSpec {
    /// Name for log lines, falling back to the task type
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.task.task_type().to_string(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Operations a task can perform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Task {
    /// Static file or directory tree from the role's `files/`
    Copy(CopyTask),
    /// File rendered from the role's `templates/`
    Template(TemplateTask),
    /// File resolved through the secrets CLI
    Secret(SecretTask),
    /// Shell command with `creates`/`changed` idempotency controls
    Command(CommandTask),
    /// Directory with optional mode and ownership
    Directory(DirectoryTask),
    /// Distribution packages
    Package(PackageTask),
}

impl Task {
    /// Get the string representation of the task type
    pub fn task_type(&self) -> &'static str {
        match self {
            Task::Copy(_) => "copy",
            Task::Template(_) => "template",
            Task::Secret(_) => "secret",
            Task::Command(_) => "command",
            Task::Directory(_) => "directory",
            Task::Package(_) => "package",
        }
    }
}

/// Reported result of one task; never used for control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Ok,
    Changed,
    Skipped,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Ok => f.write_str("ok"),
            TaskOutcome::Changed => f.write_str("changed"),
            TaskOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// Recap of a converge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ok: usize,
    pub changed: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Ok => self.ok += 1,
            TaskOutcome::Changed => self.changed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Tasks that ran, skipped ones excluded
    pub fn executed(&self) -> usize {
        self.ok + self.changed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} changed={} skipped={}",
            self.ok, self.changed, self.skipped
        )
    }
}

/// Everything a task needs besides its own definition
pub struct TaskContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub vars: &'a VariableContext,
    pub identity: &'a Identity,
    pub secrets: &'a SecretsConfig,
    pub packages: Option<&'a PackageInstaller>,
    /// Directory of the role the task belongs to
    pub role_dir: &'a Path,
    pub dry_run: bool,
}

impl TaskContext<'_> {
    /// Render a task field through the variable context
    pub fn render(&self, value: &str) -> Result<String> {
        self.vars.render(value)
    }

    /// Render an optional field
    pub fn render_opt(&self, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| self.render(v)).transpose()
    }

    /// Render a target path and expand it against the user's home
    pub fn render_path(&self, value: &str) -> Result<PathBuf> {
        let rendered = self.render(value)?;
        Ok(self.identity.resolve(Path::new(&rendered)))
    }

    /// Render a source path and resolve it inside the role's `subdir`
    pub fn role_source(&self, subdir: &str, value: &str) -> Result<PathBuf> {
        let rendered = self.render(value)?;
        let path = Path::new(&rendered);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.role_dir.join(subdir).join(path))
        }
    }
}

/// Check required fields of a task
pub fn validate_task(spec: &TaskSpec, task_index: usize) -> Result<()> {
    let require = |field: &str, value: &str| -> Result<()> {
        if value.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Task {}: {} {} cannot be empty",
                task_index + 1,
                spec.task.task_type(),
                field
            ));
        }
        Ok(())
    };

    match &spec.task {
        Task::Copy(task) => {
            require("src", &task.src)?;
            require("dest", &task.dest)?;
        }
        Task::Template(task) => {
            require("src", &task.src)?;
            require("dest", &task.dest)?;
        }
        Task::Secret(task) => {
            require("src", &task.src)?;
            require("dest", &task.dest)?;
            secret::validate_mode(task.mode.as_deref()).map_err(|e| {
                anyhow::anyhow!("Task {}: {}", task_index + 1, e)
            })?;
        }
        Task::Command(task) => {
            require("command", &task.command)?;
        }
        Task::Directory(task) => {
            require("path", &task.path)?;
        }
        Task::Package(task) => {
            if task.packages.is_empty() {
                return Err(anyhow::anyhow!(
                    "Task {}: package list cannot be empty",
                    task_index + 1
                ));
            }
            for name in &task.packages {
                require("name", name)?;
            }
        }
    }

    for mode in task_mode(&spec.task).into_iter().flatten() {
        file_attrs::parse_mode(mode)
            .map_err(|e| anyhow::anyhow!("Task {}: {}", task_index + 1, e))?;
    }

    if let Some(condition) = &spec.when {
        variables::validate_condition(condition)
            .map_err(|e| anyhow::anyhow!("Task {}: {:#}", task_index + 1, e))?;
    }

    Ok(())
}

fn task_mode(task: &Task) -> Option<Option<&str>> {
    match task {
        Task::Copy(t) => Some(t.mode.as_deref()),
        Task::Template(t) => Some(t.mode.as_deref()),
        Task::Secret(t) => Some(t.mode.as_deref()),
        Task::Directory(t) => Some(t.mode.as_deref()),
        Task::Command(_) | Task::Package(_) => None,
    }
}

/// Run one task's operation
pub async fn execute_task(task: &Task, ctx: &TaskContext<'_>) -> Result<TaskOutcome> {
    match task {
        Task::Copy(t) => copy::execute_copy_task(t, ctx).await,
        Task::Template(t) => template::execute_template_task(t, ctx).await,
        Task::Secret(t) => secret::execute_secret_task(t, ctx).await,
        Task::Command(t) => command::execute_command_task(t, ctx).await,
        Task::Directory(t) => directory::execute_directory_task(t, ctx).await,
        Task::Package(t) => package::execute_package_task(t, ctx).await,
    }
}
