//! Directory management task executor
//!
//! # Examples
//!
//! **YAML Format:**
//! ```yaml
//! - type: directory
//!   path: ~/.ssh
//!   mode: "0700"
//! ```

use crate::apply::file_attrs::FileAttrs;
use crate::apply::{TaskContext, TaskOutcome};
use anyhow::{Context, Result};
use tracing::info;

/// Directory management task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DirectoryTask {
    /// Directory path
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Execute a directory task
pub async fn execute_directory_task(
    task: &DirectoryTask,
    ctx: &TaskContext<'_>,
) -> Result<TaskOutcome> {
    let path = ctx.render_path(&task.path)?;
    let attrs = FileAttrs::resolve(
        task.mode.as_deref(),
        ctx.render_opt(task.owner.as_deref())?.as_deref(),
        ctx.render_opt(task.group.as_deref())?.as_deref(),
        ctx.identity,
    )?;

    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow::anyhow!(
                "Path exists but is not a directory: {}",
                path.display()
            ));
        }
        if !attrs.differ(&path)? {
            return Ok(TaskOutcome::Ok);
        }
        if ctx.dry_run {
            info!("Would update attributes of {}", path.display());
        } else {
            attrs.apply(&path)?;
            info!("Updated attributes of {}", path.display());
        }
        return Ok(TaskOutcome::Changed);
    }

    if ctx.dry_run {
        info!("Would create directory {}", path.display());
    } else {
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        attrs.apply(&path)?;
        info!("Created directory {}", path.display());
    }

    Ok(TaskOutcome::Changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::testing::Fixture;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn directory_task(path: &str, mode: Option<&str>) -> DirectoryTask {
        DirectoryTask {
            path: path.to_string(),
            mode: mode.map(str::to_string),
            owner: None,
            group: None,
        }
    }

    #[tokio::test]
    async fn test_create_directory_with_mode() {
        let home = tempdir().unwrap();
        let fixture = Fixture::new(home.path(), home.path());
        let task = directory_task("~/.ssh", Some("0700"));

        let first = execute_directory_task(&task, &fixture.context(false))
            .await
            .unwrap();
        assert_eq!(first, TaskOutcome::Changed);

        let ssh = home.path().join(".ssh");
        assert!(ssh.is_dir());
        assert_eq!(fs::metadata(&ssh).unwrap().permissions().mode() & 0o7777, 0o700);

        let second = execute_directory_task(&task, &fixture.context(false))
            .await
            .unwrap();
        assert_eq!(second, TaskOutcome::Ok);
    }

    #[tokio::test]
    async fn test_directory_dry_run() {
        let home = tempdir().unwrap();
        let fixture = Fixture::new(home.path(), home.path());

        let outcome = execute_directory_task(&directory_task("~/projects", None), &fixture.context(true))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Changed);
        assert!(!home.path().join("projects").exists());
    }

    #[tokio::test]
    async fn test_directory_over_file_fails() {
        let home = tempdir().unwrap();
        fs::write(home.path().join("projects"), "").unwrap();
        let fixture = Fixture::new(home.path(), home.path());

        let result =
            execute_directory_task(&directory_task("~/projects", None), &fixture.context(false)).await;
        assert!(result.is_err());
    }
}
