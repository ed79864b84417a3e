//! Copy files task executor
//!
//! Places a static file, or a whole directory tree, from the role's `files/`
//! directory at the destination.
//!
//! # Examples
//!
//! ## Copy a file
//!
//! **YAML Format:**
//! ```yaml
//! - type: copy
//!   src: bashrc
//!   dest: ~/.bashrc
//!   mode: "0644"
//! ```
//!
//! ## Copy a directory tree
//!
//! **YAML Format:**
//! ```yaml
//! - type: copy
//!   src: nvim/
//!   dest: ~/.config/nvim
//! ```

use crate::apply::file_attrs::{ensure_file, FileAttrs};
use crate::apply::{TaskContext, TaskOutcome};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Copy files task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CopyTask {
    /// Source path, relative to the role's `files/` directory
    pub src: String,
    /// Destination path; `~/` expands to the target user's home
    pub dest: String,
    /// Octal mode for written files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Execute a copy task
pub async fn execute_copy_task(task: &CopyTask, ctx: &TaskContext<'_>) -> Result<TaskOutcome> {
    let src = ctx.role_source("files", &task.src)?;
    let dest = ctx.render_path(&task.dest)?;
    let attrs = FileAttrs::resolve(
        task.mode.as_deref(),
        ctx.render_opt(task.owner.as_deref())?.as_deref(),
        ctx.render_opt(task.group.as_deref())?.as_deref(),
        ctx.identity,
    )?;

    if !src.exists() {
        return Err(anyhow::anyhow!(
            "Source file does not exist: {}",
            src.display()
        ));
    }

    if src.is_dir() {
        copy_tree(&src, &dest, &attrs, ctx.dry_run)
    } else {
        let content =
            fs::read(&src).with_context(|| format!("Failed to read {}", src.display()))?;
        ensure_file(&dest, &content, &attrs, ctx.dry_run)
    }
}

/// Copy every file below `src` to the same relative path below `dest`
fn copy_tree(src: &Path, dest: &Path, attrs: &FileAttrs, dry_run: bool) -> Result<TaskOutcome> {
    let mut outcome = TaskOutcome::Ok;

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to walk directory {}", src.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Failed to relativize {}", entry.path().display()))?;
        let content = fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        if ensure_file(&dest.join(relative), &content, attrs, dry_run)? == TaskOutcome::Changed {
            outcome = TaskOutcome::Changed;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::testing::Fixture;
    use tempfile::tempdir;

    fn copy_task(src: &str, dest: &str) -> CopyTask {
        CopyTask {
            src: src.to_string(),
            dest: dest.to_string(),
            mode: None,
            owner: None,
            group: None,
        }
    }

    #[tokio::test]
    async fn test_copy_file_into_home() {
        let home = tempdir().unwrap();
        let role = tempdir().unwrap();
        fs::create_dir_all(role.path().join("files")).unwrap();
        fs::write(role.path().join("files/bashrc"), "export PS1='$ '\n").unwrap();

        let fixture = Fixture::new(home.path(), role.path());
        let task = copy_task("bashrc", "~/.bashrc");

        let first = execute_copy_task(&task, &fixture.context(false)).await.unwrap();
        assert_eq!(first, TaskOutcome::Changed);
        assert_eq!(
            fs::read_to_string(home.path().join(".bashrc")).unwrap(),
            "export PS1='$ '\n"
        );

        let second = execute_copy_task(&task, &fixture.context(false)).await.unwrap();
        assert_eq!(second, TaskOutcome::Ok);
    }

    #[tokio::test]
    async fn test_copy_file_dry_run() {
        let home = tempdir().unwrap();
        let role = tempdir().unwrap();
        fs::create_dir_all(role.path().join("files")).unwrap();
        fs::write(role.path().join("files/inputrc"), "set editing-mode vi\n").unwrap();

        let fixture = Fixture::new(home.path(), role.path());
        let outcome = execute_copy_task(&copy_task("inputrc", "~/.inputrc"), &fixture.context(true))
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Changed);
        assert!(!home.path().join(".inputrc").exists());
    }

    #[tokio::test]
    async fn test_copy_directory_tree() {
        let home = tempdir().unwrap();
        let role = tempdir().unwrap();
        let files = role.path().join("files/nvim");
        fs::create_dir_all(files.join("lua")).unwrap();
        fs::write(files.join("init.lua"), "require('plugins')\n").unwrap();
        fs::write(files.join("lua/plugins.lua"), "return {}\n").unwrap();

        let fixture = Fixture::new(home.path(), role.path());
        let task = copy_task("nvim", "~/.config/nvim");

        let first = execute_copy_task(&task, &fixture.context(false)).await.unwrap();
        assert_eq!(first, TaskOutcome::Changed);
        assert_eq!(
            fs::read_to_string(home.path().join(".config/nvim/lua/plugins.lua")).unwrap(),
            "return {}\n"
        );

        let second = execute_copy_task(&task, &fixture.context(false)).await.unwrap();
        assert_eq!(second, TaskOutcome::Ok);
    }

    #[tokio::test]
    async fn test_copy_renders_dest() {
        let home = tempdir().unwrap();
        let role = tempdir().unwrap();
        fs::create_dir_all(role.path().join("files")).unwrap();
        fs::write(role.path().join("files/config"), "x").unwrap();

        let mut fixture = Fixture::new(home.path(), role.path());
        fixture
            .vars
            .set("app".to_string(), serde_yaml::Value::String("kitty".to_string()));

        execute_copy_task(
            &copy_task("config", "~/.config/{{ app }}/kitty.conf"),
            &fixture.context(false),
        )
        .await
        .unwrap();
        assert!(home.path().join(".config/kitty/kitty.conf").exists());
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let home = tempdir().unwrap();
        let role = tempdir().unwrap();
        let fixture = Fixture::new(home.path(), role.path());

        let result =
            execute_copy_task(&copy_task("nope", "~/.nope"), &fixture.context(false)).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Source file does not exist"));
    }
}
