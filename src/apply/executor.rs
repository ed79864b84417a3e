//! Role executor
//!
//! Runs the tasks of every selected role in declared order. All selected
//! tasks are validated before the first side effect; after that the first
//! failing task aborts the run.

use crate::apply::{
    execute_task, validate_task, PackageInstaller, RunReport, TaskContext, TaskOutcome,
    VariableContext,
};
use crate::config::SecretsConfig;
use crate::facts::Identity;
use crate::process::CommandRunner;
use crate::roles::{Role, RoleCatalog, RunSelection, TaskScope};
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Runner flags that affect execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Report what would change without touching the host
    pub check: bool,
}

/// Executor for the selected roles
pub struct RoleExecutor<'a> {
    runner: &'a dyn CommandRunner,
    identity: &'a Identity,
    secrets: &'a SecretsConfig,
    packages: Option<&'a PackageInstaller>,
    options: ExecutorOptions,
}

impl<'a> RoleExecutor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        identity: &'a Identity,
        secrets: &'a SecretsConfig,
        packages: Option<&'a PackageInstaller>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            runner,
            identity,
            secrets,
            packages,
            options,
        }
    }

    /// Get the dry_run flag
    pub fn dry_run(&self) -> bool {
        self.options.check
    }

    /// Validate the tasks the selection would run
    pub fn validate(&self, catalog: &RoleCatalog, selection: &RunSelection) -> Result<()> {
        let mut count = 0;
        for selected in &selection.roles {
            let role = lookup(catalog, &selected.name)?;
            for (i, spec) in role.tasks.iter().enumerate() {
                if !selected.scope.includes(spec, &selection.skip_tags) {
                    continue;
                }
                validate_task(spec, i)
                    .with_context(|| format!("Invalid task in role '{}'", role.name))?;
                count += 1;
            }
        }

        debug!("Validated {} tasks", count);
        Ok(())
    }

    /// Validate, then execute every selected task
    pub async fn run(
        &self,
        catalog: &RoleCatalog,
        selection: &RunSelection,
        vars: &VariableContext,
    ) -> Result<RunReport> {
        self.validate(catalog, selection)?;

        let mut report = RunReport::default();
        if selection.is_empty() {
            info!("No roles selected, nothing to do");
            return Ok(report);
        }

        info!(
            "Running roles: {}{}",
            selection.names().join(", "),
            if self.dry_run() { " (check mode)" } else { "" }
        );

        for selected in &selection.roles {
            let role = lookup(catalog, &selected.name)?;
            self.run_role(role, &selected.scope, &selection.skip_tags, vars, &mut report)
                .await?;
        }

        info!("Recap: {}", report);
        Ok(report)
    }

    async fn run_role(
        &self,
        role: &Role,
        scope: &TaskScope,
        skip_tags: &[String],
        vars: &VariableContext,
        report: &mut RunReport,
    ) -> Result<()> {
        let role_vars = vars.with_defaults(&role.defaults);
        let ctx = TaskContext {
            runner: self.runner,
            vars: &role_vars,
            identity: self.identity,
            secrets: self.secrets,
            packages: self.packages,
            role_dir: &role.dir,
            dry_run: self.dry_run(),
        };

        for (i, spec) in role.tasks.iter().enumerate() {
            if !scope.includes(spec, skip_tags) {
                continue;
            }
            let label = format!("{} : {}", role.name, spec.display_name());

            if let Some(condition) = &spec.when {
                let pass = role_vars
                    .evaluate_condition(condition)
                    .with_context(|| format!("Task {} of role '{}'", i + 1, role.name))?;
                if !pass {
                    info!("skipped: [{}] ({})", label, condition);
                    report.record(TaskOutcome::Skipped);
                    continue;
                }
            }

            let outcome = execute_task(&spec.task, &ctx)
                .await
                .with_context(|| format!("Task '{}' failed", label))?;
            info!("{}: [{}]", outcome, label);
            report.record(outcome);
        }

        Ok(())
    }
}

fn lookup<'c>(catalog: &'c RoleCatalog, name: &str) -> Result<&'c Role> {
    catalog
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Role '{}' not found", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use crate::roles::{resolve_selection, SelectionRequest};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn identity(home: &Path) -> Identity {
        Identity {
            name: "alice".to_string(),
            home: home.to_path_buf(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    /// Two roles: `bash` copies a file, `tools` runs a guarded command
    fn repository(root: &Path) -> RoleCatalog {
        let bash = root.join("roles/bash");
        write(
            &bash.join("tasks/main.yml"),
            r#"
- name: bashrc
  type: copy
  src: bashrc
  dest: ~/.bashrc
- name: prompt
  type: template
  src: prompt.j2
  dest: ~/.config/prompt
  tags: [prompt]
"#,
        );
        write(&bash.join("files/bashrc"), "source ~/.config/prompt\n");
        write(&bash.join("templates/prompt.j2"), "PS1='{{ prompt }}'\n");
        write(&bash.join("defaults/main.yml"), "prompt: '$ '\n");

        let tools = root.join("roles/tools");
        write(
            &tools.join("tasks/main.yml"),
            r#"
- name: docker group
  type: command
  command: usermod -aG docker {{ user }}
  when: docker_installed
- name: tldr cache
  type: command
  command: tldr --update
  changed: false
  tags: [prompt]
"#,
        );

        RoleCatalog::discover(&root.join("roles")).unwrap()
    }

    fn vars(docker_installed: bool) -> VariableContext {
        let mut vars = VariableContext::new();
        vars.set("user".to_string(), serde_yaml::Value::String("alice".to_string()));
        vars.set(
            "docker_installed".to_string(),
            serde_yaml::Value::Bool(docker_installed),
        );
        vars
    }

    #[tokio::test]
    async fn test_run_all_roles_then_idempotent() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let catalog = repository(repo.path());
        let runner = ScriptedRunner::new().ok("sh -c", "");
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let selection =
            resolve_selection(&catalog, None, &[], &SelectionRequest::default()).unwrap();
        let first = executor.run(&catalog, &selection, &vars(false)).await.unwrap();
        assert_eq!(first, RunReport { ok: 1, changed: 2, skipped: 1 });
        assert_eq!(
            fs::read_to_string(home.path().join(".config/prompt")).unwrap(),
            "PS1='$ '\n"
        );

        let second = executor.run(&catalog, &selection, &vars(false)).await.unwrap();
        assert_eq!(second, RunReport { ok: 3, changed: 0, skipped: 1 });
        assert_eq!(runner.calls(), vec!["sh -c tldr --update", "sh -c tldr --update"]);
    }

    #[tokio::test]
    async fn test_guard_true_runs_command() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let catalog = repository(repo.path());
        let runner = ScriptedRunner::new().ok("sh -c", "");
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let selection = resolve_selection(
            &catalog,
            None,
            &[],
            &SelectionRequest {
                filter: Some("tools".to_string()),
                skip_tags: Vec::new(),
            },
        )
        .unwrap();
        let report = executor.run(&catalog, &selection, &vars(true)).await.unwrap();

        assert_eq!(report, RunReport { ok: 1, changed: 1, skipped: 0 });
        assert_eq!(
            runner.calls(),
            vec!["sh -c usermod -aG docker alice", "sh -c tldr --update"]
        );
    }

    #[tokio::test]
    async fn test_task_tag_selects_tasks_across_roles() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let catalog = repository(repo.path());
        let runner = ScriptedRunner::new().ok("sh -c", "");
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let selection = resolve_selection(
            &catalog,
            None,
            &[],
            &SelectionRequest {
                filter: Some("prompt".to_string()),
                skip_tags: Vec::new(),
            },
        )
        .unwrap();
        executor.run(&catalog, &selection, &vars(true)).await.unwrap();

        // Untagged tasks of matched roles do not run
        assert!(!home.path().join(".bashrc").exists());
        assert!(home.path().join(".config/prompt").exists());
        assert_eq!(runner.calls(), vec!["sh -c tldr --update"]);
    }

    #[tokio::test]
    async fn test_empty_selection_is_noop() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let catalog = repository(repo.path());
        let runner = ScriptedRunner::new();
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let report = executor
            .run(&catalog, &RunSelection::default(), &vars(false))
            .await
            .unwrap();
        assert_eq!(report, RunReport::default());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_tasks() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        write(
            &repo.path().join("roles/broken/tasks/main.yml"),
            r#"
- name: first
  type: command
  command: exit 1
- name: second
  type: directory
  path: ~/never
"#,
        );
        let catalog = RoleCatalog::discover(&repo.path().join("roles")).unwrap();
        let runner = ScriptedRunner::new().fail("sh -c exit 1", 1, "nope");
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let selection =
            resolve_selection(&catalog, None, &[], &SelectionRequest::default()).unwrap();
        let err = executor
            .run(&catalog, &selection, &VariableContext::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broken : first"));
        assert!(!home.path().join("never").exists());
    }

    #[tokio::test]
    async fn test_validation_runs_before_side_effects() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        write(
            &repo.path().join("roles/invalid/tasks/main.yml"),
            r#"
- type: directory
  path: ~/created
- type: command
  command: ""
"#,
        );
        let catalog = RoleCatalog::discover(&repo.path().join("roles")).unwrap();
        let runner = ScriptedRunner::new();
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions::default());

        let selection =
            resolve_selection(&catalog, None, &[], &SelectionRequest::default()).unwrap();
        let err = executor
            .run(&catalog, &selection, &VariableContext::new())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Task 2: command command cannot be empty"));
        assert!(!home.path().join("created").exists());
    }

    #[tokio::test]
    async fn test_check_mode_changes_nothing() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let catalog = repository(repo.path());
        let runner = ScriptedRunner::new();
        let id = identity(home.path());
        let secrets = SecretsConfig::default();
        let executor =
            RoleExecutor::new(&runner, &id, &secrets, None, ExecutorOptions { check: true });

        let selection =
            resolve_selection(&catalog, None, &[], &SelectionRequest::default()).unwrap();
        let report = executor.run(&catalog, &selection, &vars(false)).await.unwrap();

        assert_eq!(report, RunReport { ok: 1, changed: 2, skipped: 1 });
        assert!(!home.path().join(".bashrc").exists());
        assert!(runner.calls().is_empty());
    }
}
