//! Bootstrap and update procedure
//!
//! One invocation walks the host through:
//!
//! ```text
//! Uninitialized -> DependenciesInstalled -> RepositoryCloned
//!               -> Authenticated -> Converged -> Done
//!                             \-> AuthenticationFailed
//! ```
//!
//! Baseline packages and the repository sync abort the run on failure. A
//! secrets manager that is missing or signed out ends the run early without
//! an error. Everything after that is the role converge.

use crate::apply::file_attrs::chown_to_identity;
use crate::apply::{
    ExecutorOptions, PackageInstaller, PackageManager, RoleExecutor, RunReport, VariableContext,
};
use crate::config::{load_playbook, BootstrapConfig};
use crate::error::ConvergeError;
use crate::facts::{
    builtin_probes, collect_system_facts, Distribution, FactCollector, Facts, Identity, OsRelease,
};
use crate::process::CommandRunner;
use crate::roles::{resolve_selection, RoleCatalog, SelectionRequest};
use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod log;
mod repository;

pub use log::{CommandLog, LoggedRunner};
pub use repository::{is_cloned, sync_repository, RepositorySync};

/// Progress of one bootstrap invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Uninitialized,
    DependenciesInstalled,
    RepositoryCloned,
    Authenticated,
    Converged,
    Done,
    AuthenticationFailed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Uninitialized => "uninitialized",
            BootstrapState::DependenciesInstalled => "dependencies installed",
            BootstrapState::RepositoryCloned => "repository cloned",
            BootstrapState::Authenticated => "authenticated",
            BootstrapState::Converged => "converged",
            BootstrapState::Done => "done",
            BootstrapState::AuthenticationFailed => "authentication failed",
        };
        f.write_str(name)
    }
}

/// Arguments passed through to the role runner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerOptions {
    pub check: bool,
    pub skip_tags: Vec<String>,
    pub extra_vars: HashMap<String, serde_yaml::Value>,
    pub verbose: u8,
}

/// Result of a bootstrap invocation that did not abort
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapOutcome {
    pub state: BootstrapState,
    /// Recap of the converge, absent when it never ran
    pub report: Option<RunReport>,
    /// Set when this run completed the host's first converge
    pub first_run: bool,
}

pub struct Bootstrap<'a> {
    config: BootstrapConfig,
    identity: Identity,
    runner: &'a dyn CommandRunner,
    log: CommandLog,
}

impl<'a> Bootstrap<'a> {
    pub fn new(config: BootstrapConfig, identity: Identity, runner: &'a dyn CommandRunner) -> Self {
        let log = CommandLog::new(identity.resolve(Path::new(&config.log_file)));
        Self {
            config,
            identity,
            runner,
            log,
        }
    }

    /// Command log left behind by a failed run
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn repository_path(&self) -> PathBuf {
        self.identity.resolve(&self.config.repository.path)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.identity.resolve(Path::new(&self.config.marker_file))
    }

    /// Run the procedure with an optional role/tag filter
    pub async fn run(
        &self,
        filter: Option<String>,
        options: &RunnerOptions,
    ) -> Result<BootstrapOutcome, ConvergeError> {
        let runner = LoggedRunner::new(self.runner, &self.log);
        let mut state = BootstrapState::Uninitialized;

        let installer = self.install_dependencies(&runner, options.check).await?;
        advance(&mut state, BootstrapState::DependenciesInstalled);

        let repo_path = self.repository_path();
        if self.config.repository.url.trim().is_empty() && !is_cloned(&repo_path) {
            return Err(ConvergeError::Config(anyhow::anyhow!(
                "repository.url is not set and {} is not a clone yet",
                repo_path.display()
            )));
        }
        let sync = sync_repository(&self.config.repository, &repo_path)
            .map_err(ConvergeError::Network)?;
        if let Err(e) = chown_repository(&repo_path, &self.identity, sync) {
            warn!("{:#}", e);
        }
        info!("Repository {}: {}", repo_path.display(), sync);
        advance(&mut state, BootstrapState::RepositoryCloned);

        let facts = collect_system_facts(&self.identity, &self.config.os_release);
        let facts = match self.authenticate(&runner, facts).await {
            Ok(facts) => facts,
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                warn!(
                    "Skipping converge until the secrets manager is usable; last command output is in {}",
                    self.log.path().display()
                );
                advance(&mut state, BootstrapState::AuthenticationFailed);
                return Ok(BootstrapOutcome {
                    state,
                    report: None,
                    first_run: false,
                });
            }
            Err(e) => return Err(e),
        };
        advance(&mut state, BootstrapState::Authenticated);

        let report = self
            .converge(&runner, &repo_path, facts, &installer, filter, options)
            .await?;
        advance(&mut state, BootstrapState::Converged);

        let first_run = !options.check && !self.marker_path().exists();
        if first_run {
            self.write_marker().map_err(ConvergeError::Config)?;
        }

        if let Err(e) = self.log.discard() {
            debug!("{:#}", e);
        }
        advance(&mut state, BootstrapState::Done);

        Ok(BootstrapOutcome {
            state,
            report: Some(report),
            first_run,
        })
    }

    async fn install_dependencies(
        &self,
        runner: &dyn CommandRunner,
        check: bool,
    ) -> Result<PackageInstaller, ConvergeError> {
        let release = OsRelease::load(&self.config.os_release).map_err(ConvergeError::Dependency)?;
        let distribution = Distribution::from_os_release(&release);
        let manager = PackageManager::for_distribution(&distribution).ok_or_else(|| {
            ConvergeError::Dependency(anyhow::anyhow!(
                "Unsupported distribution '{}'",
                distribution
            ))
        })?;

        let use_sudo = self
            .config
            .use_sudo
            .unwrap_or_else(|| !nix::unistd::geteuid().is_root());
        let installer = PackageInstaller::new(manager, use_sudo);

        let baseline = match distribution {
            Distribution::Arch => &self.config.packages.arch,
            _ => &self.config.packages.ubuntu,
        };
        info!(
            "Checking {} baseline packages with {}",
            baseline.len(),
            manager.name()
        );
        installer
            .ensure_installed(runner, baseline, check)
            .await
            .context("Failed to install baseline packages")
            .map_err(ConvergeError::Dependency)?;

        Ok(installer)
    }

    /// Evaluate the secrets manager probes; facts gain their results
    async fn authenticate(
        &self,
        runner: &dyn CommandRunner,
        facts: Facts,
    ) -> Result<Facts, ConvergeError> {
        let secrets = &self.config.secrets;
        if !secrets.enabled {
            debug!("Secrets manager disabled");
            return Ok(facts);
        }

        if std::env::var_os(&secrets.token_env).is_some() {
            info!("Using pre-authentication token from {}", secrets.token_env);
        }

        let facts = FactCollector::new(runner, builtin_probes(secrets))
            .collect(facts)
            .await
            .map_err(ConvergeError::Config)?;

        if !facts.is_true("secrets_cli_installed") {
            return Err(ConvergeError::Authentication(format!(
                "Secrets CLI '{}' is not installed",
                secrets.cli
            )));
        }
        if !facts.is_true("secrets_authenticated") {
            return Err(ConvergeError::Authentication(format!(
                "Secrets CLI '{}' cannot list vaults; sign in or set {}",
                secrets.cli, secrets.token_env
            )));
        }

        info!("Secrets manager is authenticated");
        Ok(facts)
    }

    async fn converge(
        &self,
        runner: &dyn CommandRunner,
        repo_path: &Path,
        facts: Facts,
        installer: &PackageInstaller,
        filter: Option<String>,
        options: &RunnerOptions,
    ) -> Result<RunReport, ConvergeError> {
        let playbook = load_playbook(repo_path).map_err(ConvergeError::Config)?;
        let catalog = RoleCatalog::discover(&repo_path.join(&playbook.roles_dir))
            .map_err(ConvergeError::Config)?;
        debug!("Discovered {} roles", catalog.len());

        let facts = FactCollector::new(runner, playbook.probes.clone())
            .collect(facts)
            .await
            .context("Invalid fact probes")
            .map_err(ConvergeError::Config)?;

        let request = SelectionRequest {
            filter,
            skip_tags: options.skip_tags.clone(),
        };
        let selection = resolve_selection(
            &catalog,
            playbook.default_roles.as_deref(),
            &playbook.exclude_roles,
            &request,
        )
        .map_err(ConvergeError::Config)?;

        let vars = VariableContext::layered(&playbook.vars, &facts, &options.extra_vars);
        let executor = RoleExecutor::new(
            runner,
            &self.identity,
            &self.config.secrets,
            Some(installer),
            ExecutorOptions {
                check: options.check,
            },
        );

        executor
            .validate(&catalog, &selection)
            .map_err(ConvergeError::Config)?;
        executor
            .run(&catalog, &selection, &vars)
            .await
            .map_err(ConvergeError::Task)
    }

    fn write_marker(&self) -> anyhow::Result<()> {
        let marker = self.marker_path();
        std::fs::write(&marker, format!("{}\n", self.identity.name))
            .with_context(|| format!("Failed to write {}", marker.display()))?;
        chown_to_identity(&marker, &self.identity)?;
        info!("First run complete, wrote {}", marker.display());
        Ok(())
    }
}

fn advance(state: &mut BootstrapState, next: BootstrapState) {
    debug!("State: {} -> {}", state, next);
    *state = next;
}

/// Hand a fresh clone to the target user
fn chown_repository(
    path: &Path,
    identity: &Identity,
    sync: RepositorySync,
) -> anyhow::Result<()> {
    if sync != RepositorySync::Cloned {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        chown_to_identity(entry.path(), identity)?;
    }
    Ok(())
}
