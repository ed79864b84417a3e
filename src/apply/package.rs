//! Distribution package management
//!
//! Used both for the baseline packages during bootstrap and by the `package`
//! task. Each package is checked individually and only missing ones are
//! installed, in a single package manager invocation.
//!
//! # Examples
//!
//! **YAML Format:**
//! ```yaml
//! - type: package
//!   packages: [neovim, ripgrep, fd]
//! ```

use crate::apply::{TaskContext, TaskOutcome};
use crate::facts::Distribution;
use crate::process::{run_checked, CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Package installation task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PackageTask {
    /// Package names
    pub packages: Vec<String>,
}

/// Native package manager of a supported distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Pacman,
    Apt,
}

impl PackageManager {
    pub fn for_distribution(distribution: &Distribution) -> Option<Self> {
        match distribution {
            Distribution::Arch => Some(PackageManager::Pacman),
            Distribution::Ubuntu => Some(PackageManager::Apt),
            Distribution::Other(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Pacman => "pacman",
            PackageManager::Apt => "apt",
        }
    }

    fn check_command(&self, package: &str) -> CommandSpec {
        match self {
            PackageManager::Pacman => CommandSpec::new("pacman").args(["-Q", package]),
            PackageManager::Apt => {
                CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package])
            }
        }
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        match self {
            PackageManager::Pacman => CommandSpec::new("pacman")
                .args(["-S", "--noconfirm", "--needed"])
                .args(packages.iter().cloned()),
            PackageManager::Apt => CommandSpec::new("apt-get")
                .args(["install", "-y"])
                .args(packages.iter().cloned())
                .env("DEBIAN_FRONTEND", "noninteractive"),
        }
    }

    /// Cache refresh needed once before the first install
    fn refresh_command(&self) -> Option<CommandSpec> {
        match self {
            PackageManager::Pacman => None,
            PackageManager::Apt => Some(
                CommandSpec::new("apt-get")
                    .arg("update")
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            ),
        }
    }
}

/// Installs packages with the host's package manager
#[derive(Debug)]
pub struct PackageInstaller {
    manager: PackageManager,
    use_sudo: bool,
    refreshed: AtomicBool,
}

impl PackageInstaller {
    pub fn new(manager: PackageManager, use_sudo: bool) -> Self {
        Self {
            manager,
            use_sudo,
            refreshed: AtomicBool::new(false),
        }
    }

    /// Check if a package is installed
    pub async fn is_installed(&self, runner: &dyn CommandRunner, package: &str) -> Result<bool> {
        let output = runner
            .run(&self.manager.check_command(package))
            .await
            .with_context(|| format!("Failed to check package status: {}", package))?;

        Ok(match self.manager {
            PackageManager::Pacman => output.success(),
            PackageManager::Apt => {
                output.success() && output.stdout.contains("install ok installed")
            }
        })
    }

    /// Install the packages that are missing; returns the ones installed
    pub async fn ensure_installed(
        &self,
        runner: &dyn CommandRunner,
        packages: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for package in packages {
            if self.is_installed(runner, package).await? {
                debug!("Package {} is already installed", package);
            } else {
                missing.push(package.clone());
            }
        }

        if missing.is_empty() {
            return Ok(missing);
        }

        if dry_run {
            info!("Would install packages: {}", missing.join(" "));
            return Ok(missing);
        }

        if let Some(refresh) = self.manager.refresh_command() {
            if !self.refreshed.swap(true, Ordering::SeqCst) {
                run_checked(runner, &self.privileged(refresh))
                    .await
                    .context("Failed to update package database")?;
                info!("Updated package database");
            }
        }

        run_checked(runner, &self.privileged(self.manager.install_command(&missing)))
            .await
            .with_context(|| format!("Failed to install packages {}", missing.join(" ")))?;
        info!("Installed packages: {}", missing.join(" "));

        Ok(missing)
    }

    /// Prefix with sudo, moving the environment onto the sudo command line
    fn privileged(&self, command: CommandSpec) -> CommandSpec {
        if !self.use_sudo {
            return command;
        }

        let mut env: Vec<(String, String)> = command.env.clone().into_iter().collect();
        env.sort();

        CommandSpec::new("sudo")
            .args(env.into_iter().map(|(key, value)| format!("{}={}", key, value)))
            .arg(command.program)
            .args(command.args)
    }
}

/// Execute a package task
pub async fn execute_package_task(task: &PackageTask, ctx: &TaskContext<'_>) -> Result<TaskOutcome> {
    let installer = ctx
        .packages
        .ok_or_else(|| anyhow::anyhow!("No supported package manager on this host"))?;

    let packages = task
        .packages
        .iter()
        .map(|name| ctx.render(name))
        .collect::<Result<Vec<_>>>()?;

    let installed = installer
        .ensure_installed(ctx.runner, &packages, ctx.dry_run)
        .await?;

    if installed.is_empty() {
        Ok(TaskOutcome::Ok)
    } else {
        Ok(TaskOutcome::Changed)
    }
}
