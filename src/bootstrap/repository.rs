//! Configuration repository clone and update
//!
//! A missing clone is cloned; an existing one is fetched and its current
//! branch fast-forwarded to `origin`. Local commits that diverge from the
//! remote are never merged or discarded, the update fails instead.

use crate::config::RepositoryConfig;
use anyhow::{Context, Result};
use git2::{build::CheckoutBuilder, Cred, CredentialType, FetchOptions, RemoteCallbacks, Repository};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

const REMOTE: &str = "origin";

/// What syncing the repository did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositorySync {
    Cloned,
    Updated,
    UpToDate,
}

impl fmt::Display for RepositorySync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositorySync::Cloned => f.write_str("cloned"),
            RepositorySync::Updated => f.write_str("updated"),
            RepositorySync::UpToDate => f.write_str("up to date"),
        }
    }
}

/// Whether `path` already holds a clone
pub fn is_cloned(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Clone or fast-forward the repository at `path`
pub fn sync_repository(config: &RepositoryConfig, path: &Path) -> Result<RepositorySync> {
    if is_cloned(path) {
        update_repository(path)
    } else {
        clone_repository(config, path)?;
        Ok(RepositorySync::Cloned)
    }
}

fn fetch_options<'a>() -> FetchOptions<'a> {
    let mut attempts = 0;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed_types| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("no usable credentials in the ssh agent"));
        }
        if allowed_types.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        } else {
            Cred::default()
        }
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);
    fetch_options
}

fn clone_repository(config: &RepositoryConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create parent directories for {}", path.display())
        })?;
    }

    info!("Cloning {} into {}", config.url, path.display());

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options());
    if let Some(branch) = &config.branch {
        builder.branch(branch);
    }

    builder
        .clone(&config.url, path)
        .with_context(|| format!("Failed to clone {} into {}", config.url, path.display()))?;
    Ok(())
}

fn update_repository(path: &Path) -> Result<RepositorySync> {
    let repo = Repository::open(path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;

    let head = repo.head().context("Failed to read HEAD")?;
    if !head.is_branch() {
        return Err(anyhow::anyhow!(
            "Repository at {} is not on a branch",
            path.display()
        ));
    }
    let branch = head
        .shorthand()
        .ok_or_else(|| anyhow::anyhow!("Current branch name is not valid UTF-8"))?
        .to_string();

    let mut remote = repo
        .find_remote(REMOTE)
        .with_context(|| format!("Failed to find remote {}", REMOTE))?;
    debug!("Fetching {} for {}", REMOTE, path.display());
    remote
        .fetch(&[] as &[&str], Some(&mut fetch_options()), None)
        .with_context(|| format!("Failed to fetch from {}", REMOTE))?;

    let upstream_name = format!("refs/remotes/{}/{}", REMOTE, branch);
    let upstream = repo
        .find_reference(&upstream_name)
        .with_context(|| format!("Branch '{}' has no counterpart on {}", branch, REMOTE))?;
    let upstream = repo
        .reference_to_annotated_commit(&upstream)
        .context("Failed to resolve fetched commit")?;

    let (analysis, _) = repo
        .merge_analysis(&[&upstream])
        .context("Failed to compare with fetched commit")?;

    if analysis.is_up_to_date() {
        debug!("Branch '{}' is up to date", branch);
        return Ok(RepositorySync::UpToDate);
    }
    if !analysis.is_fast_forward() {
        return Err(anyhow::anyhow!(
            "Branch '{}' has diverged from {} and cannot be fast-forwarded",
            branch,
            REMOTE
        ));
    }

    let local_name = format!("refs/heads/{}", branch);
    let mut local = repo
        .find_reference(&local_name)
        .with_context(|| format!("Failed to find {}", local_name))?;
    local
        .set_target(upstream.id(), "dotfiles: fast-forward")
        .with_context(|| format!("Failed to fast-forward {}", branch))?;
    repo.set_head(&local_name)
        .with_context(|| format!("Failed to set HEAD to {}", local_name))?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))
        .context("Failed to check out updated branch")?;

    info!("Fast-forwarded '{}' to {}", branch, upstream.id());
    Ok(RepositorySync::Updated)
}
