//! File content, permission and ownership helpers shared by the file tasks
//!
//! A write is only performed when the content, mode or ownership on disk
//! differs from what the task wants, which is what makes a second run report
//! `ok` everywhere.

use crate::apply::TaskOutcome;
use crate::facts::Identity;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::info;

/// Desired mode and ownership of a written path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileAttrs {
    /// Resolve the task's `mode`, `owner` and `group` fields
    ///
    /// Without an explicit owner, files written by root on behalf of another
    /// user are handed to that user.
    pub fn resolve(
        mode: Option<&str>,
        owner: Option<&str>,
        group: Option<&str>,
        identity: &Identity,
    ) -> Result<Self> {
        let mode = mode.map(parse_mode).transpose()?;
        let mut uid = owner.map(resolve_owner).transpose()?;
        let mut gid = group.map(resolve_group).transpose()?;

        if nix::unistd::geteuid().is_root() && identity.uid != 0 {
            uid = uid.or(Some(identity.uid));
            gid = gid.or(Some(identity.gid));
        }

        Ok(Self { mode, uid, gid })
    }

    /// Whether the path's current attributes differ from the desired ones
    pub fn differ(&self, path: &Path) -> Result<bool> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?;

        let mode_differs = self
            .mode
            .map(|mode| metadata.permissions().mode() & 0o7777 != mode)
            .unwrap_or(false);
        let uid_differs = self.uid.map(|uid| metadata.uid() != uid).unwrap_or(false);
        let gid_differs = self.gid.map(|gid| metadata.gid() != gid).unwrap_or(false);

        Ok(mode_differs || uid_differs || gid_differs)
    }

    /// Apply mode and ownership to an existing path
    pub fn apply(&self, path: &Path) -> Result<()> {
        if let Some(mode) = self.mode {
            set_file_permissions(path, mode)?;
        }
        if self.uid.is_some() || self.gid.is_some() {
            set_file_ownership(path, self.uid, self.gid)?;
        }
        Ok(())
    }
}

/// Parse an octal mode such as `"0644"`, `"644"` or `"0o600"`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    let value = u32::from_str_radix(digits, 8)
        .with_context(|| format!("Invalid octal mode: {}", mode))?;
    if value > 0o7777 {
        return Err(anyhow::anyhow!("Invalid octal mode: {}", mode));
    }
    Ok(value)
}

fn resolve_owner(owner: &str) -> Result<u32> {
    if let Ok(uid) = owner.parse::<u32>() {
        return Ok(uid);
    }
    nix::unistd::User::from_name(owner)
        .with_context(|| format!("Failed to look up user {}", owner))?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", owner))
}

fn resolve_group(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    nix::unistd::Group::from_name(group)
        .with_context(|| format!("Failed to look up group {}", group))?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| anyhow::anyhow!("Group not found: {}", group))
}

/// Set file permissions
fn set_file_permissions(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

/// Set file ownership
fn set_file_ownership(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    use nix::unistd::{chown, Gid, Uid};

    chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
        .with_context(|| format!("Failed to set ownership on {}", path.display()))
}

/// Ensure `dest` holds exactly `content` with the desired attributes
pub fn ensure_file(
    dest: &Path,
    content: &[u8],
    attrs: &FileAttrs,
    dry_run: bool,
) -> Result<TaskOutcome> {
    let exists = dest.exists();
    if exists && dest.is_dir() {
        return Err(anyhow::anyhow!(
            "Destination is a directory: {}",
            dest.display()
        ));
    }

    let content_differs = if exists {
        let current =
            fs::read(dest).with_context(|| format!("Failed to read {}", dest.display()))?;
        current != content
    } else {
        true
    };
    let attrs_differ = exists && attrs.differ(dest)?;

    if !content_differs && !attrs_differ {
        tracing::debug!("File {} is already up to date", dest.display());
        return Ok(TaskOutcome::Ok);
    }

    if dry_run {
        if content_differs {
            info!("Would write {}", dest.display());
        } else {
            info!("Would update attributes of {}", dest.display());
        }
        return Ok(TaskOutcome::Changed);
    }

    if content_differs {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directories for {}", dest.display())
            })?;
        }
        write_content(dest, content, attrs.mode)?;
        info!("Wrote {}", dest.display());
    }
    attrs.apply(dest)?;

    Ok(TaskOutcome::Changed)
}

/// Write `content`, creating new files with `mode` so they are never readable more widely
fn write_content(dest: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if let Some(mode) = mode {
        options.mode(mode);
    }

    let mut file = options
        .open(dest)
        .with_context(|| format!("Failed to open {} for writing", dest.display()))?;
    file.write_all(content)
        .with_context(|| format!("Failed to write {}", dest.display()))
}

/// Hand a path written outside of a task to the target user when running as root
pub fn chown_to_identity(path: &Path, identity: &Identity) -> Result<()> {
    if nix::unistd::geteuid().is_root() && identity.uid != 0 {
        set_file_ownership(path, Some(identity.uid), Some(identity.gid))?;
    }
    Ok(())
}
