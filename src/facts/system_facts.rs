//! System facts collector
//!
//! Collects the facts every run needs regardless of the playbook: who we
//! converge for, which distribution we run on, and basic host identity.
//!
//! **Output:**
//! ```yaml
//! distribution: "arch"
//! distribution_version: "rolling"
//! user: "alice"
//! home: "/home/alice"
//! hostname: "workstation"
//! architecture: "x86_64"
//! ```

use crate::facts::Facts;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The user a run converges for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Identity of the invoking user
    pub fn current() -> Result<Self> {
        let uid = nix::unistd::getuid();
        let user = nix::unistd::User::from_uid(uid)
            .with_context(|| format!("Failed to look up user with uid {}", uid))?
            .ok_or_else(|| anyhow::anyhow!("No passwd entry for uid {}", uid))?;
        Ok(Self::from_user(user))
    }

    /// Identity of a named user
    pub fn lookup(name: &str) -> Result<Self> {
        let user = nix::unistd::User::from_name(name)
            .with_context(|| format!("Failed to look up user {}", name))?
            .ok_or_else(|| anyhow::anyhow!("User not found: {}", name))?;
        Ok(Self::from_user(user))
    }

    fn from_user(user: nix::unistd::User) -> Self {
        Self {
            name: user.name,
            home: user.dir,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }

    /// Resolve a path relative to the user's home; `~/` is expanded too
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            self.home.join(rest)
        } else if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }
}

/// Supported distributions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    Arch,
    Ubuntu,
    Other(String),
}

impl Distribution {
    /// Map an os-release `ID`/`ID_LIKE` pair onto a distribution family
    pub fn from_os_release(release: &OsRelease) -> Self {
        let candidates = std::iter::once(release.id.as_str())
            .chain(release.id_like.iter().map(String::as_str));

        for id in candidates {
            match id {
                "arch" | "archarm" | "endeavouros" | "manjaro" => return Distribution::Arch,
                "ubuntu" | "debian" => return Distribution::Ubuntu,
                _ => {}
            }
        }

        Distribution::Other(release.id.clone())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Distribution::Arch => "arch",
            Distribution::Ubuntu => "ubuntu",
            Distribution::Other(id) => id,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Parse the `KEY=value` format of os-release(5)
    pub fn parse(content: &str) -> Self {
        let fields: HashMap<&str, String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                (key.trim(), value.to_string())
            })
            .collect();

        Self {
            id: fields.get("ID").cloned().unwrap_or_default().to_lowercase(),
            id_like: fields
                .get("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            version_id: fields.get("VERSION_ID").cloned(),
            pretty_name: fields.get("PRETTY_NAME").cloned(),
        }
    }
}

/// Collect the built-in system facts
pub fn collect_system_facts(identity: &Identity, os_release: &Path) -> Facts {
    let mut facts = Facts::new();

    match OsRelease::load(os_release) {
        Ok(release) => {
            let distribution = Distribution::from_os_release(&release);
            facts.insert("distribution", distribution.as_str());
            facts.insert(
                "distribution_version",
                release.version_id.unwrap_or_else(|| "rolling".to_string()),
            );
        }
        Err(e) => {
            tracing::debug!("Distribution detection failed: {:#}", e);
            facts.insert("distribution", "unknown");
            facts.insert("distribution_version", "");
        }
    }

    facts.insert("user", identity.name.as_str());
    facts.insert("home", identity.home.to_string_lossy().to_string());

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    facts.insert("hostname", hostname);
    facts.insert("architecture", std::env::consts::ARCH);

    facts
}
