//! Roles discovered in the configuration repository
//!
//! Layout of one role:
//!
//! ```text
//! roles/bash/
//!   tasks/main.yml      ordered task list (required)
//!   defaults/main.yml   lowest precedence variables
//!   meta/main.yml       tags and description
//!   files/              sources for copy tasks
//!   templates/          sources for template and secret tasks
//! ```

use crate::apply::TaskSpec;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

mod selector;

pub use selector::{resolve_selection, RunSelection, SelectedRole, SelectionRequest, TaskScope};

/// Role metadata from `meta/main.yml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub dir: PathBuf,
    pub meta: RoleMeta,
    pub defaults: HashMap<String, serde_yaml::Value>,
    pub tasks: Vec<TaskSpec>,
}

impl Role {
    /// Load a role from its directory
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid role directory: {}", dir.display()))?
            .to_string();

        let tasks_path = dir.join("tasks/main.yml");
        if !tasks_path.is_file() {
            return Err(anyhow::anyhow!("Role '{}' missing tasks/main.yml", name));
        }

        let tasks: Vec<TaskSpec> = read_yaml_or_default(&tasks_path)
            .with_context(|| format!("Failed to load tasks of role '{}'", name))?;
        let defaults = read_yaml_or_default(&dir.join("defaults/main.yml"))
            .with_context(|| format!("Failed to load defaults of role '{}'", name))?;
        let meta = read_yaml_or_default(&dir.join("meta/main.yml"))
            .with_context(|| format!("Failed to load metadata of role '{}'", name))?;

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            meta,
            defaults,
            tasks,
        })
    }

    /// Whether `tag` names this role or one of its role-level tags
    pub fn matches(&self, tag: &str) -> bool {
        self.name == tag || self.meta.tags.iter().any(|t| t == tag)
    }

    /// Tags declared on any of the role's tasks
    pub fn task_tags(&self) -> BTreeSet<&str> {
        self.tasks
            .iter()
            .flat_map(|task| task.tags.iter().map(String::as_str))
            .collect()
    }
}

/// Missing or empty files deserialize to the type's default
fn read_yaml_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// All roles of a repository, keyed by name
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: BTreeMap<String, Role>,
}

impl RoleCatalog {
    /// Load every role below `roles_dir`; a missing directory is an empty catalog
    pub fn discover(roles_dir: &Path) -> Result<Self> {
        let mut roles = BTreeMap::new();

        if !roles_dir.is_dir() {
            tracing::warn!("No roles directory at {}", roles_dir.display());
            return Ok(Self { roles });
        }

        let entries = std::fs::read_dir(roles_dir)
            .with_context(|| format!("Failed to read roles directory {}", roles_dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to read roles directory {}", roles_dir.display())
            })?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !path.is_dir() || hidden {
                continue;
            }

            let role = Role::load(&path)?;
            roles.insert(role.name.clone(), role);
        }

        Ok(Self { roles })
    }

    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Role names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
