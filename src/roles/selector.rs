//! Run selection
//!
//! Resolves which roles run, and which of their tasks, from the playbook's
//! default and excluded roles plus the caller's tag filter. The resolved list
//! is always in lexicographic order so runs are reproducible.

use crate::apply::{TaskSpec, ALWAYS_TAG};
use crate::roles::RoleCatalog;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Caller-supplied selection inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Role name or tag; when set, defaults and exclusions are ignored
    pub filter: Option<String>,
    /// Tags whose tasks and roles are removed after selection
    pub skip_tags: Vec<String>,
}

/// Which tasks of a selected role run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScope {
    /// Every task; the role itself was selected
    All,
    /// Only tasks carrying this tag, plus `always` tasks
    Tagged(String),
}

impl TaskScope {
    pub fn includes(&self, task: &TaskSpec, skip_tags: &[String]) -> bool {
        if task.tags.iter().any(|tag| skip_tags.contains(tag)) {
            return false;
        }
        match self {
            TaskScope::All => true,
            TaskScope::Tagged(tag) => task.has_tag(tag) || task.has_tag(ALWAYS_TAG),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRole {
    pub name: String,
    pub scope: TaskScope,
}

/// Resolved, ordered roles for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSelection {
    pub roles: Vec<SelectedRole>,
    pub skip_tags: Vec<String>,
}

impl RunSelection {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Resolve the run selection against the catalog
pub fn resolve_selection(
    catalog: &RoleCatalog,
    default_roles: Option<&[String]>,
    exclude_roles: &[String],
    request: &SelectionRequest,
) -> Result<RunSelection> {
    for name in default_roles.unwrap_or_default().iter().chain(exclude_roles) {
        if !catalog.contains(name) {
            return Err(anyhow::anyhow!(
                "Unknown role '{}' in playbook role lists",
                name
            ));
        }
    }

    let mut selected: BTreeMap<String, TaskScope> = BTreeMap::new();

    match request.filter.as_deref().filter(|f| !f.is_empty()) {
        Some(filter) => {
            for role in catalog.iter() {
                if role.matches(filter) {
                    selected.insert(role.name.clone(), TaskScope::All);
                } else if role.task_tags().contains(filter) {
                    selected.insert(role.name.clone(), TaskScope::Tagged(filter.to_string()));
                }
            }
            if selected.is_empty() {
                warn!("No role or task matches '{}'", filter);
            }
        }
        None => {
            let defaults: Vec<&str> = match default_roles {
                Some(names) => names.iter().map(String::as_str).collect(),
                None => catalog.names().collect(),
            };
            let excluded: BTreeSet<&str> = exclude_roles.iter().map(String::as_str).collect();
            for name in defaults.into_iter().filter(|n| !excluded.contains(n)) {
                selected.insert(name.to_string(), TaskScope::All);
            }
        }
    }

    if !request.skip_tags.is_empty() {
        selected.retain(|name, _| {
            catalog
                .get(name)
                .map(|role| !request.skip_tags.iter().any(|tag| role.matches(tag)))
                .unwrap_or(false)
        });
    }

    Ok(RunSelection {
        roles: selected
            .into_iter()
            .map(|(name, scope)| SelectedRole { name, scope })
            .collect(),
        skip_tags: request.skip_tags.clone(),
    })
}
