//! Host facts
//!
//! Facts are computed once at the start of a run and only read afterwards.
//! Built-in system facts come first, then the probes: external commands whose
//! exit code or output becomes a boolean or string fact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

mod collector;
mod command_facts;
mod system_facts;

pub use collector::{builtin_probes, FactCollector};
pub use command_facts::evaluate_probe;
pub use system_facts::{collect_system_facts, Distribution, Identity, OsRelease};

/// Value of a single fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Text(String),
}

impl FactValue {
    /// Booleans are themselves, text is true when non-empty
    pub fn is_truthy(&self) -> bool {
        match self {
            FactValue::Bool(value) => *value,
            FactValue::Text(value) => !value.is_empty(),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(value) => write!(f, "{}", value),
            FactValue::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Text(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Text(value.to_string())
    }
}

/// Ordered fact mapping, in the order facts were computed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facts {
    values: HashMap<String, FactValue>,
    order: Vec<String>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FactValue>) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// True when the fact exists and is truthy
    pub fn is_true(&self, name: &str) -> bool {
        self.get(name).map(FactValue::is_truthy).unwrap_or(false)
    }

    /// Text value of a fact, if it is a string fact
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FactValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Position of a fact in computation order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactValue)> {
        self.order
            .iter()
            .filter_map(|name| self.values.get(name).map(|value| (name.as_str(), value)))
    }
}

/// How a probe's command result becomes a fact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFormat {
    /// Exit code zero is `true`
    #[default]
    ExitCode,
    /// Trimmed stdout is the fact
    Text,
    /// stdout parsed as JSON
    Json,
}

/// A fact probe
///
/// # Examples
///
/// **YAML Format:**
/// ```yaml
/// probes:
///   - name: docker_installed
///     command: docker --version
///   - name: docker_version
///     command: docker version --format json
///     format: json
///     json_pointer: /Client/Version
///     depends_on: docker_installed
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    /// Fact name
    pub name: String,
    /// Check command
    pub command: String,
    #[serde(default)]
    pub format: ProbeFormat,
    /// JSON pointer into the output (json format only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
    /// Fact that must be true for this probe to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Run through `sh -c` instead of splitting the command
    #[serde(default = "default_true")]
    pub shell: bool,
}

fn default_true() -> bool {
    true
}
