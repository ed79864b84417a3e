//! Configuration management for dotfiles
//!
//! Two layers of configuration exist. The bootstrap configuration lives on the
//! host and says where the configuration repository comes from, which
//! baseline packages to install and how to reach the secrets manager. The
//! playbook lives inside the repository and describes roles, variables and
//! fact probes.

use crate::facts::Probe;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Configuration repository
    pub repository: RepositoryConfig,
    /// Baseline packages installed before anything else
    pub packages: BaselinePackages,
    /// Secrets manager settings
    pub secrets: SecretsConfig,
    /// Whether package installation goes through sudo (default: when not root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_sudo: Option<bool>,
    /// First-run marker, relative to the user's home
    pub marker_file: String,
    /// Transient command log, relative to the user's home
    pub log_file: String,
    /// System identification file used for distribution detection
    pub os_release: PathBuf,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            packages: BaselinePackages::default(),
            secrets: SecretsConfig::default(),
            use_sudo: None,
            marker_file: ".dotfiles_run".to_string(),
            log_file: ".dotfiles.log".to_string(),
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

/// Where the configuration repository is cloned from and to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Remote URL, required before the first clone
    pub url: String,
    /// Local clone, relative paths are resolved against the user's home
    pub path: PathBuf,
    /// Branch to check out on first clone (default: remote HEAD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: PathBuf::from(".dotfiles"),
            branch: None,
        }
    }
}

/// Baseline package set per supported distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselinePackages {
    pub arch: Vec<String>,
    pub ubuntu: Vec<String>,
}

impl Default for BaselinePackages {
    fn default() -> Self {
        Self {
            arch: vec![
                "git".to_string(),
                "curl".to_string(),
                "openssh".to_string(),
                "base-devel".to_string(),
            ],
            ubuntu: vec![
                "git".to_string(),
                "curl".to_string(),
                "openssh-client".to_string(),
                "build-essential".to_string(),
            ],
        }
    }
}

/// Secrets manager CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Whether secrets are used at all; disabled skips the authentication step
    pub enabled: bool,
    /// Secrets CLI executable
    pub cli: String,
    /// Arguments listing accessible vaults, used as the authentication check
    pub list_args: Vec<String>,
    /// Arguments resolving the placeholders of the file passed with `--in-file` into stdout
    pub inject_args: Vec<String>,
    /// Environment variable that pre-authenticates the CLI
    pub token_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cli: "op".to_string(),
            list_args: vec![
                "vault".to_string(),
                "list".to_string(),
                "--format=json".to_string(),
            ],
            inject_args: vec!["inject".to_string()],
            token_env: "OP_SERVICE_ACCOUNT_TOKEN".to_string(),
        }
    }
}

/// Playbook stored at the root of the configuration repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookConfig {
    /// Variables available to all roles
    #[serde(default)]
    pub vars: HashMap<String, serde_yaml::Value>,

    /// Roles run when no tag filter is given (default: every role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_roles: Option<Vec<String>>,

    /// Roles removed from the default list
    #[serde(default)]
    pub exclude_roles: Vec<String>,

    /// Fact probes evaluated after the built-in ones, in order
    #[serde(default)]
    pub probes: Vec<Probe>,

    /// Directory holding the roles, relative to the playbook
    #[serde(default = "default_roles_dir")]
    pub roles_dir: String,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            default_roles: None,
            exclude_roles: Vec::new(),
            probes: Vec::new(),
            roles_dir: default_roles_dir(),
        }
    }
}

fn default_roles_dir() -> String {
    "roles".to_string()
}

/// Resolve the bootstrap config file with precedence:
/// 1. explicit path
/// 2. system-wide `/etc/dotfiles/config.*`
/// 3. user `~/.config/dotfiles/config.*`
pub fn locate_bootstrap_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let system_dir = PathBuf::from("/etc/dotfiles");
    if let Some(path) = find_config_file(&system_dir, "config") {
        return Some(path);
    }

    dirs::config_dir().and_then(|dir| find_config_file(&dir.join("dotfiles"), "config"))
}

/// Load the bootstrap configuration, falling back to defaults when no file exists
pub fn load_bootstrap_config(explicit: Option<&Path>) -> Result<BootstrapConfig> {
    match locate_bootstrap_config(explicit) {
        Some(path) => load_config_file(&path),
        None => Ok(BootstrapConfig::default()),
    }
}

/// Load `dotfiles.{yml,yaml,json,toml}` from the repository root
pub fn load_playbook(repo_dir: &Path) -> Result<PlaybookConfig> {
    match find_config_file(repo_dir, "dotfiles") {
        Some(path) => load_config_file(&path),
        None => Ok(PlaybookConfig::default()),
    }
}

/// Find `<stem>.yml`, `<stem>.yaml`, `<stem>.json` or `<stem>.toml` in `dir`
pub fn find_config_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    ["yml", "yaml", "json", "toml"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

/// Parse a configuration file, picking the format from its extension
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON config {}", path.display())),
        Some("toml") => toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML config {}", path.display())),
        _ => serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::ProbeFormat;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_bootstrap_config() {
        let config = BootstrapConfig::default();
        assert_eq!(config.secrets.cli, "op");
        assert!(config.secrets.enabled);
        assert_eq!(config.marker_file, ".dotfiles_run");
        assert_eq!(config.repository.path, PathBuf::from(".dotfiles"));
        assert!(config.packages.arch.contains(&"git".to_string()));
        assert!(config.use_sudo.is_none());
    }

    #[test]
    fn test_load_yaml_bootstrap_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yml");

        let yaml_content = r#"
repository:
  url: "https://example.com/me/dotfiles.git"
  path: /opt/dotfiles
  branch: main
packages:
  arch: [git]
secrets:
  enabled: false
use_sudo: false
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = load_bootstrap_config(Some(&config_path)).unwrap();
        assert_eq!(config.repository.url, "https://example.com/me/dotfiles.git");
        assert_eq!(config.repository.path, PathBuf::from("/opt/dotfiles"));
        assert_eq!(config.repository.branch.as_deref(), Some("main"));
        assert_eq!(config.packages.arch, vec!["git".to_string()]);
        // Unspecified sections keep their defaults
        assert!(!config.packages.ubuntu.is_empty());
        assert!(!config.secrets.enabled);
        assert_eq!(config.secrets.cli, "op");
        assert_eq!(config.use_sudo, Some(false));
    }

    #[test]
    fn test_load_toml_bootstrap_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
marker_file = ".bootstrapped"

[secrets]
cli = "bw"
token_env = "BW_SESSION"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = load_bootstrap_config(Some(&config_path)).unwrap();
        assert_eq!(config.marker_file, ".bootstrapped");
        assert_eq!(config.secrets.cli, "bw");
        assert_eq!(config.secrets.token_env, "BW_SESSION");
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "{ not json").unwrap();

        let result = load_bootstrap_config(Some(&config_path));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse JSON config"));
    }

    #[test]
    fn test_load_playbook() {
        let temp_dir = tempdir().unwrap();
        let yaml_content = r#"
vars:
  editor: nvim
default_roles: [git, bash, neovim]
exclude_roles: [neovim]
probes:
  - name: has_nvidia
    command: "lspci | grep -qi nvidia"
  - name: docker_running
    command: "docker info --format json"
    format: json
    json_pointer: /ServerVersion
"#;
        fs::write(temp_dir.path().join("dotfiles.yml"), yaml_content).unwrap();

        let playbook = load_playbook(temp_dir.path()).unwrap();
        assert_eq!(
            playbook.vars.get("editor"),
            Some(&serde_yaml::Value::String("nvim".to_string()))
        );
        assert_eq!(playbook.default_roles.as_ref().unwrap().len(), 3);
        assert_eq!(playbook.exclude_roles, vec!["neovim".to_string()]);
        assert_eq!(playbook.probes.len(), 2);
        assert_eq!(playbook.probes[0].format, ProbeFormat::ExitCode);
        assert_eq!(playbook.probes[1].format, ProbeFormat::Json);
        assert_eq!(playbook.roles_dir, "roles");
    }

    #[test]
    fn test_missing_playbook_returns_default() {
        let temp_dir = tempdir().unwrap();
        let playbook = load_playbook(temp_dir.path()).unwrap();
        assert!(playbook.default_roles.is_none());
        assert!(playbook.probes.is_empty());
        assert_eq!(playbook.roles_dir, "roles");
    }

    #[test]
    fn test_find_config_file_prefers_yaml() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("config.toml"), "").unwrap();
        fs::write(temp_dir.path().join("config.yml"), "").unwrap();

        let found = find_config_file(temp_dir.path(), "config").unwrap();
        assert_eq!(found, temp_dir.path().join("config.yml"));
    }
}
