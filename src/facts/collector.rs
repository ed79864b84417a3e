//! Ordered fact collection
//!
//! Probes run strictly in declaration order. A probe naming a dependency is
//! only evaluated when that fact is already known and true; otherwise it
//! defaults to `false` without running anything.

use crate::config::SecretsConfig;
use crate::facts::{evaluate_probe, FactValue, Facts, Probe, ProbeFormat};
use crate::process::CommandRunner;
use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

/// Runs the probe list on top of the system facts
pub struct FactCollector<'a> {
    runner: &'a dyn CommandRunner,
    probes: Vec<Probe>,
}

impl<'a> FactCollector<'a> {
    pub fn new(runner: &'a dyn CommandRunner, probes: Vec<Probe>) -> Self {
        Self { runner, probes }
    }

    /// Check names and dependency ordering against the facts already known
    pub fn validate(&self, base: &Facts) -> Result<()> {
        let mut known: HashSet<&str> = base.iter().map(|(name, _)| name).collect();

        for (i, probe) in self.probes.iter().enumerate() {
            if probe.name.is_empty() {
                return Err(anyhow::anyhow!("Probe {}: name cannot be empty", i + 1));
            }
            if probe.command.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "Probe {} ({}): command cannot be empty",
                    i + 1,
                    probe.name
                ));
            }
            if probe.json_pointer.is_some() && probe.format != ProbeFormat::Json {
                return Err(anyhow::anyhow!(
                    "Probe {} ({}): json_pointer requires format json",
                    i + 1,
                    probe.name
                ));
            }
            if let Some(dependency) = &probe.depends_on {
                if !known.contains(dependency.as_str()) {
                    return Err(anyhow::anyhow!(
                        "Probe {} ({}): depends on '{}', which is not computed before it",
                        i + 1,
                        probe.name,
                        dependency
                    ));
                }
            }
            if !known.insert(probe.name.as_str()) {
                return Err(anyhow::anyhow!(
                    "Probe {} ({}): fact is already defined",
                    i + 1,
                    probe.name
                ));
            }
        }

        Ok(())
    }

    /// Evaluate every probe in order and return the completed fact set
    pub async fn collect(&self, base: Facts) -> Result<Facts> {
        self.validate(&base)?;

        let mut facts = base;
        for probe in &self.probes {
            let value = match &probe.depends_on {
                Some(dependency) if !facts.is_true(dependency) => {
                    debug!(
                        "Skipping probe {}: dependency {} is false",
                        probe.name, dependency
                    );
                    FactValue::Bool(false)
                }
                _ => evaluate_probe(self.runner, probe).await,
            };

            debug!("Fact {} = {}", probe.name, value);
            facts.insert(probe.name.clone(), value);
        }

        Ok(facts)
    }
}

/// Probes describing the secrets CLI, empty when secrets are disabled
pub fn builtin_probes(secrets: &SecretsConfig) -> Vec<Probe> {
    if !secrets.enabled {
        return Vec::new();
    }

    let list_command = std::iter::once(secrets.cli.as_str())
        .chain(secrets.list_args.iter().map(String::as_str));
    let list_command = shlex::try_join(list_command).unwrap_or_else(|_| {
        format!("{} {}", secrets.cli, secrets.list_args.join(" "))
    });
    let version_command = shlex::try_join([secrets.cli.as_str(), "--version"])
        .unwrap_or_else(|_| format!("{} --version", secrets.cli));

    vec![
        Probe {
            name: "secrets_cli_installed".to_string(),
            command: version_command,
            format: ProbeFormat::ExitCode,
            json_pointer: None,
            depends_on: None,
            shell: false,
        },
        Probe {
            name: "secrets_authenticated".to_string(),
            command: list_command,
            format: ProbeFormat::ExitCode,
            json_pointer: None,
            depends_on: Some("secrets_cli_installed".to_string()),
            shell: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;

    fn probe(name: &str, command: &str, depends_on: Option<&str>) -> Probe {
        Probe {
            name: name.to_string(),
            command: command.to_string(),
            format: ProbeFormat::ExitCode,
            json_pointer: None,
            depends_on: depends_on.map(str::to_string),
            shell: false,
        }
    }

    fn base_facts() -> Facts {
        let mut facts = Facts::new();
        facts.insert("distribution", "arch");
        facts
    }

    #[tokio::test]
    async fn test_dependent_probe_runs_after_dependency() {
        let runner = ScriptedRunner::new()
            .ok("op --version", "2.30.0")
            .ok("op vault list", "[{\"id\":\"x\"}]");
        let collector = FactCollector::new(&runner, builtin_probes(&SecretsConfig::default()));

        let facts = collector.collect(base_facts()).await.unwrap();

        assert!(facts.is_true("secrets_cli_installed"));
        assert!(facts.is_true("secrets_authenticated"));
        assert!(
            facts.position("secrets_cli_installed").unwrap()
                < facts.position("secrets_authenticated").unwrap()
        );
        assert_eq!(
            runner.calls(),
            vec!["op --version", "op vault list --format=json"]
        );
    }

    #[tokio::test]
    async fn test_account_without_vaults_is_authenticated() {
        let runner = ScriptedRunner::new()
            .ok("op --version", "2.30.0")
            .ok("op vault list", "[]");
        let collector = FactCollector::new(&runner, builtin_probes(&SecretsConfig::default()));

        let facts = collector.collect(base_facts()).await.unwrap();
        assert!(facts.is_true("secrets_authenticated"));
    }

    #[tokio::test]
    async fn test_false_dependency_short_circuits() {
        let runner = ScriptedRunner::new().missing("op");
        let collector = FactCollector::new(&runner, builtin_probes(&SecretsConfig::default()));

        let facts = collector.collect(base_facts()).await.unwrap();

        assert!(!facts.is_true("secrets_cli_installed"));
        assert_eq!(facts.get("secrets_authenticated"), Some(&FactValue::Bool(false)));
        // The dependent probe never ran
        assert_eq!(runner.calls(), vec!["op --version"]);
    }

    #[tokio::test]
    async fn test_dependency_on_system_fact() {
        let runner = ScriptedRunner::new().ok("pacman -Qi yay", "");
        let collector = FactCollector::new(
            &runner,
            vec![probe("yay_installed", "pacman -Qi yay", Some("distribution"))],
        );

        let facts = collector.collect(base_facts()).await.unwrap();
        assert!(facts.is_true("yay_installed"));
    }

    #[tokio::test]
    async fn test_forward_dependency_is_rejected() {
        let runner = ScriptedRunner::new();
        let collector = FactCollector::new(
            &runner,
            vec![
                probe("b", "true", Some("a")),
                probe("a", "true", None),
            ],
        );

        let result = collector.collect(base_facts()).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not computed before it"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_fact_is_rejected() {
        let runner = ScriptedRunner::new();
        let collector = FactCollector::new(
            &runner,
            vec![probe("distribution", "true", None)],
        );

        let result = collector.validate(&base_facts());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already defined"));
    }

    #[test]
    fn test_json_pointer_requires_json_format() {
        let runner = ScriptedRunner::new();
        let mut bad = probe("x", "true", None);
        bad.json_pointer = Some("/a".to_string());
        let collector = FactCollector::new(&runner, vec![bad]);

        assert!(collector.validate(&Facts::new()).is_err());
    }

    #[test]
    fn test_builtin_probes_disabled() {
        let secrets = SecretsConfig {
            enabled: false,
            ..SecretsConfig::default()
        };
        assert!(builtin_probes(&secrets).is_empty());
    }
}
