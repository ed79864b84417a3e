//! Variable context for task execution
//!
//! Variables come from four layers, lowest precedence first: role defaults,
//! playbook `vars`, facts and `-e` extra vars. Task fields and templates are
//! rendered against the merged context, and `when` guards are evaluated
//! against it as minijinja expressions.

use crate::apply::templating::{guard_environment, render_with_context};
use crate::facts::{FactValue, Facts};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Variable storage for task execution context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    variables: HashMap<String, serde_yaml::Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the run-wide context from playbook vars, facts and extra vars
    pub fn layered(
        vars: &HashMap<String, serde_yaml::Value>,
        facts: &Facts,
        extra_vars: &HashMap<String, serde_yaml::Value>,
    ) -> Self {
        let mut ctx = Self::new();
        for (key, value) in vars {
            ctx.set(key.clone(), value.clone());
        }
        ctx.extend_facts(facts);
        for (key, value) in extra_vars {
            ctx.set(key.clone(), value.clone());
        }
        ctx
    }

    /// Copy of this context with role defaults filled in underneath
    pub fn with_defaults(&self, defaults: &HashMap<String, serde_yaml::Value>) -> Self {
        let mut merged = self.clone();
        for (key, value) in defaults {
            if !self.contains(key) {
                merged.set(key.clone(), value.clone());
            }
        }
        merged
    }

    pub fn extend_facts(&mut self, facts: &Facts) {
        for (name, value) in facts.iter() {
            let value = match value {
                FactValue::Bool(b) => serde_yaml::Value::Bool(*b),
                FactValue::Text(s) => serde_yaml::Value::String(s.clone()),
            };
            self.set(name.to_string(), value);
        }
    }

    /// Set a variable value
    pub fn set(&mut self, key: String, value: serde_yaml::Value) {
        self.variables.insert(key, value);
    }

    /// Get a variable value
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.variables.get(key)
    }

    /// Check if a variable exists
    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    fn as_jinja(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(&self.variables)
    }

    /// Render a template string with variable substitution
    pub fn render(&self, template: &str) -> Result<String> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        render_with_context(template, &self.as_jinja())
            .with_context(|| format!("Failed to render '{}'", template))
    }

    /// Evaluate a `when` guard
    pub fn evaluate_condition(&self, condition: &str) -> Result<bool> {
        let env = guard_environment();
        let expr = env
            .compile_expression(condition)
            .with_context(|| format!("Invalid condition: {}", condition))?;
        let value = expr
            .eval(self.as_jinja())
            .with_context(|| format!("Failed to evaluate condition: {}", condition))?;
        Ok(value.is_true())
    }
}

/// Check that a guard parses, without evaluating it
pub fn validate_condition(condition: &str) -> Result<()> {
    let env = guard_environment();
    env.compile_expression(condition)
        .map(|_| ())
        .with_context(|| format!("Invalid condition: {}", condition))
}

/// Parse a `key=value` extra variable; the value is read as a YAML scalar
pub fn parse_extra_var(pair: &str) -> Result<(String, serde_yaml::Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Extra variable must be key=value: {}", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow::anyhow!("Extra variable name cannot be empty: {}", pair));
    }

    let value = match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        Ok(value @ (serde_yaml::Value::Bool(_) | serde_yaml::Value::Number(_))) => value,
        _ => serde_yaml::Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_str(s: &str) -> serde_yaml::Value {
        serde_yaml::Value::String(s.to_string())
    }

    #[test]
    fn test_variable_precedence() {
        let mut defaults = HashMap::new();
        defaults.insert("editor".to_string(), yaml_str("vim"));
        defaults.insert("shell".to_string(), yaml_str("bash"));
        defaults.insert("user".to_string(), yaml_str("nobody"));

        let mut vars = HashMap::new();
        vars.insert("editor".to_string(), yaml_str("nvim"));
        vars.insert("theme".to_string(), yaml_str("dark"));

        let mut facts = Facts::new();
        facts.insert("user", "alice");
        facts.insert("secrets_authenticated", true);

        let mut extra = HashMap::new();
        extra.insert("theme".to_string(), yaml_str("light"));

        let ctx = VariableContext::layered(&vars, &facts, &extra).with_defaults(&defaults);

        assert_eq!(ctx.get("editor"), Some(&yaml_str("nvim")));
        assert_eq!(ctx.get("shell"), Some(&yaml_str("bash")));
        assert_eq!(ctx.get("user"), Some(&yaml_str("alice")));
        assert_eq!(ctx.get("theme"), Some(&yaml_str("light")));
        assert_eq!(
            ctx.get("secrets_authenticated"),
            Some(&serde_yaml::Value::Bool(true))
        );
    }

    #[test]
    fn test_render() {
        let mut ctx = VariableContext::new();
        ctx.set("user".to_string(), yaml_str("bob"));
        ctx.set("count".to_string(), serde_yaml::Value::Number(42.into()));

        assert_eq!(ctx.render("Hello {{ user }}!").unwrap(), "Hello bob!");
        assert_eq!(ctx.render("Count: {{ count }}").unwrap(), "Count: 42");
        assert_eq!(ctx.render("{{ user | upper }}").unwrap(), "BOB");
        assert_eq!(ctx.render("No vars here").unwrap(), "No vars here");
        assert!(ctx.render("{{ missing }}").is_err());
    }

    #[test]
    fn test_condition_evaluation() {
        let mut ctx = VariableContext::new();
        ctx.set("distribution".to_string(), yaml_str("arch"));
        ctx.set("secrets_authenticated".to_string(), serde_yaml::Value::Bool(true));
        ctx.set("docker_installed".to_string(), serde_yaml::Value::Bool(false));

        assert!(ctx.evaluate_condition("true").unwrap());
        assert!(ctx
            .evaluate_condition("secrets_authenticated and distribution == 'arch'")
            .unwrap());
        assert!(!ctx.evaluate_condition("docker_installed").unwrap());
        assert!(ctx.evaluate_condition("not docker_installed").unwrap());
        assert!(ctx.evaluate_condition("distribution in ['arch', 'ubuntu']").unwrap());
        // Undefined names are falsy rather than errors
        assert!(!ctx.evaluate_condition("tailscale_online").unwrap());
        assert!(ctx.evaluate_condition("tailscale_online is not defined").unwrap());
    }

    #[test]
    fn test_validate_condition() {
        assert!(validate_condition("a and (b or c)").is_ok());
        assert!(validate_condition("a and (").is_err());
    }

    #[test]
    fn test_parse_extra_var() {
        assert_eq!(
            parse_extra_var("editor=nvim").unwrap(),
            ("editor".to_string(), yaml_str("nvim"))
        );
        assert_eq!(
            parse_extra_var("gpu=true").unwrap(),
            ("gpu".to_string(), serde_yaml::Value::Bool(true))
        );
        assert_eq!(
            parse_extra_var("greeting=a=b").unwrap(),
            ("greeting".to_string(), yaml_str("a=b"))
        );
        assert!(parse_extra_var("novalue").is_err());
        assert!(parse_extra_var("=x").is_err());
    }
}
