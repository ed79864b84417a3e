//! Command probe evaluation
//!
//! Runs a probe's check command and turns the result into a fact value.
//! Probing is best-effort: anything that goes wrong yields `false`.
//!
//! # Examples
//!
//! ## Exit code probe
//!
//! **YAML Format:**
//! ```yaml
//! name: rustup_installed
//! command: command -v rustup
//! ```
//!
//! ## JSON probe
//!
//! **YAML Format:**
//! ```yaml
//! name: tailscale_online
//! command: tailscale status --json
//! format: json
//! json_pointer: /Self/Online
//! ```

use crate::facts::{FactValue, Probe, ProbeFormat};
use crate::process::{CommandRunner, CommandSpec};
use serde_json::Value;

/// Evaluate a probe, never failing
pub async fn evaluate_probe(runner: &dyn CommandRunner, probe: &Probe) -> FactValue {
    let command = if probe.shell {
        CommandSpec::shell(&probe.command)
    } else {
        match CommandSpec::parse(&probe.command) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Probe {} has an invalid command: {:#}", probe.name, e);
                return FactValue::Bool(false);
            }
        }
    };

    let output = match runner.run(&command).await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Probe {} could not run: {:#}", probe.name, e);
            return FactValue::Bool(false);
        }
    };

    if !output.success() {
        tracing::debug!(
            "Probe {} exited with {:?}: {}",
            probe.name,
            output.status,
            output.stderr.trim()
        );
        return FactValue::Bool(false);
    }

    match probe.format {
        ProbeFormat::ExitCode => FactValue::Bool(true),
        ProbeFormat::Text => FactValue::Text(output.stdout.trim().to_string()),
        ProbeFormat::Json => interpret_json(&output.stdout, probe.json_pointer.as_deref()),
    }
}

fn interpret_json(stdout: &str, pointer: Option<&str>) -> FactValue {
    let document: Value = match serde_json::from_str(stdout) {
        Ok(document) => document,
        Err(_) => return FactValue::Bool(false),
    };

    match pointer {
        Some(pointer) => match document.pointer(pointer) {
            Some(Value::Bool(value)) => FactValue::Bool(*value),
            Some(Value::String(value)) => FactValue::Text(value.clone()),
            Some(Value::Number(value)) => FactValue::Text(value.to_string()),
            Some(Value::Null) | None => FactValue::Bool(false),
            Some(other) => FactValue::Bool(json_truthy(other)),
        },
        None => FactValue::Bool(json_truthy(&document)),
    }
}

fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(value) => value.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(value) => !value.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
