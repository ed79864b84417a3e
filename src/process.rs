//! External command execution
//!
//! Every probe, task and bootstrap step that shells out goes through the
//! [`CommandRunner`] trait so the converge procedure can be driven against a
//! scripted runner in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

/// A command to run: program, arguments and execution environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Output carries secrets and must not be written to the command log
    pub redact_output: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Run `command` through `sh -c`
    pub fn shell(command: &str) -> Self {
        Self::new("sh").arg("-c").arg(command)
    }

    /// Split `command` with shell quoting rules and run it without a shell
    pub fn parse(command: &str) -> Result<Self> {
        let parts = shlex::split(command)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse command: {}", command))?;

        let (program, args) = parts
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty command"))?;

        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn redacted(mut self) -> Self {
        self.redact_output = true;
        self
    }

    /// Human readable command line, used in logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, as written to the command log
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Runs external commands to completion
///
/// Implementations return `Err` only when the command could not be started;
/// a non-zero exit is reported through [`CommandOutput::status`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute command: {}", command.display()))?;

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for command: {}", command.display()))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a command and turn a non-zero exit into an error carrying its output
pub async fn run_checked(runner: &dyn CommandRunner, command: &CommandSpec) -> Result<CommandOutput> {
    let output = runner.run(command).await?;
    if !output.success() {
        return Err(anyhow::anyhow!(
            "Command failed with exit code {}: {}\nstdout: {}\nstderr: {}",
            output
                .status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            command.display(),
            if command.redact_output {
                "(withheld)"
            } else {
                output.stdout.trim_end()
            },
            output.stderr.trim_end()
        ));
    }
    Ok(output)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_with_quotes() {
        let spec = CommandSpec::parse("git config --global user.name 'Jane Doe'").unwrap();
        assert_eq!(spec.program, "git");
        assert_eq!(
            spec.args,
            vec!["config", "--global", "user.name", "Jane Doe"]
        );
    }

    #[test]
    fn test_parse_empty_command() {
        assert!(CommandSpec::parse("   ").is_err());
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            status: Some(1),
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let output = SystemRunner
            .run(&CommandSpec::shell("echo hello; echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let err = run_checked(&SystemRunner, &CommandSpec::shell("echo broken >&2; exit 2"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 2"));
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let result = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-real-program-xyz"))
            .await;
        assert!(result.is_err());
    }
}
