//! Error taxonomy of a converge run
//!
//! Lower layers use `anyhow` with context; the bootstrap procedure classifies
//! the failure of each step into one of these variants before it bubbles up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Invalid configuration, playbook or role definition
    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),

    /// A required package or tool is missing and could not be installed
    #[error("dependency error: {0:#}")]
    Dependency(anyhow::Error),

    /// Repository clone or update failed
    #[error("repository error: {0:#}")]
    Network(anyhow::Error),

    /// The secrets manager is not usable
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A task failed while converging
    #[error("task failed: {0:#}")]
    Task(anyhow::Error),
}

impl ConvergeError {
    /// Whether the run can continue in a degraded mode after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConvergeError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("Failed to fetch from origin");
        let converge = ConvergeError::Network(err);
        assert_eq!(
            converge.to_string(),
            "repository error: Failed to fetch from origin: connection refused"
        );
        assert!(converge.is_fatal());
    }

    #[test]
    fn test_authentication_is_not_fatal() {
        let err = ConvergeError::Authentication("op is not signed in".to_string());
        assert!(!err.is_fatal());
    }
}
