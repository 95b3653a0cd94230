//! Error taxonomy for the execution engine.
//!
//! Load-phase errors (`Config`, `Inventory`) are detected before any host is
//! contacted and map to exit code 2; everything else surfaces during a run
//! and maps to exit code 1. A guard that evaluates false is not an error and
//! never appears here.

use thiserror::Error;

/// Errors produced by loading, validation, and plan execution.
#[derive(Error, Debug)]
pub enum HadesError {
    /// Parse, merge, validation, or `${VAR}` resolution failure.
    #[error("config error: {0}")]
    Config(String),

    /// Unknown target group or host reference.
    #[error("inventory error: {0}")]
    Inventory(String),

    /// SSH dial, auth, or session failure; also non-zero remote exits
    /// surfaced by actions that require success.
    #[error("transport error: {0}")]
    Transport(String),

    /// An action failed on a host. Carries the action index and kind so the
    /// operator can find the failing entry in the job definition.
    #[error("action [{index}] {kind} failed: {message}")]
    Action {
        index: usize,
        kind: String,
        message: String,
    },

    /// HTTP fetch failure (Gpg action).
    #[error("http error: {0}")]
    Http(String),

    /// Local filesystem failure with the path or operation that failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled, either by a failing sibling host or by the
    /// operator.
    #[error("run cancelled")]
    Cancelled,
}

impl HadesError {
    pub fn config(msg: impl Into<String>) -> Self {
        HadesError::Config(msg.into())
    }

    pub fn inventory(msg: impl Into<String>) -> Self {
        HadesError::Inventory(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        HadesError::Transport(msg.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HadesError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error belongs to the load phase (exit code 2).
    pub fn is_load_error(&self) -> bool {
        matches!(self, HadesError::Config(_) | HadesError::Inventory(_))
    }
}

pub type Result<T> = std::result::Result<T, HadesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_are_config_and_inventory() {
        assert!(HadesError::config("x").is_load_error());
        assert!(HadesError::inventory("x").is_load_error());
        assert!(!HadesError::transport("x").is_load_error());
        assert!(!HadesError::Cancelled.is_load_error());
    }

    #[test]
    fn action_error_names_index_and_kind() {
        let err = HadesError::Action {
            index: 2,
            kind: "copy".to_string(),
            message: "no such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[2]"));
        assert!(msg.contains("copy"));
        assert!(msg.contains("no such file"));
    }
}
