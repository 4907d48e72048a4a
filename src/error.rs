//! Error types for `upsert_race`.
//!
//! Two layers:
//! - [`SessionError`] - a single database session operation failed
//! - [`RaceError`] - what the harness surfaces to its caller

use thiserror::Error;
use upsert_model::ModelError;
use uuid::Uuid;

/// SQLSTATE reported for serialization failures.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Failure of one operation on a database session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Could not open the session.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The statement text was rejected.
    #[error("prepare failed: {0}")]
    Prepare(String),

    /// A parameter could not be bound (1-indexed).
    #[error("bind failed for parameter ${index}: {reason}")]
    Bind { index: usize, reason: String },

    /// The server reported an error while running `operation`.
    #[error("{operation} failed{}: {message}", code_suffix(.code.as_deref()))]
    Database {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },

    /// The call is not valid in the session's current state.
    #[error("invalid session state: {0}")]
    State(String),
}

fn code_suffix(code: Option<&str>) -> String {
    code.map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl SessionError {
    #[must_use]
    pub fn database(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Database {
            operation,
            code: None,
            message: message.into(),
        }
    }

    /// SQLSTATE code, when the server supplied one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_serialization_failure(&self) -> bool {
        self.code() == Some(SERIALIZATION_FAILURE)
    }
}

/// A post-condition the verifier found violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    #[error("expected exactly one event row, found {found}")]
    RowCount { found: usize },

    #[error("expected id {expected}, found {found}")]
    Id { expected: Uuid, found: Uuid },

    #[error("expected version {expected}, found {found}")]
    Version { expected: i64, found: i64 },

    #[error("expected name {expected:?}, found {found:?}")]
    Name { expected: String, found: String },
}

/// Primary error type for harness operations.
#[derive(Error, Debug)]
pub enum RaceError {
    /// Statement preparation or parameter binding was rejected.
    #[error("Invalid configuration: {context}: {source}")]
    InvalidConfiguration {
        context: &'static str,
        #[source]
        source: SessionError,
    },

    /// Session operation failed outside an Upserter.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The stored row does not match the race's expected outcome.
    #[error("Verification failed: {0}")]
    VerificationFailed(#[from] Mismatch),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Row or value validation failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RaceError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    #[must_use]
    pub const fn invalid_configuration(context: &'static str, source: SessionError) -> Self {
        Self::InvalidConfiguration { context, source }
    }
}

/// Result type using `RaceError`.
pub type Result<T> = std::result::Result<T, RaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display_includes_code() {
        let err = SessionError::Database {
            operation: "commit",
            code: Some(SERIALIZATION_FAILURE.to_string()),
            message: "could not serialize access".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "commit failed [40001]: could not serialize access"
        );
        assert!(err.is_serialization_failure());
    }

    #[test]
    fn test_database_error_without_code() {
        let err = SessionError::database("execute", "connection reset");
        assert_eq!(err.to_string(), "execute failed: connection reset");
        assert_eq!(err.code(), None);
        assert!(!err.is_serialization_failure());
    }

    #[test]
    fn test_invalid_configuration_keeps_source() {
        let err = RaceError::invalid_configuration(
            "failed to bind upsert parameters",
            SessionError::Bind {
                index: 3,
                reason: "expected bigint, got text".to_string(),
            },
        );
        let text = err.to_string();
        assert!(text.starts_with("Invalid configuration: failed to bind upsert parameters"));
        assert!(text.contains("$3"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
