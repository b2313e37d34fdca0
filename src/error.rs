#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const INTERNAL: &str = "INTERNAL";
}

/// SQLSTATE codes that mean "another transaction got there first".
const CONFLICT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03"];

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classifies a driver failure raised while doing `context`.
    ///
    /// Lock and serialization failures become [`QueueError::ConcurrencyConflict`]
    /// so callers can retry; everything else is a [`QueueError::Storage`].
    pub fn from_sqlx(context: &str, err: &sqlx::Error) -> Self {
        let conflict = err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .is_some_and(|state| CONFLICT_SQLSTATES.contains(&&*state));

        if conflict {
            Self::ConcurrencyConflict(format!("{context}: {err}"))
        } else {
            Self::Storage(format!("{context}: {err}"))
        }
    }

    /// Returns the protocol error code for this error
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Serialization(_) => code::INVALID,
            Self::NotFound { .. } => code::NOTFOUND,
            Self::ConcurrencyConflict(_) => code::CONFLICT,
            Self::Storage(_) | Self::Sqlx(_) => code::INTERNAL,
            Self::Io(_) => code::DEPENDENCY,
        }
    }

    /// Returns the exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Storage(_) | Self::Sqlx(_) => 3,
            Self::Validation(_) => 4,
            Self::NotFound { .. } => 5,
            Self::ConcurrencyConflict(_) => 6,
            Self::Io(_) => 7,
            Self::Serialization(_) => 8,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

/// Protocol error codes as documented in the CLI
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::CLI_ERROR,
        "Invalid CLI usage",
        "Run 'edq --help' for valid options",
    ),
    (
        code::NOTFOUND,
        "Resource was not found",
        "List jobs and verify the identifier",
    ),
    (
        code::INVALID,
        "Invalid request payload",
        "Check required fields and value types",
    ),
    (
        code::CONFLICT,
        "Lost a race with another worker",
        "Retry the operation",
    ),
    (
        code::DEPENDENCY,
        "Missing system dependency",
        "Check file permissions and retry",
    ),
    (
        code::INTERNAL,
        "Storage unavailable or unexpected failure",
        "Inspect logs and check the database connection",
    ),
];

/// Get error code details (description and fix) for a given error code
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(QueueError::Validation("x".into()).code(), code::INVALID);
        assert_eq!(QueueError::not_found("job", 7).code(), code::NOTFOUND);
        assert_eq!(
            QueueError::ConcurrencyConflict("x".into()).code(),
            code::CONFLICT
        );
        assert_eq!(QueueError::Storage("x".into()).code(), code::INTERNAL);
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(QueueError::ConcurrencyConflict("lost".into()).is_retryable());
        assert!(!QueueError::Storage("down".into()).is_retryable());
        assert!(!QueueError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        assert_eq!(
            QueueError::not_found("job", 42).to_string(),
            "job not found: 42"
        );
    }

    #[test]
    fn non_database_driver_errors_are_storage_errors() {
        let err = QueueError::from_sqlx("Failed to claim next job", &sqlx::Error::PoolTimedOut);
        assert!(matches!(err, QueueError::Storage(_)));
        assert!(err.to_string().contains("Failed to claim next job"));
    }

    #[test]
    fn every_code_has_documentation() {
        for code in [
            code::CLI_ERROR,
            code::NOTFOUND,
            code::INVALID,
            code::CONFLICT,
            code::DEPENDENCY,
            code::INTERNAL,
        ] {
            assert!(get_error_info(code).is_some(), "missing info for {code}");
        }
    }
}
