use std::path::PathBuf;

use thiserror::Error;

/// Core error type for schemata operations.
#[derive(Error, Debug)]
pub enum SchemataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migrations directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Migration {0} not found")]
    VersionNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("No migrations have been applied")]
    NothingApplied,

    #[error("Migration {0} already applied")]
    AlreadyApplied(String),

    #[error("Duplicate migration version: {0}")]
    DuplicateVersion(String),

    #[error("Migration {0} is not applied")]
    NotApplied(String),

    #[error("Migration {0} has no down script")]
    NoDownScript(String),

    #[error("Migration version {0} already exists")]
    AlreadyExists(String),

    #[error("Malformed migration filename '{file}': {reason}")]
    MalformedFilename { file: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Migration {version} failed at statement {statement_index}: {message}")]
    Execution {
        version: String,
        statement_index: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of [`SchemataError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration. Fatal, never retried.
    Configuration,
    /// A version, file, directory or table is absent.
    NotFound,
    /// The requested action conflicts with current state.
    Conflict,
    /// SQL failed at the database; the transaction was rolled back.
    Execution,
    /// Filesystem failure.
    Io,
    /// Anything else.
    Internal,
}

impl SchemataError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::DirectoryNotFound(_)
            | Self::VersionNotFound(_)
            | Self::TableNotFound(_)
            | Self::NothingApplied => ErrorKind::NotFound,
            Self::AlreadyApplied(_)
            | Self::DuplicateVersion(_)
            | Self::NotApplied(_)
            | Self::NoDownScript(_)
            | Self::AlreadyExists(_)
            | Self::MalformedFilename { .. }
            | Self::InvalidArgument(_) => ErrorKind::Conflict,
            Self::Execution { .. } | Self::Sql(_) => ErrorKind::Execution,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// The database's own message for SQL failures, otherwise the display text.
    pub fn backend_message(&self) -> String {
        match self {
            Self::Sql(sqlx::Error::Database(db)) => db.message().to_string(),
            Self::Sql(e) => e.to_string(),
            Self::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this is a primary-key / unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Sql(sqlx::Error::Database(db)) if db.is_unique_violation())
    }
}

impl From<serde_json::Error> for SchemataError {
    fn from(e: serde_json::Error) -> Self {
        SchemataError::Serialization(e.to_string())
    }
}

/// Result type alias using SchemataError.
pub type Result<T> = std::result::Result<T, SchemataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SchemataError::Config("missing user".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SchemataError::VersionNotFound("001".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SchemataError::AlreadyApplied("001".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SchemataError::NoDownScript("001".into()).kind(),
            ErrorKind::Conflict
        );
        let exec = SchemataError::Execution {
            version: "002".into(),
            statement_index: 1,
            message: "no such table: missing".into(),
        };
        assert_eq!(exec.kind(), ErrorKind::Execution);
        assert_eq!(exec.backend_message(), "no such table: missing");
    }

    #[test]
    fn test_execution_display_keeps_message() {
        let err = SchemataError::Execution {
            version: "002".into(),
            statement_index: 0,
            message: "syntax error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 002 failed at statement 0: syntax error"
        );
    }
}
