//! Error types shared by every table and the storage facade.

use crate::storage::SqlType;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Unknown record kind: {0}")]
    UnknownRecordKind(String),

    #[error("Cannot bind value of type {0} as a query parameter")]
    UnsupportedValue(String),

    #[error("No elements remained in the cursor")]
    NoSuchElement,

    #[error("Storage is closed")]
    Closed,

    #[error("Failed to release cursor: {0}")]
    CursorRelease(String),

    #[error("{} resource(s) failed to close: {}", .0.len(), join_errors(.0))]
    Cleanup(Vec<StorageError>),
}

fn join_errors(errors: &[StorageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration errors.
///
/// Raised while a table or the storage is being built, never by a query.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Identifier column cannot have SQL type {0:?}")]
    UnsupportedIdType(SqlType),

    #[error("Identifier column declared as {declared:?} cannot store {actual} identifiers")]
    IdTypeMismatch {
        declared: SqlType,
        actual: &'static str,
    },

    #[error("Required builder field '{0}' is not set")]
    MissingField(&'static str),

    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Unknown SQL dialect: {0}")]
    UnknownDialect(String),
}
