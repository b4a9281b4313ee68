//! Unified error handling for the store.

use folio_engine::{CollectionName, RecordId};
use serde::Serialize;

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record violates its schema. Never fatal; carries every message.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("record not found: {collection}/{id}")]
    NotFound {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("engine error: {0}")]
    Engine(#[from] folio_engine::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Broad error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Input violates a schema; fix the input and retry
    Validation,
    /// A referenced record or collection is missing
    NotFound,
    /// Adapter-level failure
    Storage,
    /// Unknown collection or malformed schema; a programming error
    Configuration,
    /// A schema migration transform failed; data stays at its prior version
    Migration,
}

impl StoreError {
    pub fn not_found(collection: impl Into<CollectionName>, id: impl Into<RecordId>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        use folio_engine::Error as Engine;

        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Engine(Engine::InvalidRecord(_) | Engine::InvalidBundle(_)) => {
                ErrorKind::Validation
            }
            StoreError::Engine(Engine::Migration { .. }) => ErrorKind::Migration,
            StoreError::Engine(_) | StoreError::Transaction(_) => ErrorKind::Configuration,
            StoreError::Constraint(_)
            | StoreError::Unavailable(_)
            | StoreError::Backend(_)
            | StoreError::Database(_)
            | StoreError::Migrate(_)
            | StoreError::Io(_)
            | StoreError::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Validation messages, if this is a validation failure.
    pub fn validation_errors(&self) -> Option<&[String]> {
        match self {
            StoreError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
