//! Error types for the Folio engine.

use crate::{CollectionName, SchemaVersion};
use thiserror::Error;

/// All possible errors from the Folio engine.
///
/// Validation failures are not errors: they are reported as message lists by
/// [`crate::validate_record`]. Everything here is either a configuration
/// problem or a failed migration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("schema not found for collection: {0}")]
    SchemaNotFound(CollectionName),

    #[error("schema already registered for collection: {0}")]
    DuplicateSchema(CollectionName),

    #[error("invalid schema for '{collection}': {reason}")]
    InvalidSchema {
        collection: CollectionName,
        reason: String,
    },

    // Data errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid export bundle: {0}")]
    InvalidBundle(String),

    // Migration errors
    #[error("migration to version {version} of '{collection}' failed: {reason}")]
    Migration {
        collection: CollectionName,
        version: SchemaVersion,
        reason: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::InvalidSchema`].
    pub fn invalid_schema(
        collection: impl Into<CollectionName>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSchema {
            collection: collection.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::SchemaNotFound("ap/invoice".into());
        assert_eq!(err.to_string(), "schema not found for collection: ap/invoice");

        let err = Error::Migration {
            collection: "inv/item".into(),
            version: 3,
            reason: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration to version 3 of 'inv/item' failed: boom"
        );

        let err = Error::invalid_schema("inv/item", "duplicate field 'sku'");
        assert_eq!(
            err.to_string(),
            "invalid schema for 'inv/item': duplicate field 'sku'"
        );
    }
}
