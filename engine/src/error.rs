//! Error types for the FieldSync engine.

use crate::{EntityId, EntityType};
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Catalog errors
    #[error("unknown entity type: {0}")]
    UnknownEntityType(EntityType),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Operation errors
    #[error("unknown operation kind: {0}")]
    UnknownOpKind(String),

    #[error("unknown operation status: {0}")]
    UnknownOpStatus(String),

    #[error("operation on provisional id {0} cannot be sent before its create is applied")]
    UnresolvedProvisionalId(EntityId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownEntityType("goats".into());
        assert_eq!(err.to_string(), "unknown entity type: goats");

        let err = Error::TypeMismatch {
            field: "weight_kg".into(),
            expected: "float".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'weight_kg': expected float, got string"
        );

        let err = Error::UnresolvedProvisionalId("local-1".into());
        assert!(err.to_string().contains("local-1"));
    }
}
