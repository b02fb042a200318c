//! Unified error handling for the client.

use crate::config::ConfigError;
use fieldsync_engine::{classify_status, extract_detail, EntityId, EntityType, FailureKind, Seq};

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Storage migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt stored value: {0}")]
    CorruptData(String),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The request went out but no response came back.
    #[error("No response after sending: {0}")]
    ResponseLost(String),

    #[error("Server error ({status}): {detail}")]
    ServerError { status: u16, detail: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rejected by server ({status}): {detail}")]
    ValidationRejected { status: u16, detail: String },

    #[error("Unexpected response shape: {0}")]
    AdapterMismatch(String),

    #[error("Entity not found: {entity_type}/{id}")]
    EntityNotFound { entity_type: EntityType, id: EntityId },

    #[error("Operation not found: {0}")]
    OperationNotFound(Seq),

    #[error("Invalid operation: {0}")]
    Invalid(#[from] fieldsync_engine::Error),

    #[error("Offline")]
    Offline,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Build the error for a non-success response.
    pub fn from_response(status: u16, body: &serde_json::Value) -> Self {
        let detail = extract_detail(body);
        match classify_status(status, body) {
            Some(FailureKind::Unauthorized) => SyncError::Unauthorized(detail),
            Some(FailureKind::ServerError) => SyncError::ServerError { status, detail },
            _ => SyncError::ValidationRejected { status, detail },
        }
    }

    /// Position in the failure taxonomy, `None` for local usage errors.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SyncError::StorageUnavailable(_) | SyncError::Migration(_) | SyncError::CorruptData(_) => {
                Some(FailureKind::StorageUnavailable)
            }
            SyncError::NetworkUnreachable(_) | SyncError::ResponseLost(_) | SyncError::Offline => {
                Some(FailureKind::NetworkUnreachable)
            }
            SyncError::ServerError { .. } => Some(FailureKind::ServerError),
            SyncError::Unauthorized(_) => Some(FailureKind::Unauthorized),
            SyncError::ValidationRejected { .. } => Some(FailureKind::ValidationRejected),
            SyncError::AdapterMismatch(_) => Some(FailureKind::AdapterMismatch),
            SyncError::EntityNotFound { .. }
            | SyncError::OperationNotFound(_)
            | SyncError::Invalid(_)
            | SyncError::Config(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::ServerError { status, .. } | SyncError::ValidationRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::CorruptData(e.to_string())
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_mapping() {
        let err = SyncError::from_response(422, &json!({"detail": "name is required"}));
        assert!(matches!(&err, SyncError::ValidationRejected { status: 422, detail } if detail == "name is required"));
        assert_eq!(err.kind(), Some(FailureKind::ValidationRejected));

        let err = SyncError::from_response(503, &json!({"message": "maintenance"}));
        assert_eq!(err.kind(), Some(FailureKind::ServerError));
        assert_eq!(err.status(), Some(503));

        let err = SyncError::from_response(403, &json!({"detail": "Could not validate token"}));
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[test]
    fn error_display() {
        let err = SyncError::EntityNotFound {
            entity_type: "cow".into(),
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "Entity not found: cow/42");
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn lost_response_is_a_network_failure() {
        let err = SyncError::ResponseLost("operation timed out".into());
        assert_eq!(err.kind(), Some(FailureKind::NetworkUnreachable));
        assert_eq!(err.to_string(), "No response after sending: operation timed out");
    }

    #[test]
    fn storage_errors_are_classified() {
        let err = SyncError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), Some(FailureKind::StorageUnavailable));
    }
}
