//! Queued mutations awaiting remote application.
//!
//! Changes are expressed as operations, not direct remote calls. Each local
//! write produces one operation; the sequence number assigned at enqueue time
//! is the replay order.

use crate::{error::Result, EntityId, EntityType, Error, Seq, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of mutation an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    /// Storage and wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(OpKind::Create),
            "update" => Ok(OpKind::Update),
            "delete" => Ok(OpKind::Delete),
            other => Err(Error::UnknownOpKind(other.to_string())),
        }
    }
}

/// Queue status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    /// Waiting for the next drain
    Pending,
    /// Rejected by the backend; kept for inspection, skipped by drains
    Failed,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Pending => "pending",
            OpStatus::Failed => "failed",
        }
    }
}

impl FromStr for OpStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OpStatus::Pending),
            "failed" => Ok(OpStatus::Failed),
            other => Err(Error::UnknownOpStatus(other.to_string())),
        }
    }
}

/// A mutation about to be enqueued; the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOperation {
    pub kind: OpKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Payload snapshot at enqueue time (`null` for deletes)
    pub payload: serde_json::Value,
}

impl NewOperation {
    pub fn create(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: OpKind::Create,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
        }
    }

    pub fn update(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: OpKind::Update,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
        }
    }

    pub fn delete(entity_type: impl Into<EntityType>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            kind: OpKind::Delete,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// A durable, ordered record of one local mutation awaiting remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Insertion order; defines replay order
    pub seq: Seq,
    pub kind: OpKind,
    pub entity_type: EntityType,
    /// Provisional or real identifier of the target entity
    pub entity_id: EntityId,
    /// Payload snapshot at enqueue time
    pub payload: serde_json::Value,
    /// Number of failed remote attempts
    pub attempts: u32,
    /// Error from the last failed attempt
    pub last_error: Option<String>,
    pub status: OpStatus,
    /// When it was enqueued (milliseconds since epoch)
    pub enqueued_at: Timestamp,
}

impl PendingOperation {
    /// A fresh pending operation with no attempts.
    pub fn new(
        seq: Seq,
        kind: OpKind,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            seq,
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            attempts: 0,
            last_error: None,
            status: OpStatus::Pending,
            enqueued_at,
        }
    }

    /// Whether the operation was parked after a non-retryable failure.
    pub fn is_failed(&self) -> bool {
        self.status == OpStatus::Failed
    }

    /// Whether the target entity still has a provisional id.
    pub fn targets_provisional(&self) -> bool {
        crate::entity::is_provisional(&self.entity_id)
    }
}
