//! Mirrored entities: local copies of server-owned records.

use crate::{EntityId, EntityType, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// Prefix of identifiers allocated locally before the server assigns one.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Build a provisional identifier from a locally unique suffix.
pub fn provisional_id(suffix: impl std::fmt::Display) -> EntityId {
    format!("{PROVISIONAL_PREFIX}{suffix}")
}

/// Whether an identifier is still provisional.
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

/// Replace every string equal to `from` inside `value` with `to`.
///
/// Used to repoint references (e.g. a milk log's `cow_id`) once a
/// provisional id is resolved. Returns whether anything changed.
pub fn rewrite_references(value: &mut serde_json::Value, from: &str, to: &str) -> bool {
    match value {
        serde_json::Value::String(s) if s == from => {
            *s = to.to_string();
            true
        }
        serde_json::Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| rewrite_references(item, from, to) || changed),
        serde_json::Value::Object(obj) => obj
            .values_mut()
            .fold(false, |changed, item| rewrite_references(item, from, to) || changed),
        _ => false,
    }
}

/// Server-assigned id in a create response: `id` as a number or a non-empty string.
pub fn server_id_of(body: &serde_json::Value) -> Option<EntityId> {
    match body.get("id")? {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// A local copy of a server-owned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredEntity {
    /// Entity type (e.g. "cow", "feed", "diet")
    pub entity_type: EntityType,
    /// Server id once known, provisional id before
    pub id: EntityId,
    /// Local mutation counter, incremented on each local write
    pub version: Version,
    /// Last local or remote change (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Domain fields
    pub payload: serde_json::Value,
    /// No local mutation awaits confirmation
    pub synced: bool,
    /// Tombstone while a delete is queued
    pub deleted: bool,
}

impl MirroredEntity {
    /// A record created locally, not yet confirmed by the server.
    pub fn new_local(
        entity_type: impl Into<EntityType>,
        id: impl Into<EntityId>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            version: 1,
            updated_at: timestamp,
            payload,
            synced: false,
            deleted: false,
        }
    }

    /// A record as received from the server.
    pub fn from_server(
        entity_type: impl Into<EntityType>,
        id: impl Into<EntityId>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            synced: true,
            ..Self::new_local(entity_type, id, payload, timestamp)
        }
    }

    /// Check if the entity is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Check if the entity still carries a provisional id.
    pub fn is_provisional(&self) -> bool {
        is_provisional(&self.id)
    }

    /// Replace the payload with a local edit.
    pub fn update_payload(&mut self, payload: serde_json::Value, timestamp: Timestamp) {
        self.payload = payload;
        self.version += 1;
        self.updated_at = timestamp;
        self.synced = false;
    }

    /// Tombstone the entity until the delete is confirmed.
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.version += 1;
        self.updated_at = timestamp;
        self.synced = false;
    }

    /// Overlay fields returned by the server onto the local payload.
    ///
    /// Server values win for fields present in both; local-only fields survive.
    /// A non-object server payload leaves the local one untouched.
    pub fn merge_server_fields(&mut self, server: &serde_json::Value) {
        let Some(server_fields) = server.as_object() else {
            return;
        };
        match self.payload.as_object_mut() {
            Some(local) => {
                for (key, value) in server_fields {
                    local.insert(key.clone(), value.clone());
                }
            }
            None => self.payload = server.clone(),
        }
    }
}
