//! Database operations for the entities table.

use crate::error::{Result, SyncError};
use fieldsync_engine::MirroredEntity;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

pub(crate) const ENTITY_COLUMNS: &str = "entity_type, id, version, updated_at, payload, synced, deleted";

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub entity_type: String,
    pub id: String,
    pub version: i64,
    pub updated_at: i64,
    pub payload: serde_json::Value,
    pub synced: bool,
    pub deleted: bool,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntity {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            entity_type: row.try_get("entity_type")?,
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
            payload: row.try_get("payload")?,
            synced: row.try_get("synced")?,
            deleted: row.try_get("deleted")?,
        })
    }
}

impl StoredEntity {
    /// Convert database row to a MirroredEntity.
    pub fn into_entity(self) -> MirroredEntity {
        MirroredEntity {
            entity_type: self.entity_type,
            id: self.id,
            version: self.version.max(0) as u64,
            updated_at: self.updated_at.max(0) as u64,
            payload: self.payload,
            synced: self.synced,
            deleted: self.deleted,
        }
    }
}

/// Upsert an entity (insert or overwrite).
pub async fn upsert_entity(conn: &mut SqliteConnection, entity: &MirroredEntity) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO entities (entity_type, id, version, updated_at, payload, synced, deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (entity_type, id) DO UPDATE SET
            version = excluded.version,
            updated_at = excluded.updated_at,
            payload = excluded.payload,
            synced = excluded.synced,
            deleted = excluded.deleted
        "#,
    )
    .bind(&entity.entity_type)
    .bind(&entity.id)
    .bind(entity.version as i64)
    .bind(entity.updated_at as i64)
    .bind(&entity.payload)
    .bind(entity.synced)
    .bind(entity.deleted)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get an entity by type and ID, tombstones included.
pub async fn get_entity(conn: &mut SqliteConnection, entity_type: &str, id: &str) -> Result<Option<MirroredEntity>> {
    let row = sqlx::query_as::<_, StoredEntity>(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_type = ? AND id = ?"
    ))
    .bind(entity_type)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(StoredEntity::into_entity))
}

/// Get an entity that must exist and not be tombstoned.
pub async fn require_active(conn: &mut SqliteConnection, entity_type: &str, id: &str) -> Result<MirroredEntity> {
    match get_entity(conn, entity_type, id).await? {
        Some(entity) if entity.is_active() => Ok(entity),
        _ => Err(SyncError::EntityNotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }),
    }
}

pub async fn delete_entity(conn: &mut SqliteConnection, entity_type: &str, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM entities WHERE entity_type = ? AND id = ?")
        .bind(entity_type)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_synced(conn: &mut SqliteConnection, entity_type: &str, id: &str) -> Result<()> {
    sqlx::query("UPDATE entities SET synced = 1 WHERE entity_type = ? AND id = ?")
        .bind(entity_type)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace `from` with `to` in the payload of every entity that mentions it.
pub async fn rewrite_payload_references(conn: &mut SqliteConnection, from: &str, to: &str) -> Result<u64> {
    let rows = sqlx::query_as::<_, StoredEntity>(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE instr(payload, ?) > 0"
    ))
    .bind(from)
    .fetch_all(&mut *conn)
    .await?;

    let mut rewritten = 0;
    for row in rows {
        let mut entity = row.into_entity();
        if fieldsync_engine::rewrite_references(&mut entity.payload, from, to) {
            sqlx::query("UPDATE entities SET payload = ? WHERE entity_type = ? AND id = ?")
                .bind(&entity.payload)
                .bind(&entity.entity_type)
                .bind(&entity.id)
                .execute(&mut *conn)
                .await?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Replace the synced rows of a type with server rows; rows carrying local
/// mutations are left alone. Returns the number of server rows stored.
pub async fn replace_synced(
    conn: &mut SqliteConnection,
    entity_type: &str,
    server_rows: &[MirroredEntity],
) -> Result<u64> {
    sqlx::query("DELETE FROM entities WHERE entity_type = ? AND synced = 1")
        .bind(entity_type)
        .execute(&mut *conn)
        .await?;

    let mut stored = 0;
    for entity in server_rows {
        let result = sqlx::query(
            r#"
            INSERT INTO entities (entity_type, id, version, updated_at, payload, synced, deleted)
            VALUES (?, ?, ?, ?, ?, 1, 0)
            ON CONFLICT (entity_type, id) DO NOTHING
            "#,
        )
        .bind(entity_type)
        .bind(&entity.id)
        .bind(entity.version as i64)
        .bind(entity.updated_at as i64)
        .bind(&entity.payload)
        .execute(&mut *conn)
        .await?;
        stored += result.rows_affected();
    }
    Ok(stored)
}
