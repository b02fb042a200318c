//! Database operations for the pending_operations table.

use crate::error::{Result, SyncError};
use fieldsync_engine::{NewOperation, OpStatus, PendingOperation, Seq, Timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

const OPERATION_COLUMNS: &str =
    "seq, kind, entity_type, entity_id, payload, attempts, last_error, status, enqueued_at";

/// A stored operation row from the database.
#[derive(Debug)]
pub struct StoredOperation {
    pub seq: i64,
    pub kind: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub status: String,
    pub enqueued_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOperation {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            seq: row.try_get("seq")?,
            kind: row.try_get("kind")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            payload: row.try_get("payload")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            status: row.try_get("status")?,
            enqueued_at: row.try_get("enqueued_at")?,
        })
    }
}

impl StoredOperation {
    /// Convert database row to a PendingOperation.
    pub fn to_operation(&self) -> Result<PendingOperation> {
        Ok(PendingOperation {
            seq: self.seq,
            kind: self.kind.parse()?,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            payload: self.payload.clone(),
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error.clone(),
            status: self.status.parse()?,
            enqueued_at: self.enqueued_at.max(0) as u64,
        })
    }
}

/// Append an operation. Returns its sequence number.
pub async fn insert_operation(conn: &mut SqliteConnection, op: &NewOperation, now: Timestamp) -> Result<Seq> {
    let result = sqlx::query(
        r#"
        INSERT INTO pending_operations (kind, entity_type, entity_id, payload, attempts, status, enqueued_at)
        VALUES (?, ?, ?, ?, 0, 'pending', ?)
        "#,
    )
    .bind(op.kind.as_str())
    .bind(&op.entity_type)
    .bind(&op.entity_id)
    .bind(&op.payload)
    .bind(now as i64)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_operation(conn: &mut SqliteConnection, seq: Seq) -> Result<Option<PendingOperation>> {
    let row = sqlx::query_as::<_, StoredOperation>(&format!(
        "SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE seq = ?"
    ))
    .bind(seq)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| r.to_operation()).transpose()
}

/// Get operations with the given status in sequence order, starting after `after`.
pub async fn get_operations(
    conn: &mut SqliteConnection,
    status: OpStatus,
    after: Seq,
    limit: i64,
) -> Result<Vec<PendingOperation>> {
    let rows = sqlx::query_as::<_, StoredOperation>(&format!(
        "SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE status = ? AND seq > ? ORDER BY seq ASC LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(after)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(StoredOperation::to_operation).collect()
}

pub async fn delete_operation(conn: &mut SqliteConnection, seq: Seq) -> Result<bool> {
    let result = sqlx::query("DELETE FROM pending_operations WHERE seq = ?")
        .bind(seq)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt and set the resulting status.
pub async fn record_failure(conn: &mut SqliteConnection, seq: Seq, error: &str, status: OpStatus) -> Result<()> {
    let result = sqlx::query(
        "UPDATE pending_operations SET attempts = attempts + 1, last_error = ?, status = ? WHERE seq = ?",
    )
    .bind(error)
    .bind(status.as_str())
    .bind(seq)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SyncError::OperationNotFound(seq));
    }
    Ok(())
}

/// Move a parked operation back to pending.
pub async fn reset_failed(conn: &mut SqliteConnection, seq: Seq) -> Result<()> {
    let result = sqlx::query("UPDATE pending_operations SET status = 'pending' WHERE seq = ? AND status = 'failed'")
        .bind(seq)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(SyncError::OperationNotFound(seq));
    }
    Ok(())
}

pub async fn count_by_status(conn: &mut SqliteConnection, status: OpStatus) -> Result<u64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_operations WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}

/// Number of queued operations (any status) for one entity.
pub async fn count_for_entity(conn: &mut SqliteConnection, entity_type: &str, entity_id: &str) -> Result<u64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pending_operations WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type)
            .bind(entity_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count.max(0) as u64)
}

/// Drop queued operations of an entity, optionally only those of one kind.
pub async fn delete_for_entity(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    kind: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM pending_operations WHERE entity_type = ? AND entity_id = ? AND (? IS NULL OR kind = ?)",
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(kind)
    .bind(kind)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Point every queued operation of `from` at `to`.
pub async fn retarget(conn: &mut SqliteConnection, entity_type: &str, from: &str, to: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE pending_operations SET entity_id = ? WHERE entity_type = ? AND entity_id = ?")
        .bind(to)
        .bind(entity_type)
        .bind(from)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Replace `from` with `to` inside every queued payload that mentions it.
pub async fn rewrite_payload_references(conn: &mut SqliteConnection, from: &str, to: &str) -> Result<u64> {
    let rows: Vec<(i64, serde_json::Value)> =
        sqlx::query_as("SELECT seq, payload FROM pending_operations WHERE instr(payload, ?) > 0")
            .bind(from)
            .fetch_all(&mut *conn)
            .await?;

    let mut rewritten = 0;
    for (seq, mut payload) in rows {
        if fieldsync_engine::rewrite_references(&mut payload, from, to) {
            sqlx::query("UPDATE pending_operations SET payload = ? WHERE seq = ?")
                .bind(&payload)
                .bind(seq)
                .execute(&mut *conn)
                .await?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}
