//! Database operations for the settings table.

use crate::error::Result;
use fieldsync_engine::Timestamp;
use sqlx::SqliteConnection;

pub async fn get_setting(conn: &mut SqliteConnection, key: &str) -> Result<Option<serde_json::Value>> {
    let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(value,)| value))
}

pub async fn set_setting(
    conn: &mut SqliteConnection,
    key: &str,
    value: &serde_json::Value,
    now: Timestamp,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(now as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
