//! Local store on embedded SQLite.
//!
//! Owns the mirrored entities, the queue of mutations awaiting remote
//! application, and app settings. Every local mutation and the queue entry
//! it produces are written in one transaction: either both survive a crash
//! or neither does.

mod entities;
mod pool;
mod queue;
mod settings;

pub use pool::{create_memory_pool, create_pool, run_migrations, Pool};

use crate::error::{Result, SyncError};
use crate::now_millis;
use fieldsync_engine::{
    provisional_id, Catalog, EntityId, MirroredEntity, NewOperation, OpKind, OpStatus, PendingOperation, Seq,
};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;

/// What to do with an operation whose remote attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep it pending at the head of the queue for the next drain
    Requeue,
    /// Mark it failed; drains skip it until it is retried or discarded
    Park,
}

/// Server confirmation of a replayed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Created { server_id: EntityId, server_payload: Value },
    Updated,
    Deleted,
}

/// Handle to the local database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: Pool,
    catalog: Arc<Catalog>,
    /// Signalled after every committed local write that queued an operation
    queued: Arc<Notify>,
}

impl LocalStore {
    /// Open (or create) the database at `database_url` and apply migrations.
    pub async fn open(database_url: &str, catalog: Catalog) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Self::from_pool(pool, catalog).await
    }

    /// A private in-memory store, mostly for tests.
    pub async fn in_memory(catalog: Catalog) -> Result<Self> {
        let pool = create_memory_pool().await?;
        Self::from_pool(pool, catalog).await
    }

    /// Wrap an existing pool, migrating it first.
    pub async fn from_pool(pool: Pool, catalog: Catalog) -> Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self {
            pool,
            catalog: Arc::new(catalog),
            queued: Arc::new(Notify::new()),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Wait until a local write queues an operation.
    ///
    /// A write made while nobody is waiting is remembered, so the next call
    /// returns at once. Several such writes collapse into one wakeup.
    pub async fn queued_write(&self) {
        self.queued.notified().await;
    }

    /// Close all connections. Pending writes are already committed.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Insert or overwrite an entity. Does not touch the queue.
    pub async fn upsert_entity(&self, entity: MirroredEntity) -> Result<MirroredEntity> {
        self.catalog.get(&entity.entity_type)?;
        let mut conn = self.pool.acquire().await?;
        entities::upsert_entity(&mut conn, &entity).await?;
        Ok(entity)
    }

    /// Get an entity by type and id, tombstones included.
    pub async fn get_entity(&self, entity_type: &str, id: &str) -> Result<Option<MirroredEntity>> {
        let mut conn = self.pool.acquire().await?;
        entities::get_entity(&mut conn, entity_type, id).await
    }

    /// Stream the active entities of a type that match `predicate`.
    ///
    /// Rows are read lazily as the stream is polled; each call runs a fresh query.
    pub fn query_entities<'a, F>(&'a self, entity_type: &'a str, predicate: F) -> BoxStream<'a, Result<MirroredEntity>>
    where
        F: Fn(&MirroredEntity) -> bool + Send + 'a,
    {
        sqlx::query_as::<_, entities::StoredEntity>(
            r#"
            SELECT entity_type, id, version, updated_at, payload, synced, deleted
            FROM entities
            WHERE entity_type = ? AND deleted = 0
            ORDER BY updated_at ASC, id ASC
            "#,
        )
        .bind(entity_type)
        .fetch(&self.pool)
        .map_ok(entities::StoredEntity::into_entity)
        .map_err(SyncError::from)
        .try_filter(move |entity| futures::future::ready(predicate(entity)))
        .boxed()
    }

    /// Replace the synced rows of a type with a fresh server listing.
    ///
    /// Rows with local mutations still queued are kept, so nothing the user
    /// wrote offline is lost by a refresh.
    pub async fn replace_collection(&self, entity_type: &str, server_rows: Vec<MirroredEntity>) -> Result<u64> {
        self.catalog.get(entity_type)?;
        let mut tx = self.pool.begin().await?;
        let stored = entities::replace_synced(&mut tx, entity_type, &server_rows).await?;
        tx.commit().await?;

        tracing::info!(entity_type, stored, "Replaced local collection with server rows");
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Apply a local mutation and append its queue entry atomically.
    pub async fn enqueue_operation(&self, op: NewOperation) -> Result<Seq> {
        self.catalog.validate_operation(&op)?;

        let mut tx = self.pool.begin().await?;
        let (seq, _) = apply_and_enqueue(&mut tx, &self.catalog, op, now_millis()).await?;
        tx.commit().await?;
        self.queued.notify_one();
        Ok(seq)
    }

    /// Create an entity under a fresh provisional id and queue its create.
    pub async fn create(&self, entity_type: &str, payload: Value) -> Result<MirroredEntity> {
        let id = provisional_id(uuid::Uuid::new_v4());
        let op = NewOperation::create(entity_type, id, payload);
        self.catalog.validate_operation(&op)?;

        let mut tx = self.pool.begin().await?;
        let (_, entity) = apply_and_enqueue(&mut tx, &self.catalog, op, now_millis()).await?;
        tx.commit().await?;
        self.queued.notify_one();
        Ok(entity)
    }

    /// Overlay `changes` onto an entity and queue the update.
    ///
    /// The merged record must still satisfy the catalog.
    pub async fn update(&self, entity_type: &str, id: &str, changes: Value) -> Result<MirroredEntity> {
        let op = NewOperation::update(entity_type, id, changes);
        self.catalog.validate_operation(&op)?;

        let mut tx = self.pool.begin().await?;
        let (_, entity) = apply_and_enqueue(&mut tx, &self.catalog, op, now_millis()).await?;
        tx.commit().await?;
        self.queued.notify_one();
        Ok(entity)
    }

    /// Delete an entity.
    ///
    /// An entity the server never confirmed is dropped locally together with
    /// its queued operations; nothing is sent. Otherwise the row is tombstoned
    /// and a delete is queued. Returns the queued sequence number, if any.
    pub async fn delete(&self, entity_type: &str, id: &str) -> Result<Option<Seq>> {
        self.catalog.get(entity_type)?;
        let mut tx = self.pool.begin().await?;

        let entity = entities::require_active(&mut tx, entity_type, id).await?;
        let seq = if entity.is_provisional() {
            let dropped = queue::delete_for_entity(&mut tx, entity_type, id, None).await?;
            entities::delete_entity(&mut tx, entity_type, id).await?;
            tracing::debug!(entity_type, id, dropped, "Dropped unconfirmed entity locally");
            None
        } else {
            let op = NewOperation::delete(entity_type, id);
            let (seq, _) = apply_and_enqueue(&mut tx, &self.catalog, op, now_millis()).await?;
            Some(seq)
        };

        tx.commit().await?;
        if seq.is_some() {
            self.queued.notify_one();
        }
        Ok(seq)
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// All pending operations in replay order. Parked operations are excluded.
    pub async fn dequeue_operations(&self) -> Result<Vec<PendingOperation>> {
        let mut conn = self.pool.acquire().await?;
        queue::get_operations(&mut conn, OpStatus::Pending, 0, i64::MAX).await
    }

    /// The first pending operation after `after`, read fresh from disk.
    pub async fn next_pending(&self, after: Seq) -> Result<Option<PendingOperation>> {
        let mut conn = self.pool.acquire().await?;
        let mut ops = queue::get_operations(&mut conn, OpStatus::Pending, after, 1).await?;
        Ok(ops.pop())
    }

    /// Look up a queued operation in any status.
    pub async fn get_operation(&self, seq: Seq) -> Result<Option<PendingOperation>> {
        let mut conn = self.pool.acquire().await?;
        queue::get_operation(&mut conn, seq).await
    }

    /// Remove an operation without touching its entity.
    pub async fn mark_operation_applied(&self, seq: Seq) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        queue::delete_operation(&mut conn, seq).await?;
        Ok(())
    }

    /// Record a failed attempt.
    pub async fn mark_operation_failed(&self, seq: Seq, error: &str, disposition: Disposition) -> Result<()> {
        let status = match disposition {
            Disposition::Requeue => OpStatus::Pending,
            Disposition::Park => OpStatus::Failed,
        };
        let mut conn = self.pool.acquire().await?;
        queue::record_failure(&mut conn, seq, error, status).await
    }

    /// Apply the server's confirmation of `op` and remove it from the queue,
    /// in one transaction.
    pub async fn complete_operation(&self, op: &PendingOperation, completion: Completion) -> Result<()> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let still_queued = queue::delete_operation(&mut tx, op.seq).await?;
        let entity_type = op.entity_type.as_str();

        match completion {
            Completion::Created {
                server_id,
                server_payload,
            } => {
                if !still_queued {
                    // The entity was deleted locally while its create was in flight.
                    entities::delete_entity(&mut tx, entity_type, &op.entity_id).await?;
                    let orphan = NewOperation::delete(entity_type, server_id.clone());
                    let seq = queue::insert_operation(&mut tx, &orphan, now).await?;
                    tracing::warn!(entity_type, server_id = %server_id, seq, "Create confirmed after local delete, queued remote delete");
                } else {
                    resolve_provisional(&mut tx, op, &server_id, &server_payload, now).await?;
                }
            }
            Completion::Updated => {
                if queue::count_for_entity(&mut tx, entity_type, &op.entity_id).await? == 0 {
                    entities::set_synced(&mut tx, entity_type, &op.entity_id).await?;
                }
            }
            Completion::Deleted => {
                entities::delete_entity(&mut tx, entity_type, &op.entity_id).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Operations still waiting to be sent.
    pub async fn pending_count(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        queue::count_by_status(&mut conn, OpStatus::Pending).await
    }

    /// Parked operations awaiting a retry or discard.
    pub async fn failed_count(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        queue::count_by_status(&mut conn, OpStatus::Failed).await
    }

    /// Parked operations, oldest first.
    pub async fn failed_operations(&self) -> Result<Vec<PendingOperation>> {
        let mut conn = self.pool.acquire().await?;
        queue::get_operations(&mut conn, OpStatus::Failed, 0, i64::MAX).await
    }

    /// Move a parked operation back to pending. It keeps its sequence number.
    pub async fn retry_failed(&self, seq: Seq) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        queue::reset_failed(&mut conn, seq).await?;
        self.queued.notify_one();
        Ok(())
    }

    /// Drop an operation for good and settle its entity locally.
    ///
    /// Discarding a create abandons the entity; discarding a delete restores it.
    pub async fn discard_operation(&self, seq: Seq) -> Result<PendingOperation> {
        let mut tx = self.pool.begin().await?;
        let op = queue::get_operation(&mut tx, seq)
            .await?
            .ok_or(SyncError::OperationNotFound(seq))?;
        queue::delete_operation(&mut tx, seq).await?;

        let entity_type = op.entity_type.as_str();
        match op.kind {
            OpKind::Create => {
                queue::delete_for_entity(&mut tx, entity_type, &op.entity_id, None).await?;
                entities::delete_entity(&mut tx, entity_type, &op.entity_id).await?;
            }
            OpKind::Update | OpKind::Delete => {
                if let Some(mut entity) = entities::get_entity(&mut tx, entity_type, &op.entity_id).await? {
                    entity.deleted = false;
                    entity.synced = queue::count_for_entity(&mut tx, entity_type, &op.entity_id).await? == 0;
                    entities::upsert_entity(&mut tx, &entity).await?;
                }
            }
        }

        tx.commit().await?;
        tracing::info!(seq, kind = %op.kind, entity_type, entity_id = %op.entity_id, "Discarded queued operation");
        Ok(op)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Read a setting, if it was ever written.
    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.pool.acquire().await?;
        settings::get_setting(&mut conn, key).await
    }

    pub async fn set_setting(&self, key: &str, value: &Value) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        settings::set_setting(&mut conn, key, value, now_millis()).await
    }

    /// Wipe entities, queue and settings, e.g. on logout.
    pub async fn clear_user_data(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["entities", "pending_operations", "settings"] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!("Cleared local user data");
        Ok(())
    }
}

/// Apply a local mutation to its entity and append the queue entry.
async fn apply_and_enqueue(
    conn: &mut sqlx::SqliteConnection,
    catalog: &Catalog,
    mut op: NewOperation,
    now: u64,
) -> Result<(Seq, MirroredEntity)> {
    let entity = match op.kind {
        OpKind::Create => {
            let entity = MirroredEntity::new_local(op.entity_type.clone(), op.entity_id.clone(), op.payload.clone(), now);
            entities::upsert_entity(conn, &entity).await?;
            entity
        }
        OpKind::Update => {
            let mut entity = entities::require_active(conn, &op.entity_type, &op.entity_id).await?;
            let merged = overlay(&entity.payload, &op.payload);
            catalog.get(&op.entity_type)?.validate_payload(&merged)?;
            entity.update_payload(merged.clone(), now);
            entities::upsert_entity(conn, &entity).await?;
            // Replay sends the full record so a lost earlier update cannot leave gaps.
            op.payload = merged;
            entity
        }
        OpKind::Delete => {
            let mut entity = entities::require_active(conn, &op.entity_type, &op.entity_id).await?;
            queue::delete_for_entity(conn, &op.entity_type, &op.entity_id, Some(OpKind::Update.as_str())).await?;
            entity.mark_deleted(now);
            entities::upsert_entity(conn, &entity).await?;
            entity
        }
    };

    let seq = queue::insert_operation(conn, &op, now).await?;
    tracing::debug!(seq, kind = %op.kind, entity_type = %op.entity_type, entity_id = %op.entity_id, "Queued local mutation");
    Ok((seq, entity))
}

/// Re-key a confirmed create from its provisional id to the server id and
/// repoint everything that referenced the provisional id.
async fn resolve_provisional(
    conn: &mut sqlx::SqliteConnection,
    op: &PendingOperation,
    server_id: &str,
    server_payload: &Value,
    now: u64,
) -> Result<()> {
    let entity_type = op.entity_type.as_str();
    let provisional = op.entity_id.as_str();

    let mut entity = entities::get_entity(conn, entity_type, provisional)
        .await?
        .unwrap_or_else(|| MirroredEntity::new_local(entity_type, provisional, op.payload.clone(), now));
    entity.id = server_id.to_string();
    entity.updated_at = now;
    entity.merge_server_fields(server_payload);

    if provisional == server_id {
        entity.synced = queue::count_for_entity(conn, entity_type, provisional).await? == 0;
        return entities::upsert_entity(conn, &entity).await;
    }

    entities::delete_entity(conn, entity_type, provisional).await?;
    let retargeted = queue::retarget(conn, entity_type, provisional, server_id).await?;
    entity.synced = retargeted == 0;
    entities::upsert_entity(conn, &entity).await?;

    let queued = queue::rewrite_payload_references(conn, provisional, server_id).await?;
    let mirrored = entities::rewrite_payload_references(conn, provisional, server_id).await?;

    tracing::debug!(
        entity_type,
        provisional,
        server_id,
        retargeted,
        queued,
        mirrored,
        "Resolved provisional id"
    );
    Ok(())
}

/// Overlay the fields of `changes` onto `base`. Non-object changes replace.
fn overlay(base: &Value, changes: &Value) -> Value {
    match (base, changes) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged = base.clone();
            for (key, value) in changes {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => changes.clone(),
    }
}
