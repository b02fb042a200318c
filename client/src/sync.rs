//! Sync engine: replays the local queue against the backend.
//!
//! A drain walks pending operations strictly in sequence order, one at a
//! time. Transient failures halt the drain with the failed operation left at
//! the head of the queue; permanent failures park the operation and the drain
//! moves on. Only one drain runs at a time: a trigger that arrives while
//! draining is coalesced into one extra pass.
//!
//! Conflicts are resolved last-write-wins: a queued update overwrites
//! whatever the server holds when it is replayed.

use crate::connectivity::{ConnectivityEvent, ConnectivityHandle};
use crate::error::{Result, SyncError};
use crate::http::HttpClient;
use crate::now_millis;
use crate::store::{Completion, Disposition, LocalStore};
use fieldsync_engine::{
    build_request, server_id_of, ApiRequest, FailureKind, MirroredEntity, OpKind, PendingOperation, Seq,
    Timestamp,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Whether a drain is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Draining,
}

/// Observable sync progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Percentage of the current drain's operations handled (0-100)
    pub progress: u8,
    /// Operations waiting to be replayed
    pub pending: u64,
    /// Parked operations
    pub failed: u64,
    /// End of the last drain that emptied the queue (milliseconds since epoch)
    pub last_sync: Option<Timestamp>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            progress: 0,
            pending: 0,
            failed: 0,
            last_sync: None,
        }
    }
}

/// Why a drain stopped before the queue was empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Connectivity dropped
    Offline,
    /// A transient failure on the operation now at the head of the queue
    Failed { seq: Seq, kind: FailureKind },
}

/// Outcome of a drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations confirmed by the backend, in replay order
    pub applied: Vec<Seq>,
    /// Operations parked after a permanent failure
    pub parked: Vec<Seq>,
    pub halted: Option<HaltReason>,
    /// Passes over the queue, more than one when triggers were coalesced
    pub passes: u32,
    /// Another drain was running; this trigger was folded into it
    pub coalesced: bool,
}

/// What happened to one operation.
enum Step {
    Applied,
    Parked,
    Halt(FailureKind),
}

/// Replays the local queue whenever connectivity allows.
pub struct SyncEngine {
    store: LocalStore,
    http: HttpClient,
    connectivity: ConnectivityHandle,
    status: watch::Sender<SyncStatus>,
    drain_lock: Mutex<()>,
    rerun: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: LocalStore, http: HttpClient, connectivity: ConnectivityHandle) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            http,
            connectivity,
            status,
            drain_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Create an engine wrapped in Arc for the background loop.
    pub fn new_shared(store: LocalStore, http: HttpClient, connectivity: ConnectivityHandle) -> Arc<Self> {
        Arc::new(Self::new(store, http, connectivity))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Read-only view of the sync status.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Drain once now, then again on every offline-to-online edge and after
    /// every local write made while online.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.connectivity.subscribe();

        tokio::spawn(async move {
            self.run_triggered("startup").await;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ConnectivityEvent::CameOnline) => self.run_triggered("online").await,
                        Ok(ConnectivityEvent::WentOffline) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Missed connectivity events, draining");
                            self.run_triggered("lagged").await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    () = self.store.queued_write() => {
                        // Offline writes wait for the next online edge.
                        if self.connectivity.is_online() {
                            self.run_triggered("local write").await;
                        }
                    }
                }
            }
            tracing::debug!("Sync loop stopped");
        })
    }

    async fn run_triggered(&self, trigger: &'static str) {
        match self.drain().await {
            Ok(report) => tracing::info!(
                trigger,
                applied = report.applied.len(),
                parked = report.parked.len(),
                halted = ?report.halted,
                passes = report.passes,
                "Drain finished"
            ),
            Err(e) => tracing::error!(trigger, error = %e, "Drain aborted"),
        }
    }

    /// Replay pending operations until the queue is empty or a transient
    /// failure halts the drain.
    ///
    /// Storage failures abort the drain and are returned; nothing is lost,
    /// the queue is re-read on the next drain.
    pub async fn drain(&self) -> Result<DrainReport> {
        self.rerun.store(true, Ordering::SeqCst);
        let mut report = DrainReport::default();

        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                tracing::debug!("Drain already running, coalescing trigger");
                report.coalesced = true;
                return Ok(report);
            };

            let outcome = self.drain_passes(&mut report).await;
            let counts = self.refresh_counts(report.halted.is_none() && outcome.is_ok()).await;
            drop(guard);

            outcome?;
            counts?;
            // A trigger may have landed between the last pass and the unlock.
            if report.halted.is_some() || !self.rerun.load(Ordering::SeqCst) {
                return Ok(report);
            }
        }
    }

    async fn drain_passes(&self, report: &mut DrainReport) -> Result<()> {
        while self.rerun.swap(false, Ordering::SeqCst) {
            report.passes += 1;
            self.drain_pass(report).await?;
            if report.halted.is_some() {
                self.rerun.store(false, Ordering::SeqCst);
                break;
            }
        }
        Ok(())
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> Result<()> {
        let total = self.store.pending_count().await?;
        let mut handled = 0u64;
        let mut cursor: Seq = 0;
        self.publish(|s| {
            s.state = SyncState::Draining;
            s.progress = 0;
        });

        // Re-read the queue before every step: completions rewrite later
        // operations, and the user may enqueue or discard while we run.
        while let Some(op) = self.store.next_pending(cursor).await? {
            if !self.connectivity.is_online() {
                tracing::info!(seq = op.seq, "Offline, halting drain");
                report.halted = Some(HaltReason::Offline);
                break;
            }
            cursor = op.seq;

            match self.replay(&op).await? {
                Step::Applied => report.applied.push(op.seq),
                Step::Parked => report.parked.push(op.seq),
                Step::Halt(kind) => {
                    report.halted = Some(HaltReason::Failed { seq: op.seq, kind });
                    break;
                }
            }

            handled += 1;
            let progress = (handled * 100 / total.max(handled)).min(100) as u8;
            self.publish(|s| s.progress = progress);
        }
        Ok(())
    }

    /// Replay one operation and record the outcome in the store.
    async fn replay(&self, op: &PendingOperation) -> Result<Step> {
        if op.kind != OpKind::Create && op.targets_provisional() {
            let reason = format!("create of {} {} has not been applied", op.entity_type, op.entity_id);
            return self.park(op, &reason).await;
        }

        let request = match build_request(self.store.catalog(), op) {
            Ok(request) => request,
            Err(e) => return self.park(op, &e.to_string()).await,
        };

        tracing::debug!(seq = op.seq, kind = %op.kind, entity_type = %op.entity_type, entity_id = %op.entity_id, "Replaying operation (last write wins)");

        let result = match self.http.send(&request).await {
            Ok(response) => self.completion_for(op, response.body),
            // The backend no longer has it; the delete is done.
            Err(SyncError::ValidationRejected { status: 404, .. }) if op.kind == OpKind::Delete => {
                Ok(Completion::Deleted)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(completion) => {
                self.store.complete_operation(op, completion).await?;
                tracing::debug!(seq = op.seq, "Operation applied");
                Ok(Step::Applied)
            }
            Err(e) => self.handle_failure(op, &request, e).await,
        }
    }

    fn completion_for(&self, op: &PendingOperation, body: serde_json::Value) -> Result<Completion> {
        match op.kind {
            OpKind::Create => {
                let server_id = server_id_of(&body).ok_or_else(|| {
                    SyncError::AdapterMismatch(format!("create response for {} has no id", op.entity_type))
                })?;
                Ok(Completion::Created {
                    server_id,
                    server_payload: body,
                })
            }
            OpKind::Update => Ok(Completion::Updated),
            OpKind::Delete => Ok(Completion::Deleted),
        }
    }

    async fn handle_failure(&self, op: &PendingOperation, request: &ApiRequest, err: SyncError) -> Result<Step> {
        let Some(kind) = err.kind() else {
            return self.park(op, &err.to_string()).await;
        };

        let halt = match kind {
            FailureKind::StorageUnavailable => return Err(err),
            // A create that may have reached the server is never sent again.
            FailureKind::NetworkUnreachable if matches!(err, SyncError::ResponseLost(_)) => {
                request.method.is_idempotent()
            }
            FailureKind::NetworkUnreachable | FailureKind::Unauthorized => true,
            FailureKind::ServerError => request.method.is_idempotent(),
            FailureKind::ValidationRejected | FailureKind::AdapterMismatch => false,
        };

        if !halt {
            return self.park(op, &err.to_string()).await;
        }

        tracing::warn!(seq = op.seq, kind = %kind, error = %err, "Transient failure, halting drain");
        self.record_failure(op, &err.to_string(), Disposition::Requeue).await?;
        Ok(Step::Halt(kind))
    }

    async fn park(&self, op: &PendingOperation, reason: &str) -> Result<Step> {
        tracing::warn!(seq = op.seq, kind = %op.kind, entity_type = %op.entity_type, entity_id = %op.entity_id, reason, "Parking operation");
        self.record_failure(op, reason, Disposition::Park).await?;
        Ok(Step::Parked)
    }

    async fn record_failure(&self, op: &PendingOperation, reason: &str, disposition: Disposition) -> Result<()> {
        match self.store.mark_operation_failed(op.seq, reason, disposition).await {
            // Discarded by the user while in flight.
            Err(SyncError::OperationNotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Re-read the entity list of a type from the backend and replace the
    /// local synced rows with it. Requires connectivity.
    pub async fn refresh_collection(&self, entity_type: &str) -> Result<u64> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let def = self.store.catalog().get(entity_type)?;
        let response = self.http.send(&ApiRequest::get(def.endpoint.clone())).await?;

        let items = match (&response.body, &def.list_field) {
            (serde_json::Value::Array(items), _) => items.clone(),
            (serde_json::Value::Object(obj), Some(field)) => match obj.get(field) {
                Some(serde_json::Value::Array(items)) => items.clone(),
                _ => return Err(SyncError::AdapterMismatch(format!("{entity_type} listing has no {field} list"))),
            },
            _ => return Err(SyncError::AdapterMismatch(format!("{entity_type} listing is not a list"))),
        };

        let now = now_millis();
        let rows: Vec<MirroredEntity> = items
            .into_iter()
            .filter_map(|item| {
                let id = server_id_of(&item)?;
                Some(MirroredEntity::from_server(entity_type, id, item, now))
            })
            .collect();

        let stored = self.store.replace_collection(entity_type, rows).await?;
        self.refresh_counts(false).await?;
        Ok(stored)
    }

    async fn refresh_counts(&self, completed: bool) -> Result<()> {
        let pending = self.store.pending_count().await?;
        let failed = self.store.failed_count().await?;
        self.publish(|s| {
            s.state = SyncState::Idle;
            s.pending = pending;
            s.failed = failed;
            if completed && pending == 0 {
                s.progress = 100;
                s.last_sync = Some(now_millis());
            }
        });
        Ok(())
    }

    fn publish(&self, update: impl FnOnce(&mut SyncStatus)) {
        self.status.send_modify(update);
    }
}
