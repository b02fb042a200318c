//! # FieldSync Client
//!
//! The IO half of FieldSync: an embedded SQLite store that mirrors server
//! entities and queues local mutations, a connectivity monitor fed by the
//! platform, an HTTP client that speaks the backend's dialect through the
//! [`RequestAdapter`](fieldsync_engine::RequestAdapter), and the sync engine
//! that replays the queue whenever the device comes back online.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod session;
pub mod store;
pub mod sync;

pub use config::{ClientConfig, ConfigError};
pub use connectivity::{
    BandwidthClass, ConnectivityEvent, ConnectivityHandle, ConnectivityMonitor, ConnectivityState, NetworkSignal,
};
pub use error::{Result, SyncError};
pub use http::HttpClient;
pub use session::{SessionProvider, StaticSession};
pub use store::{Completion, Disposition, LocalStore};
pub use sync::{DrainReport, HaltReason, SyncEngine, SyncState, SyncStatus};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> fieldsync_engine::Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
