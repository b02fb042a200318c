//! # FieldSync Engine
//!
//! Pure logic for an offline-first data layer that mirrors server entities
//! locally, queues mutations made while disconnected, and replays them in
//! order against one authoritative backend.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, sockets or clocks
//! - **Total**: adapters never fail on well-formed input, unknown shapes pass through
//! - **Testable**: retry decisions and error classification are plain functions
//!
//! ## Core Concepts
//!
//! ### Mirrored entities
//!
//! A [`MirroredEntity`] is the local copy of a server-owned record. Until the
//! server assigns an identifier, entities carry a provisional id (see
//! [`entity::provisional_id`]) that is replaced once the create is confirmed.
//!
//! ### Pending operations
//!
//! Each local mutation becomes a [`PendingOperation`] with a monotonically
//! increasing sequence number. Sequence order is replay order.
//!
//! ### Request adaptation
//!
//! The [`RequestAdapter`] rewrites the client's internal endpoint and field
//! names into the backend's actual ones, and translates responses back.
//!
//! ### Retry and classification
//!
//! [`RetryPolicy`] decides whether a failed attempt is retried and how long to
//! wait. [`FailureKind`] classifies failures into the sync error taxonomy.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldsync_engine::{build_request, Catalog, Method, OpKind, PendingOperation, RequestAdapter};
//! use serde_json::json;
//!
//! let catalog = Catalog::standard();
//! let op = PendingOperation::new(
//!     1,
//!     OpKind::Create,
//!     "cow",
//!     "local-1",
//!     json!({"name": "Daisy", "_synced": false}),
//!     1_706_745_600_000,
//! );
//!
//! let request = build_request(&catalog, &op).unwrap();
//! assert_eq!(request.method, Method::Post);
//! assert_eq!(request.path, "/api/v1/cows");
//!
//! let adapted = RequestAdapter::standard().adapt_request(&request);
//! assert_eq!(adapted.request.path, "/cow-profiles/");
//! assert!(adapted.request.body.unwrap().get("_synced").is_none());
//! ```

pub mod adapter;
pub mod catalog;
pub mod classify;
pub mod entity;
pub mod error;
pub mod operation;
pub mod request;
pub mod retry;

// Re-export main types at crate root
pub use adapter::{AdaptedRequest, EndpointMapping, EnvelopeRule, RequestAdapter};
pub use catalog::{Catalog, EntityDef, FieldDef, FieldType};
pub use classify::{classify_status, extract_detail, FailureKind};
pub use entity::{
    is_provisional, provisional_id, rewrite_references, server_id_of, MirroredEntity, PROVISIONAL_PREFIX,
};
pub use error::Error;
pub use operation::{NewOperation, OpKind, OpStatus, PendingOperation};
pub use request::{build_request, ApiRequest, ApiResponse, Method};
pub use retry::{Attempt, RetryPolicy};

/// Type aliases for clarity
pub type EntityType = String;
pub type EntityId = String;
pub type Seq = i64;
pub type Version = u64;
pub type Timestamp = u64;
