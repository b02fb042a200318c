//! Session collaborator.
//!
//! The data layer never owns the session lifecycle: it reads credentials for
//! each request and reports rejected credentials back through
//! [`SessionProvider::on_unauthorized`].

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of per-request credentials.
pub trait SessionProvider: Send + Sync {
    /// Bearer token for `Authorization`, if signed in.
    fn bearer_token(&self) -> Option<String>;

    /// User id for `X-User-ID`, if known.
    fn user_id(&self) -> Option<String>;

    /// Called when the backend rejects the current credentials.
    fn on_unauthorized(&self);
}

/// Fixed credentials that are dropped once the backend rejects them.
#[derive(Debug, Default)]
pub struct StaticSession {
    token: RwLock<Option<String>>,
    user_id: Option<String>,
    rejections: AtomicU32,
}

impl StaticSession {
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            user_id,
            rejections: AtomicU32::new(0),
        }
    }

    /// A session without credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the token, e.g. after signing in again.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// How many times the backend rejected the credentials.
    pub fn rejections(&self) -> u32 {
        self.rejections.load(Ordering::SeqCst)
    }
}

impl SessionProvider for StaticSession {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn on_unauthorized(&self) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
        if self.token.write().take().is_some() {
            tracing::warn!("Session token rejected by backend, cleared");
        }
    }
}
