//! Shared session and connectivity state.

use std::sync::{Arc, PoisonError, RwLock};

use api::Session;
use store::Role;
use tokio::sync::{watch, Notify};

#[derive(Debug)]
struct Inner {
    session: RwLock<Option<Session>>,
    online: watch::Sender<bool>,
    sync_requested: Notify,
}

/// Token, role and online status, passed explicitly to everything that talks
/// to the server. Clones share the same state.
#[derive(Clone, Debug)]
pub struct SyncContext {
    inner: Arc<Inner>,
}

impl SyncContext {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                session: RwLock::new(None),
                online,
                sync_requested: Notify::new(),
            }),
        }
    }

    pub fn set_session(&self, session: Session) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn clear_session(&self) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone())
    }

    pub fn role(&self) -> Option<Role> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|s| s.role)
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Record the current connectivity. Returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        })
    }

    /// Receiver notified on every connectivity change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Ask the running sync loop for a flush. Requests made while nobody is
    /// waiting are kept until the loop next waits.
    pub fn request_sync(&self) {
        self.inner.sync_requested.notify_one();
    }

    pub async fn sync_requested(&self) {
        self.inner.sync_requested.notified().await;
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(false)
    }
}
