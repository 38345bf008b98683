//! Fixtures shared by the engine and desk tests.

use std::cell::RefCell;
use std::rc::Rc;

use api::{MemoryApi, RemoteApi, Session};
use serde_json::Value;
use store::{
    EntityType, LocalStore, MemoryStore, PendingOperation, PendingQueue, RecordId, Resident, Role,
};

use crate::{ActivityLog, Desk, SyncContext};

pub(crate) const TOKEN: &str = "test-token";

pub(crate) fn household(name: &str) -> Resident {
    let mut resident = Resident::new(name, "123456789");
    resident.family_size = 4;
    resident
}

/// A desk over fresh in-memory backends, signed in as a delegate.
pub(crate) fn fixture(online: bool) -> (Desk<MemoryStore, MemoryApi>, MemoryApi) {
    let api = MemoryApi::new();
    api.issue_token(TOKEN);
    fixture_with(MemoryStore::new(), api, online)
}

pub(crate) fn fixture_with<A: RemoteApi + Clone>(
    store: MemoryStore,
    api: A,
    online: bool,
) -> (Desk<MemoryStore, A>, A) {
    let ctx = SyncContext::new(online);
    ctx.set_session(Session {
        token: TOKEN.to_string(),
        role: Some(Role::Delegate),
    });
    let desk = Desk::new(store, api.clone(), ctx, ActivityLog::new());
    (desk, api)
}

type Interleaved = Option<(PendingOperation, Option<Resident>)>;

/// Wraps [`MemoryApi`]: yields once inside every create and can apply a local
/// write while the create is on the wire.
#[derive(Clone)]
pub(crate) struct InterleavingApi {
    inner: MemoryApi,
    local: LocalStore<MemoryStore>,
    queue: PendingQueue<MemoryStore>,
    next: Rc<RefCell<Interleaved>>,
}

impl InterleavingApi {
    pub(crate) fn new(inner: MemoryApi, store: MemoryStore) -> Self {
        inner.issue_token(TOKEN);
        Self {
            inner,
            local: LocalStore::new(store.clone()),
            queue: PendingQueue::new(store),
            next: Rc::new(RefCell::new(None)),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryApi {
        &self.inner
    }

    /// During the next create, queue `op` and cache `record` (or drop the
    /// cached copy when `None`), as the desk would.
    pub(crate) fn during_create(&self, op: PendingOperation, record: Option<Resident>) {
        *self.next.borrow_mut() = Some((op, record));
    }
}

impl RemoteApi for InterleavingApi {
    async fn login(&self, username: &str, password: &str) -> api::Result<Session> {
        self.inner.login(username, password).await
    }

    async fn list(&self, token: &str, entity: EntityType) -> api::Result<Vec<Value>> {
        self.inner.list(token, entity).await
    }

    async fn list_aids_for(&self, token: &str, resident: &RecordId) -> api::Result<Vec<Value>> {
        self.inner.list_aids_for(token, resident).await
    }

    async fn create(&self, token: &str, entity: EntityType, payload: &Value) -> api::Result<Value> {
        tokio::task::yield_now().await;
        let next = self.next.borrow_mut().take();
        if let Some((op, record)) = next {
            match record {
                Some(record) => self.local.put(&record).await.unwrap(),
                None => self
                    .local
                    .delete_value(op.entity, &op.record_id)
                    .await
                    .unwrap(),
            }
            self.queue.enqueue(op).await.unwrap();
        }
        self.inner.create(token, entity, payload).await
    }

    async fn update(
        &self,
        token: &str,
        entity: EntityType,
        id: &RecordId,
        payload: &Value,
    ) -> api::Result<Value> {
        self.inner.update(token, entity, id, payload).await
    }

    async fn delete(&self, token: &str, entity: EntityType, id: &RecordId) -> api::Result<()> {
        self.inner.delete(token, entity, id).await
    }

    async fn ping(&self) -> api::Result<()> {
        self.inner.ping().await
    }
}
