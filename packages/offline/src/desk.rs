//! # Desk — the write-through layer behind every form
//!
//! The view layer never talks to the server or the local database directly.
//! It calls a [`Desk`], which decides where a write goes:
//!
//! - **online, signed in**: the write goes to the server and the answer is
//!   cached locally.
//! - **offline, or the server is unreachable**: the record is cached under a
//!   temporary id (for new records), the write is queued, and a
//!   "saved locally" notice is logged. The [`SyncEngine`] sends it later.
//!
//! A record the view still holds under a temporary id that the server has
//! since replaced is written to the server id instead.
//!
//! Authentication failures and server-side rejections are returned to the
//! caller. A local database that cannot be opened only matters when the
//! write also could not reach the server.

use std::cmp::Ordering;

use api::{ApiError, RemoteApi, Session};
use serde_json::Value;
use store::{
    check_proposed_aid, Admin, AidRecord, Enqueued, Entity, EntityType, Export,
    FinancialSummary, Import, KvStore, LocalStore, OpKind, PendingOperation, PendingQueue,
    RecordId, Resident, ResidentFilter,
};

use crate::activity_log::ActivityLog;
use crate::context::SyncContext;
use crate::engine::SyncEngine;
use crate::error::Result;

/// Where a write ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum SaveOutcome<T> {
    /// Confirmed by the server.
    Synced(T),
    /// Stored on this device and queued for the next sync.
    SavedLocally(T),
}

impl<T> SaveOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            SaveOutcome::Synced(t) | SaveOutcome::SavedLocally(t) => t,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SaveOutcome::Synced(_))
    }
}

fn decode<E: Entity>(value: Value) -> Option<E> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Ignoring undecodable {} from server: {e}", E::TYPE);
            None
        }
    }
}

fn by_id<E: Entity>(a: &E, b: &E) -> Ordering {
    fn key(id: Option<&RecordId>) -> (bool, i64, String) {
        match id {
            Some(RecordId::Server(n)) => (false, *n, String::new()),
            Some(RecordId::Temp(t)) => (true, 0, t.clone()),
            None => (true, i64::MAX, String::new()),
        }
    }
    key(a.id()).cmp(&key(b.id()))
}

pub struct Desk<S: KvStore, A: RemoteApi> {
    local: LocalStore<S>,
    queue: PendingQueue<S>,
    api: A,
    ctx: SyncContext,
    log: ActivityLog,
    engine: SyncEngine<S, A>,
}

impl<S: KvStore + Clone, A: RemoteApi + Clone> Desk<S, A> {
    pub fn new(store: S, api: A, ctx: SyncContext, log: ActivityLog) -> Self {
        let local = LocalStore::new(store.clone());
        let queue = PendingQueue::new(store);
        let engine = SyncEngine::new(local.clone(), queue.clone(), api.clone(), log.clone());
        Self {
            local,
            queue,
            api,
            ctx,
            log,
            engine,
        }
    }
}

impl<S: KvStore, A: RemoteApi> Desk<S, A> {
    pub fn engine(&self) -> &SyncEngine<S, A> {
        &self.engine
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn local(&self) -> &LocalStore<S> {
        &self.local
    }

    pub fn queue(&self) -> &PendingQueue<S> {
        &self.queue
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Token to use for a server call right now, if any.
    fn live_token(&self) -> Option<String> {
        if self.ctx.is_online() {
            self.ctx.token()
        } else {
            None
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let session = self.api.login(username, password).await?;
        self.ctx.set_session(session.clone());
        self.log.success(&format!("Signed in as {username}"));
        Ok(session)
    }

    pub fn logout(&self) {
        self.ctx.clear_session();
        self.log.info("Signed out");
    }

    /// Validate and store a record, on the server if possible.
    pub async fn save<E: Entity>(&self, record: E) -> Result<SaveOutcome<E>> {
        record.validate()?;
        let record = self.resolve_aliases(record).await;

        let unsynced = record.id().is_some_and(RecordId::is_temp);
        if let Some(token) = self.live_token().filter(|_| !unsynced) {
            let payload = serde_json::to_value(&record).map_err(store::StoreError::from)?;
            let sent = match record.id() {
                None => self.api.create(&token, E::TYPE, &payload).await,
                Some(id) => self.api.update(&token, E::TYPE, id, &payload).await,
            };
            match sent {
                Ok(answer) => {
                    let saved = Self::from_answer(record, answer);
                    if let Err(e) = self.local.put(&saved).await {
                        tracing::warn!("Not caching {}: {e}", E::TYPE);
                    }
                    self.log.success(&format!("{} saved", E::TYPE));
                    return Ok(SaveOutcome::Synced(saved));
                }
                Err(e) if e.is_network() => {
                    tracing::warn!("Server unreachable, keeping {} locally: {e}", E::TYPE);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut record = record;
        if record.id().is_none() {
            record.set_id(RecordId::new_temp());
        }
        let op = if record.id().is_some_and(RecordId::is_temp) {
            PendingOperation::create(&record)?
        } else {
            PendingOperation::update(&record)?
        };
        let id = op.record_id.clone();
        let previous = self.local.get_value(E::TYPE, &id).await?;
        self.local.put(&record).await?;
        if let Err(e) = self.queue.enqueue(op).await {
            // a cached change with nothing queued would never be sent
            let restored = match previous {
                Some(value) => self.local.put_value(E::TYPE, &id, value).await,
                None => self.local.delete_value(E::TYPE, &id).await,
            };
            if let Err(restore) = restored {
                tracing::warn!("Cached {} {id} has no queued change: {restore}", E::TYPE);
            }
            return Err(e.into());
        }
        self.log.warning(&format!(
            "{} saved locally; it will be sent when the connection returns",
            E::TYPE
        ));
        if self.ctx.is_online() {
            self.ctx.request_sync();
        }
        Ok(SaveOutcome::SavedLocally(record))
    }

    /// Delete a record, on the server if possible.
    pub async fn remove<E: Entity>(&self, id: &RecordId) -> Result<SaveOutcome<RecordId>> {
        let resolved = match self.queue.alias(E::TYPE, id).await {
            Ok(alias) => alias.unwrap_or_else(|| id.clone()),
            Err(e) => {
                tracing::warn!("Temporary id {id} not resolved: {e}");
                id.clone()
            }
        };
        let id = &resolved;
        if let Some(token) = self.live_token().filter(|_| !id.is_temp()) {
            match self.api.delete(&token, E::TYPE, id).await {
                Ok(()) | Err(ApiError::NotFound) => {
                    if let Err(e) = self.local.delete::<E>(id).await {
                        tracing::warn!("Cached {} {id} not removed: {e}", E::TYPE);
                    }
                    self.log.success(&format!("{} deleted", E::TYPE));
                    return Ok(SaveOutcome::Synced(id.clone()));
                }
                Err(e) if e.is_network() => {
                    tracing::warn!("Server unreachable, queueing delete of {} {id}", E::TYPE);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let enqueued = self
            .queue
            .enqueue(PendingOperation::delete(E::TYPE, id.clone()))
            .await?;
        self.local.delete::<E>(id).await?;
        if enqueued == Enqueued::Collapsed {
            self.discard_dependents(E::TYPE, id).await?;
        }
        self.log.warning(&format!(
            "{} deleted locally; the server will be updated when the connection returns",
            E::TYPE
        ));
        if self.ctx.is_online() {
            self.ctx.request_sync();
        }
        Ok(SaveOutcome::SavedLocally(id.clone()))
    }

    /// All records of a type, fresh from the server when online.
    ///
    /// Queued local changes are laid over the server's list, and the result
    /// replaces the local cache.
    pub async fn list<E: Entity>(&self) -> Result<Vec<E>> {
        if let Some(token) = self.live_token() {
            self.engine.flush(&self.ctx).await;
            match self.api.list(&token, E::TYPE).await {
                Ok(values) => {
                    let mut records: Vec<E> = values.into_iter().filter_map(decode::<E>).collect();
                    self.overlay_pending(&mut records).await;
                    if let Err(e) = self.local.replace_synced(&records).await {
                        tracing::warn!("Not caching {} list: {e}", E::TYPE);
                    }
                    records.sort_by(by_id::<E>);
                    return Ok(records);
                }
                Err(e) if e.is_network() => {
                    tracing::warn!("Server unreachable, showing cached {}: {e}", E::TYPE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        let mut records = self.local.get_all::<E>().await?;
        records.sort_by(by_id::<E>);
        Ok(records)
    }

    /// Register an aid after checking the proposed-aid rule against the
    /// resident's existing aids.
    pub async fn submit_aid(&self, aid: AidRecord) -> Result<SaveOutcome<AidRecord>> {
        aid.validate()?;
        let mut aid = self.resolve_aliases(aid).await;
        if aid.role.is_none() {
            aid.role = self.ctx.role();
        }
        let existing = self.aids_for(&aid.resident_id).await?;
        check_proposed_aid(&aid, self.ctx.role(), &existing)?;
        self.save(aid).await
    }

    /// Aids already recorded for a resident: the server's list plus aids
    /// still waiting on this device.
    pub async fn aids_for(&self, resident: &RecordId) -> Result<Vec<AidRecord>> {
        let cached: Vec<AidRecord> = match self.local.get_all::<AidRecord>().await {
            Ok(aids) => aids
                .into_iter()
                .filter(|a| &a.resident_id == resident)
                .collect(),
            Err(e) => {
                tracing::warn!("Cached aids unavailable: {e}");
                Vec::new()
            }
        };

        if let Some(token) = self.live_token().filter(|_| !resident.is_temp()) {
            match self.api.list_aids_for(&token, resident).await {
                Ok(values) => {
                    let mut aids: Vec<AidRecord> =
                        values.into_iter().filter_map(decode::<AidRecord>).collect();
                    aids.extend(
                        cached
                            .into_iter()
                            .filter(|a| a.id.as_ref().is_some_and(RecordId::is_temp)),
                    );
                    return Ok(aids);
                }
                Err(e) if e.is_network() => {
                    tracing::warn!("Server unreachable, checking cached aids: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(cached)
    }

    /// Totals of the cached imports and exports.
    pub async fn financial_summary(&self) -> Result<FinancialSummary> {
        let imports = self.local.get_all::<Import>().await?;
        let exports = self.local.get_all::<Export>().await?;
        Ok(FinancialSummary::compute(&imports, &exports))
    }

    pub async fn residents_matching(&self, filter: &ResidentFilter) -> Result<Vec<Resident>> {
        Ok(filter.apply(&self.list::<Resident>().await?))
    }

    pub async fn save_admins(&self, admins: &[Admin]) -> Result<()> {
        Ok(self.local.save_admins(admins).await?)
    }

    pub async fn admins(&self) -> Result<Vec<Admin>> {
        Ok(self.local.admins().await?)
    }

    pub async fn save_statistics(&self, stats: Value) -> Result<()> {
        Ok(self.local.save_statistics(stats).await?)
    }

    pub async fn statistics(&self) -> Result<Option<Value>> {
        Ok(self.local.statistics().await?)
    }

    /// Swap temporary ids the server has already replaced for server ids.
    async fn resolve_aliases<E: Entity>(&self, record: E) -> E {
        let Ok(mut value) = serde_json::to_value(&record) else {
            return record;
        };
        match self.queue.resolve_aliases(E::TYPE, &mut value).await {
            Ok(true) => match serde_json::from_value::<E>(value) {
                Ok(resolved) => {
                    tracing::debug!("{} now saved under its server id", E::TYPE);
                    resolved
                }
                Err(e) => {
                    tracing::warn!("Keeping temporary ids of {}: {e}", E::TYPE);
                    record
                }
            },
            Ok(false) => record,
            Err(e) => {
                tracing::warn!("Temporary ids of {} not resolved: {e}", E::TYPE);
                record
            }
        }
    }

    /// Drop queued changes to records that point at a record deleted before
    /// it ever reached the server.
    async fn discard_dependents(&self, target: EntityType, id: &RecordId) -> Result<()> {
        let dropped = self.queue.drop_dependents(target, id).await?;
        if dropped.is_empty() {
            return Ok(());
        }
        for op in &dropped {
            self.local.delete_value(op.entity, &op.record_id).await?;
        }
        self.log.warning(&format!(
            "Discarded {} unsent changes that belonged to the deleted {target}",
            dropped.len()
        ));
        Ok(())
    }

    fn from_answer<E: Entity>(mut record: E, answer: Value) -> E {
        if let Some(saved) = serde_json::from_value::<E>(answer.clone())
            .ok()
            .filter(|r| r.id().is_some())
        {
            return saved;
        }
        if let Some(id) = RecordId::from_value(&answer) {
            record.set_id(id);
        }
        record
    }

    async fn overlay_pending<E: Entity>(&self, records: &mut Vec<E>) {
        let pending = match self.queue.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Pending changes unavailable: {e}");
                return;
            }
        };
        for op in pending.into_iter().filter(|op| op.entity == E::TYPE) {
            records.retain(|r| r.id() != Some(&op.record_id));
            if op.kind != OpKind::Delete {
                if let Some(record) = decode::<E>(op.payload) {
                    records.push(record);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, household};
    use crate::{DeskError, LogLevel};
    use api::MemoryApi;
    use chrono::NaiveDate;
    use store::{AidType, DamageLevel, MemoryStore, Namespace, Role, StoreError, ValidationError};

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    /// Accepts every write except those to the pending queue.
    #[derive(Clone)]
    struct QueueRefused(MemoryStore);

    impl KvStore for QueueRefused {
        async fn put(&self, ns: Namespace, key: &str, value: Value) -> store::Result<()> {
            if ns == Namespace::Pending {
                return Err(StoreError::Unavailable("queue refused".into()));
            }
            self.0.put(ns, key, value).await
        }

        async fn get(&self, ns: Namespace, key: &str) -> store::Result<Option<Value>> {
            self.0.get(ns, key).await
        }

        async fn get_all(&self, ns: Namespace) -> store::Result<Vec<(String, Value)>> {
            self.0.get_all(ns).await
        }

        async fn delete(&self, ns: Namespace, key: &str) -> store::Result<()> {
            self.0.delete(ns, key).await
        }

        async fn clear(&self, ns: Namespace) -> store::Result<()> {
            self.0.clear(ns).await
        }
    }

    #[tokio::test]
    async fn test_ahmad_saved_offline_then_synced() {
        let (desk, api) = fixture(false);

        let outcome = desk
            .save(Resident::new("Ahmad", "123456789"))
            .await
            .unwrap();
        assert!(!outcome.is_synced());
        let temp = outcome.into_inner().id.unwrap();
        assert!(temp.is_temp());
        assert!(desk.log().last().unwrap().message.contains("saved locally"));
        assert_eq!(desk.list::<Resident>().await.unwrap()[0].id, Some(temp));

        desk.context().set_online(true);
        desk.engine().flush(desk.context()).await;

        assert_eq!(api.calls(), vec!["POST resident"]);
        let cached = desk.list::<Resident>().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, Some(RecordId::Server(1)));
        assert_eq!(cached[0].head_name, "Ahmad");
    }

    #[tokio::test]
    async fn test_online_save_is_synced_and_cached() {
        let (desk, api) = fixture(true);

        let saved = desk.save(household("Ahmad")).await.unwrap();
        assert!(saved.is_synced());
        let saved = saved.into_inner();
        assert_eq!(saved.id, Some(RecordId::Server(1)));
        assert_eq!(api.records(EntityType::Resident).len(), 1);
        assert_eq!(
            desk.local().get::<Resident>(&RecordId::Server(1)).await.unwrap(),
            Some(saved)
        );
        assert!(desk.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_aid_post_network_failure_is_queued() {
        let (desk, api) = fixture(true);
        let resident = api.seed(
            EntityType::Resident,
            serde_json::to_value(household("Ahmad")).unwrap(),
        );

        // the aid lookup and the POST both fail
        api.fail_next(2);
        let outcome = desk
            .submit_aid(AidRecord::new(resident, AidType::FoodParcel, may_first()))
            .await
            .unwrap();

        assert!(!outcome.is_synced());
        let last = desk.log().last().unwrap();
        assert_eq!(last.level, LogLevel::Warning);
        assert!(last.message.contains("saved locally"));
        let pending = desk.queue().list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity, EntityType::Aid);
        assert_eq!(pending[0].payload["role"], "delegate");
        assert!(api.records(EntityType::Aid).is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_surfaced_not_queued() {
        let (desk, api) = fixture(true);
        api.expire_tokens();

        let err = desk.save(household("Ahmad")).await.unwrap_err();
        assert!(matches!(err, DeskError::Auth(_)));
        assert!(desk.queue().is_empty().await.unwrap());
        assert!(desk.local().get_all::<Resident>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_record_rejected_before_any_write() {
        let (desk, api) = fixture(false);

        let err = desk
            .save(Resident::new("Ahmad", "12345"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::Validation(ValidationError::Invalid { .. })
        ));
        assert!(desk.queue().is_empty().await.unwrap());
        assert!(desk.local().get_all::<Resident>().await.unwrap().is_empty());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_proposed_aid_needs_admin() {
        let (desk, api) = fixture(true);
        let resident = api.seed(
            EntityType::Resident,
            serde_json::to_value(household("Ahmad")).unwrap(),
        );
        desk.submit_aid(AidRecord::new(
            resident.clone(),
            AidType::FoodParcel,
            may_first(),
        ))
        .await
        .unwrap();

        let err = desk
            .submit_aid(AidRecord::new(
                resident.clone(),
                AidType::Cash {
                    amount: Some("200".into()),
                },
                may_first(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::Validation(ValidationError::ProposedAidExists)
        ));

        // free-text aids are not limited
        desk.submit_aid(AidRecord::new(
            resident.clone(),
            AidType::Other("blankets".into()),
            may_first(),
        ))
        .await
        .unwrap();

        desk.context().set_session(Session {
            token: crate::testing::TOKEN.into(),
            role: Some(Role::Admin),
        });
        let saved = desk
            .submit_aid(AidRecord::new(
                resident,
                AidType::HealthParcel,
                may_first(),
            ))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(saved.role, Some(Role::Admin));
        assert_eq!(api.records(EntityType::Aid).len(), 3);
    }

    #[tokio::test]
    async fn test_proposed_aid_rule_uses_cache_offline() {
        let (desk, _api) = fixture(false);
        let resident = desk
            .save(household("Ahmad"))
            .await
            .unwrap()
            .into_inner()
            .id
            .unwrap();

        desk.submit_aid(AidRecord::new(
            resident.clone(),
            AidType::VegetableParcel,
            may_first(),
        ))
        .await
        .unwrap();
        let err = desk
            .submit_aid(AidRecord::new(resident, AidType::FoodParcel, may_first()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::Validation(ValidationError::ProposedAidExists)
        ));
    }

    #[tokio::test]
    async fn test_remove_online_and_offline() {
        let (desk, api) = fixture(true);
        let first = desk.save(household("a")).await.unwrap().into_inner();
        let second = desk.save(household("b")).await.unwrap().into_inner();

        let removed = desk
            .remove::<Resident>(first.id.as_ref().unwrap())
            .await
            .unwrap();
        assert!(removed.is_synced());
        assert_eq!(api.records(EntityType::Resident).len(), 1);

        desk.context().set_online(false);
        let removed = desk
            .remove::<Resident>(second.id.as_ref().unwrap())
            .await
            .unwrap();
        assert!(!removed.is_synced());
        assert!(desk.local().get_all::<Resident>().await.unwrap().is_empty());
        assert_eq!(api.records(EntityType::Resident).len(), 1);

        desk.context().set_online(true);
        desk.engine().flush(desk.context()).await;
        assert!(api.records(EntityType::Resident).is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_unsent_local_changes() {
        let (desk, api) = fixture(true);
        api.seed(
            EntityType::Resident,
            serde_json::to_value(household("a")).unwrap(),
        );
        let b = api.seed(
            EntityType::Resident,
            serde_json::to_value(household("b")).unwrap(),
        );
        let mut edited = desk.list::<Resident>().await.unwrap()[1].clone();
        assert_eq!(edited.id.as_ref(), Some(&b));

        // the edit cannot reach the server
        api.reject(EntityType::Resident, true);
        desk.context().set_online(false);
        edited.notes = "roof collapsed".into();
        desk.save(edited).await.unwrap();
        desk.save(household("c")).await.unwrap();
        desk.context().set_online(true);

        let listed = desk.list::<Resident>().await.unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.head_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(listed[1].notes, "roof collapsed");
        assert!(listed[2].id.as_ref().unwrap().is_temp());
        assert_eq!(desk.local().get_all::<Resident>().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_storage_unavailable() {
        let store = MemoryStore::new();
        let api = MemoryApi::new();
        api.issue_token(crate::testing::TOKEN);
        let (desk, _) = crate::testing::fixture_with(store.clone(), api, true);
        store.set_unavailable(true);

        // online writes do not need the cache
        assert!(desk.save(household("a")).await.unwrap().is_synced());

        desk.context().set_online(false);
        let err = desk.save(household("b")).await.unwrap_err();
        assert!(matches!(err, DeskError::Storage(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_cache_untouched() {
        let desk = Desk::new(
            QueueRefused(MemoryStore::new()),
            MemoryApi::new(),
            SyncContext::new(false),
            ActivityLog::new(),
        );

        let err = desk.save(household("Ahmad")).await.unwrap_err();
        assert!(matches!(err, DeskError::Storage(StoreError::Unavailable(_))));
        assert!(desk.local().get_all::<Resident>().await.unwrap().is_empty());

        let mut cached = household("Sara");
        cached.id = Some(RecordId::Server(5));
        desk.local().put(&cached).await.unwrap();
        let mut edited = cached.clone();
        edited.notes = "never queued".into();
        assert!(desk.save(edited).await.is_err());
        assert_eq!(
            desk.local().get::<Resident>(&RecordId::Server(5)).await.unwrap(),
            Some(cached)
        );
    }

    #[tokio::test]
    async fn test_deleting_an_unsent_resident_discards_its_aids() {
        let (desk, api) = fixture(false);
        let resident = desk.save(household("Ahmad")).await.unwrap().into_inner();
        let id = resident.id.unwrap();
        desk.submit_aid(AidRecord::new(id.clone(), AidType::FoodParcel, may_first()))
            .await
            .unwrap();
        assert_eq!(desk.queue().len().await.unwrap(), 2);

        desk.remove::<Resident>(&id).await.unwrap();
        assert!(desk.queue().is_empty().await.unwrap());
        assert!(desk.local().get_all::<AidRecord>().await.unwrap().is_empty());
        assert!(desk
            .log()
            .entries()
            .iter()
            .any(|e| e.message.starts_with("Discarded 1 unsent changes")));

        desk.context().set_online(true);
        desk.engine().flush(desk.context()).await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let api = MemoryApi::new().with_user("sara", "pw", Some(Role::Admin));
        let ctx = SyncContext::new(true);
        let desk = Desk::new(MemoryStore::new(), api, ctx, ActivityLog::new());

        assert!(matches!(
            desk.login("sara", "bad").await.unwrap_err(),
            DeskError::Auth(_)
        ));
        let session = desk.login("sara", "pw").await.unwrap();
        assert_eq!(desk.context().token(), Some(session.token));
        assert_eq!(desk.context().role(), Some(Role::Admin));

        desk.logout();
        assert!(desk.context().token().is_none());
        // signed out writes stay on the device
        assert!(!desk.save(household("a")).await.unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_financial_summary_from_cache() {
        let (desk, _api) = fixture(false);
        for amount in [100.0, 50.5] {
            desk.save(Import {
                id: None,
                source: "donor".into(),
                name: "grant".into(),
                date: may_first(),
                kind: "cash".into(),
                amount,
            })
            .await
            .unwrap();
        }
        desk.save(Export {
            id: None,
            description: "fuel".into(),
            amount: 30.5,
            date: may_first(),
        })
        .await
        .unwrap();

        let summary = desk.financial_summary().await.unwrap();
        assert_eq!(summary.total_imports, 150.5);
        assert_eq!(summary.total_exports, 30.5);
        assert_eq!(summary.balance, 120.0);
    }

    #[tokio::test]
    async fn test_residents_matching() {
        let (desk, _api) = fixture(false);
        let mut sara = Resident::new("Sara", "987654321");
        sara.damage_level = DamageLevel::Severe;
        desk.save(sara).await.unwrap();
        desk.save(household("Ahmad")).await.unwrap();

        let found = desk
            .residents_matching(&ResidentFilter::default().damage_level(DamageLevel::Severe))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].head_name, "Sara");
    }

    #[tokio::test]
    async fn test_admin_and_statistics_caches() {
        let (desk, _api) = fixture(false);
        desk.save_admins(&[Admin {
            id: 1,
            username: "root".into(),
            role: Some(Role::Admin),
        }])
        .await
        .unwrap();
        desk.save_statistics(serde_json::json!({ "residents": 3 }))
            .await
            .unwrap();

        assert_eq!(desk.admins().await.unwrap()[0].username, "root");
        assert_eq!(
            desk.statistics().await.unwrap(),
            Some(serde_json::json!({ "residents": 3 }))
        );
    }
}
