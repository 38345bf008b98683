//! # Pending-operation queue
//!
//! Writes that have not been confirmed by the server are kept as
//! [`PendingOperation`]s in the [`Namespace::Pending`] namespace of the same
//! [`KvStore`] that caches the records, so the queue survives restarts exactly
//! like the data it refers to.
//!
//! ## Keys and ordering
//!
//! Each operation is stored under a queue key derived from its entity type and
//! record id (`"resident:tmp-…"`, `"aid:42"`). A second write to the same record
//! therefore lands on the same entry and is merged into it: the entry keeps
//! its sequence number (its place in the queue) and its revision is bumped.
//! [`list_pending`](PendingQueue::list_pending) returns entries in sequence
//! order.
//!
//! | queued | new | result |
//! |--------|-----|--------|
//! | create | update | create carrying the latest payload |
//! | create | delete | entry removed, the server never hears of it |
//! | update | update | update carrying the latest payload |
//! | update | delete | delete |
//! | delete | anything | replaced by the new operation |
//!
//! ## In-flight reconciliation
//!
//! The revision lets the sync engine notice writes that happened while an
//! operation was on the wire: [`confirm`](PendingQueue::confirm) and
//! [`confirm_create`](PendingQueue::confirm_create) only drop an entry whose
//! revision is the one that was sent.
//!
//! Every confirmed create also leaves an alias from its temporary id to the
//! server id in [`Namespace::Aliases`], so a copy of the record still holding
//! the temporary id can be redirected with
//! [`resolve_aliases`](PendingQueue::resolve_aliases).
//!
//! Read-modify-write sections hold an async mutex shared by all clones of the
//! queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::local::KvStore;
use crate::models::{Entity, EntityType, Namespace, RecordId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// A local write waiting to be replayed against the remote API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Queue key. Never equal to a server-assigned id.
    pub temp_id: String,
    pub entity: EntityType,
    pub kind: OpKind,
    pub record_id: RecordId,
    /// The record as last written locally.
    pub payload: Value,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub revision: u32,
    pub queued_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn new(entity: EntityType, kind: OpKind, record_id: RecordId, payload: Value) -> Self {
        Self {
            temp_id: Self::key_for(entity, &record_id),
            entity,
            kind,
            record_id,
            payload,
            synced: false,
            seq: 0,
            revision: 0,
            queued_at: Utc::now(),
        }
    }

    pub fn key_for(entity: EntityType, id: &RecordId) -> String {
        format!("{}:{}", entity.as_str(), id.storage_key())
    }

    pub fn create<E: Entity>(record: &E) -> Result<Self> {
        Self::for_record(OpKind::Create, record)
    }

    pub fn update<E: Entity>(record: &E) -> Result<Self> {
        Self::for_record(OpKind::Update, record)
    }

    pub fn delete(entity: EntityType, id: RecordId) -> Self {
        let payload = serde_json::json!({ "id": id });
        Self::new(entity, OpKind::Delete, id, payload)
    }

    fn for_record<E: Entity>(kind: OpKind, record: &E) -> Result<Self> {
        let id = record.id().cloned().ok_or(StoreError::MissingId(E::TYPE))?;
        Ok(Self::new(E::TYPE, kind, id, serde_json::to_value(record)?))
    }

    /// First payload field that still points at a record the server has not
    /// assigned an id to, with the type of that record.
    pub fn unresolved_reference(&self) -> Option<(&'static str, EntityType, RecordId)> {
        self.entity.references().iter().find_map(|(field, target)| {
            let id: RecordId = serde_json::from_value(self.payload.get(*field)?.clone()).ok()?;
            id.is_temp().then_some((*field, *target, id))
        })
    }
}

/// What [`PendingQueue::enqueue`] did with an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Merged,
    /// A create followed by a delete cancelled each other out.
    Collapsed,
}

/// Result of confirming a create the server accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateConfirmation {
    /// The entry was unchanged and has been removed.
    Confirmed,
    /// The record was edited while the create was in flight; the entry now
    /// holds an update of the server id with the newer payload.
    Superseded(PendingOperation),
    /// The record was deleted while the create was in flight; a delete of the
    /// server id has been queued.
    Deleted,
}

/// FIFO of [`PendingOperation`]s stored in a [`KvStore`].
#[derive(Clone, Debug)]
pub struct PendingQueue<S: KvStore> {
    store: S,
    lock: Arc<Mutex<()>>,
}

impl<S: KvStore> PendingQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Add an operation, merging it with a queued one for the same record.
    pub async fn enqueue(&self, mut op: PendingOperation) -> Result<Enqueued> {
        let _guard = self.lock.lock().await;

        let Some(mut prev) = self.load(&op.temp_id).await? else {
            op.seq = self.next_seq().await?;
            op.revision = 0;
            self.save(&op).await?;
            tracing::debug!("Queued {:?} {} as #{}", op.kind, op.temp_id, op.seq);
            return Ok(Enqueued::Queued);
        };

        match (prev.kind, op.kind) {
            (OpKind::Create, OpKind::Delete) => {
                self.store.delete(Namespace::Pending, &prev.temp_id).await?;
                tracing::debug!("Collapsed create+delete of {}", prev.temp_id);
                return Ok(Enqueued::Collapsed);
            }
            (OpKind::Create, _) | (OpKind::Update, OpKind::Update | OpKind::Create) => {
                prev.payload = op.payload;
            }
            (OpKind::Update, OpKind::Delete) | (OpKind::Delete, _) => {
                prev.kind = op.kind;
                prev.payload = op.payload;
            }
        }
        prev.revision += 1;
        prev.synced = false;
        self.save(&prev).await?;
        Ok(Enqueued::Merged)
    }

    /// Unsynced operations in queue order.
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let mut ops: Vec<PendingOperation> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|op| !op.synced)
            .collect();
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    pub async fn get(&self, temp_id: &str) -> Result<Option<PendingOperation>> {
        self.load(temp_id).await
    }

    pub async fn dequeue(&self, temp_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.delete(Namespace::Pending, temp_id).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list_pending().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove `sent` if nothing was written to its record since it was read.
    /// Returns whether the entry was removed.
    pub async fn confirm(&self, sent: &PendingOperation) -> Result<bool> {
        let _guard = self.lock.lock().await;
        match self.load(&sent.temp_id).await? {
            Some(current) if current.revision == sent.revision && current.kind == sent.kind => {
                self.store.delete(Namespace::Pending, &sent.temp_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Settle a create the server answered with `server_id`.
    pub async fn confirm_create(
        &self,
        sent: &PendingOperation,
        server_id: &RecordId,
    ) -> Result<CreateConfirmation> {
        let _guard = self.lock.lock().await;
        self.store
            .put(
                Namespace::Aliases,
                &PendingOperation::key_for(sent.entity, &sent.record_id),
                serde_json::to_value(server_id)?,
            )
            .await?;
        match self.load(&sent.temp_id).await? {
            Some(current) if current.revision == sent.revision => {
                self.store.delete(Namespace::Pending, &sent.temp_id).await?;
                Ok(CreateConfirmation::Confirmed)
            }
            Some(mut current) => {
                self.store.delete(Namespace::Pending, &current.temp_id).await?;
                if let Some(obj) = current.payload.as_object_mut() {
                    obj.insert("id".to_string(), serde_json::to_value(server_id)?);
                }
                current.kind = match current.kind {
                    OpKind::Delete => OpKind::Delete,
                    _ => OpKind::Update,
                };
                current.record_id = server_id.clone();
                current.temp_id = PendingOperation::key_for(current.entity, server_id);
                self.save(&current).await?;
                Ok(CreateConfirmation::Superseded(current))
            }
            None => {
                let mut delete = PendingOperation::delete(sent.entity, server_id.clone());
                delete.seq = self.next_seq().await?;
                self.save(&delete).await?;
                Ok(CreateConfirmation::Deleted)
            }
        }
    }

    /// Server id assigned to a record created under the temporary `id`.
    pub async fn alias(&self, entity: EntityType, id: &RecordId) -> Result<Option<RecordId>> {
        if !id.is_temp() {
            return Ok(None);
        }
        let key = PendingOperation::key_for(entity, id);
        Ok(self
            .store
            .get(Namespace::Aliases, &key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Rewrite the id and references of a serialized `entity` record that
    /// still use temporary ids the server has since replaced. Returns whether
    /// anything changed.
    pub async fn resolve_aliases(&self, entity: EntityType, record: &mut Value) -> Result<bool> {
        let fields = std::iter::once(("id", entity)).chain(entity.references().iter().copied());
        let mut changed = false;
        for (field, target) in fields {
            let Some(id) = record
                .get(field)
                .and_then(|value| serde_json::from_value::<RecordId>(value.clone()).ok())
            else {
                continue;
            };
            if let Some(server_id) = self.alias(target, &id).await? {
                record[field] = serde_json::to_value(&server_id)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Remove queued operations that point at `id`, a record of type `target`
    /// the server will never see, and in turn anything pointing at records
    /// those operations would have created.
    pub async fn drop_dependents(
        &self,
        target: EntityType,
        id: &RecordId,
    ) -> Result<Vec<PendingOperation>> {
        let _guard = self.lock.lock().await;
        let mut orphaned = vec![(target, id.clone())];
        let mut dropped = Vec::new();
        while let Some((target, id)) = orphaned.pop() {
            let id_value = serde_json::to_value(&id)?;
            for op in self.load_all().await? {
                let depends = op.entity.references().iter().any(|(field, referenced)| {
                    *referenced == target && op.payload.get(*field) == Some(&id_value)
                });
                if !depends {
                    continue;
                }
                self.store.delete(Namespace::Pending, &op.temp_id).await?;
                tracing::debug!("Dropped {} which depends on {target} {id}", op.temp_id);
                if op.kind == OpKind::Create {
                    orphaned.push((op.entity, op.record_id.clone()));
                }
                dropped.push(op);
            }
        }
        Ok(dropped)
    }

    /// Point queued payloads of entities referencing `target` at `to` instead
    /// of `from`. Returns the number of rewritten operations.
    pub async fn remap_reference(
        &self,
        target: EntityType,
        from: &RecordId,
        to: &RecordId,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let from_value = serde_json::to_value(from)?;
        let to_value = serde_json::to_value(to)?;

        let mut rewritten = 0;
        for mut op in self.load_all().await? {
            let mut changed = false;
            for (field, referenced) in op.entity.references() {
                if *referenced != target {
                    continue;
                }
                if let Some(slot) = op.payload.get_mut(*field) {
                    if *slot == from_value {
                        *slot = to_value.clone();
                        changed = true;
                    }
                }
            }
            if changed {
                self.save(&op).await?;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    /// Move resident deletes recorded by older builds in the
    /// `pending_deletes` namespace into the queue.
    pub async fn migrate_legacy_deletes(&self) -> Result<usize> {
        let legacy = self.store.get_all(Namespace::PendingDeletes).await?;
        let mut migrated = 0;
        for (key, value) in legacy {
            match RecordId::from_value(&value) {
                Some(id) => {
                    self.enqueue(PendingOperation::delete(EntityType::Resident, id))
                        .await?;
                    migrated += 1;
                }
                None => tracing::warn!("Dropping legacy pending delete {key} without an id"),
            }
            self.store.delete(Namespace::PendingDeletes, &key).await?;
        }
        if migrated > 0 {
            tracing::info!("Migrated {migrated} legacy pending deletes into the queue");
        }
        Ok(migrated)
    }

    async fn load(&self, temp_id: &str) -> Result<Option<PendingOperation>> {
        match self.store.get(Namespace::Pending, temp_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<PendingOperation>> {
        let entries = self.store.get_all(Namespace::Pending).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(op) => Some(op),
                Err(e) => {
                    tracing::warn!("Skipping undecodable pending operation {key}: {e}");
                    None
                }
            })
            .collect())
    }

    async fn save(&self, op: &PendingOperation) -> Result<()> {
        self.store
            .put(Namespace::Pending, &op.temp_id, serde_json::to_value(op)?)
            .await
    }

    async fn next_seq(&self) -> Result<u64> {
        let max = self.load_all().await?.iter().map(|op| op.seq).max();
        Ok(max.map_or(0, |seq| seq + 1))
    }
}
