//! # Local Store — typed records on top of an abstract key-value store
//!
//! All persistence goes through the [`KvStore`] trait: JSON values keyed by a
//! string inside a [`Namespace`]. The same logic works against memory
//! ([`crate::MemoryStore`]), the filesystem ([`crate::FileStore`]) or IndexedDB
//! (`IdbStore`, web only).
//!
//! [`LocalStore`] adds the typed contract used by the rest of the workspace:
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`put`](LocalStore::put) | Insert or overwrite a record by its id. |
//! | [`get_all`](LocalStore::get_all) | Every cached record of a type. Undecodable entries are skipped. |
//! | [`delete`](LocalStore::delete) / [`clear`](LocalStore::clear) | Remove one record or a whole namespace. |
//! | [`put_value`](LocalStore::put_value) & co. | Untyped access used by the sync engine, which replays records of any type. |
//! | [`save_admins`](LocalStore::save_admins) / [`save_statistics`](LocalStore::save_statistics) | Read-only caches for offline display. |
//!
//! Every method returns [`StoreError::Unavailable`] when the backend cannot be
//! opened. Callers treat that as "no offline cache", never as fatal.

use std::future::Future;

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::models::{Admin, Entity, EntityType, Namespace, RecordId};

const STATISTICS_KEY: &str = "latest";

/// Async key-value capability backing the local database.
pub trait KvStore {
    fn put(&self, ns: Namespace, key: &str, value: Value) -> impl Future<Output = Result<()>>;

    fn get(&self, ns: Namespace, key: &str) -> impl Future<Output = Result<Option<Value>>>;

    /// All `(key, value)` pairs of a namespace, in no particular order.
    fn get_all(&self, ns: Namespace) -> impl Future<Output = Result<Vec<(String, Value)>>>;

    /// Deleting a missing key is not an error.
    fn delete(&self, ns: Namespace, key: &str) -> impl Future<Output = Result<()>>;

    fn clear(&self, ns: Namespace) -> impl Future<Output = Result<()>>;
}

/// Typed record access over a [`KvStore`].
#[derive(Clone, Debug)]
pub struct LocalStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> LocalStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Insert or overwrite a record. The record must carry an id.
    pub async fn put<E: Entity>(&self, record: &E) -> Result<()> {
        let id = record.id().ok_or(StoreError::MissingId(E::TYPE))?;
        let value = serde_json::to_value(record)?;
        self.store
            .put(E::TYPE.namespace(), &id.storage_key(), value)
            .await
    }

    pub async fn get<E: Entity>(&self, id: &RecordId) -> Result<Option<E>> {
        match self.store.get(E::TYPE.namespace(), &id.storage_key()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        let entries = self.store.get_all(E::TYPE.namespace()).await?;
        let records = entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping undecodable {} record {key}: {e}", E::TYPE);
                    None
                }
            })
            .collect();
        Ok(records)
    }

    pub async fn delete<E: Entity>(&self, id: &RecordId) -> Result<()> {
        self.store
            .delete(E::TYPE.namespace(), &id.storage_key())
            .await
    }

    pub async fn clear<E: Entity>(&self) -> Result<()> {
        self.store.clear(E::TYPE.namespace()).await
    }

    /// Replace the cached server records of a type with `records`, keeping
    /// local records that still carry a temporary id.
    pub async fn replace_synced<E: Entity>(&self, records: &[E]) -> Result<()> {
        let ns = E::TYPE.namespace();
        for (key, value) in self.store.get_all(ns).await? {
            let is_temp = RecordId::from_value(&value).is_some_and(|id| id.is_temp());
            if !is_temp {
                self.store.delete(ns, &key).await?;
            }
        }
        for record in records {
            self.put(record).await?;
        }
        Ok(())
    }

    pub async fn put_value(&self, entity: EntityType, id: &RecordId, value: Value) -> Result<()> {
        self.store
            .put(entity.namespace(), &id.storage_key(), value)
            .await
    }

    pub async fn get_value(&self, entity: EntityType, id: &RecordId) -> Result<Option<Value>> {
        self.store.get(entity.namespace(), &id.storage_key()).await
    }

    pub async fn values(&self, entity: EntityType) -> Result<Vec<Value>> {
        let entries = self.store.get_all(entity.namespace()).await?;
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }

    pub async fn delete_value(&self, entity: EntityType, id: &RecordId) -> Result<()> {
        self.store
            .delete(entity.namespace(), &id.storage_key())
            .await
    }

    /// Replace the admins cache wholesale.
    pub async fn save_admins(&self, admins: &[Admin]) -> Result<()> {
        self.store.clear(Namespace::Admins).await?;
        for admin in admins {
            self.store
                .put(
                    Namespace::Admins,
                    &admin.id.to_string(),
                    serde_json::to_value(admin)?,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn admins(&self) -> Result<Vec<Admin>> {
        let mut admins: Vec<Admin> = self
            .store
            .get_all(Namespace::Admins)
            .await?
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect();
        admins.sort_by_key(|a| a.id);
        Ok(admins)
    }

    /// Keep only the most recent statistics snapshot.
    pub async fn save_statistics(&self, stats: Value) -> Result<()> {
        self.store
            .put(Namespace::Statistics, STATISTICS_KEY, stats)
            .await
    }

    pub async fn statistics(&self) -> Result<Option<Value>> {
        self.store.get(Namespace::Statistics, STATISTICS_KEY).await
    }
}
