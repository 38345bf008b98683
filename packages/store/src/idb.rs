//! # IndexedDB key-value store — browser-side persistence
//!
//! [`IdbStore`] is the [`KvStore`] implementation used on the **web platform**.
//! It persists records into the browser's IndexedDB via the [`rexie`] crate, giving
//! the client an offline-capable local copy of residents, aids and the pending
//! queue.
//!
//! ## Database schema
//!
//! A single IndexedDB database named `"relief"` (version 2) with one object
//! store per [`Namespace`] (`"residents"`, `"aids"`, `"pending"`, ...). Keys are
//! strings (record id or queue key); values are the record's JSON, converted to
//! a plain JS object via `serde_wasm_bindgen`.
//!
//! ## Connection management
//!
//! `IdbStore` opens a fresh [`Rexie`] connection on every operation: `Rexie`
//! does not implement `Clone`, and the browser caches IndexedDB connections
//! internally.
//!
//! ## Error handling
//!
//! A database that cannot be opened (private browsing, disabled storage,
//! unsupported browser) surfaces as [`StoreError::Unavailable`], which the
//! caller treats as "no offline cache".

use rexie::{ObjectStore as RexieObjectStore, Rexie, TransactionMode};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::JsValue;

use crate::error::{Result, StoreError};
use crate::local::KvStore;
use crate::models::Namespace;

const DEFAULT_DB_NAME: &str = "relief";
const DB_VERSION: u32 = 2;

fn unavailable(e: rexie::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn to_js(value: &Value) -> Result<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn from_js(value: JsValue) -> Result<Value> {
    serde_wasm_bindgen::from_value(value).map_err(|e| StoreError::Unavailable(e.to_string()))
}

/// IndexedDB-backed KvStore for the web platform.
///
/// When a user scope is provided the database is named `"relief-<scope>"`, so
/// two caseworkers sharing a browser never see each other's queue.
#[derive(Clone)]
pub struct IdbStore {
    db_name: String,
}

impl IdbStore {
    pub fn new() -> Self {
        Self::with_scope(None)
    }

    pub fn with_scope(scope: Option<&str>) -> Self {
        let db_name = match scope {
            Some(scope) => format!("{DEFAULT_DB_NAME}-{scope}"),
            None => DEFAULT_DB_NAME.to_string(),
        };
        Self { db_name }
    }

    async fn open_db(&self) -> Result<Rexie> {
        let mut builder = Rexie::builder(&self.db_name).version(DB_VERSION);
        for ns in Namespace::ALL {
            builder = builder.add_object_store(RexieObjectStore::new(ns.as_str()));
        }
        builder.build().await.map_err(unavailable)
    }
}

impl Default for IdbStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for IdbStore {
    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()> {
        let db = self.open_db().await?;
        let tx = db
            .transaction(&[ns.as_str()], TransactionMode::ReadWrite)
            .map_err(unavailable)?;
        let store = tx.store(ns.as_str()).map_err(unavailable)?;

        let key = JsValue::from_str(key);
        store
            .put(&to_js(&value)?, Some(&key))
            .await
            .map_err(unavailable)?;
        tx.done().await.map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>> {
        let db = self.open_db().await?;
        let tx = db
            .transaction(&[ns.as_str()], TransactionMode::ReadOnly)
            .map_err(unavailable)?;
        let store = tx.store(ns.as_str()).map_err(unavailable)?;

        match store.get(JsValue::from_str(key)).await.map_err(unavailable)? {
            Some(js_val) if !js_val.is_undefined() => Ok(Some(from_js(js_val)?)),
            _ => Ok(None),
        }
    }

    async fn get_all(&self, ns: Namespace) -> Result<Vec<(String, Value)>> {
        let db = self.open_db().await?;
        let tx = db
            .transaction(&[ns.as_str()], TransactionMode::ReadOnly)
            .map_err(unavailable)?;
        let store = tx.store(ns.as_str()).map_err(unavailable)?;

        let entries = store
            .scan(None, None, None, None)
            .await
            .map_err(unavailable)?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(key) = key.as_string() else {
                continue;
            };
            out.push((key, from_js(value)?));
        }
        Ok(out)
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        let db = self.open_db().await?;
        let tx = db
            .transaction(&[ns.as_str()], TransactionMode::ReadWrite)
            .map_err(unavailable)?;
        let store = tx.store(ns.as_str()).map_err(unavailable)?;

        store
            .delete(JsValue::from_str(key))
            .await
            .map_err(unavailable)?;
        tx.done().await.map_err(unavailable)?;
        Ok(())
    }

    async fn clear(&self, ns: Namespace) -> Result<()> {
        let db = self.open_db().await?;
        let tx = db
            .transaction(&[ns.as_str()], TransactionMode::ReadWrite)
            .map_err(unavailable)?;
        let store = tx.store(ns.as_str()).map_err(unavailable)?;

        store.clear().await.map_err(unavailable)?;
        tx.done().await.map_err(unavailable)?;
        Ok(())
    }
}
