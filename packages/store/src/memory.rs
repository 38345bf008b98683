use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::local::KvStore;
use crate::models::Namespace;

type Tables = HashMap<&'static str, HashMap<String, Value>>;

/// In-memory KvStore for testing and as a fallback when no persistent backend exists.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a disabled storage backend: every call fails with
    /// [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage disabled".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

impl KvStore for MemoryStore {
    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()> {
        self.tables()?
            .entry(ns.as_str())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>> {
        Ok(self
            .tables()?
            .get(ns.as_str())
            .and_then(|table| table.get(key))
            .cloned())
    }

    async fn get_all(&self, ns: Namespace) -> Result<Vec<(String, Value)>> {
        Ok(self
            .tables()?
            .get(ns.as_str())
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        if let Some(table) = self.tables()?.get_mut(ns.as_str()) {
            table.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, ns: Namespace) -> Result<()> {
        self.tables()?.remove(ns.as_str());
        Ok(())
    }
}
