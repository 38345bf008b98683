//! # Filesystem-backed key-value store
//!
//! [`FileStore`] is the [`KvStore`] implementation used on desktop and mobile
//! targets so that offline work survives an app restart.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/
//! ├── residents/
//! │   └── <hex(key)>.json     # one JSON document per record
//! ├── pending/
//! │   └── <hex(key)>.json
//! └── ...                     # one directory per namespace
//! ```
//!
//! Keys are hex-encoded so temporary ids and queue keys are always valid file
//! names. Directories are created lazily on first write; if they cannot be
//! created the store reports [`StoreError::Unavailable`].
//!
//! Use [`dirs::data_dir()`](https://docs.rs/dirs) to obtain a platform-appropriate
//! base (`~/.local/share/relief/` on Linux).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::local::KvStore;
use crate::models::Namespace;

/// Filesystem-backed KvStore for desktop and mobile persistence.
#[derive(Clone, Debug)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.base.join(ns.as_str())
    }

    fn record_path(&self, ns: Namespace, key: &str) -> PathBuf {
        self.namespace_dir(ns)
            .join(format!("{}.json", hex::encode(key.as_bytes())))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(".json")?;
        String::from_utf8(hex::decode(stem).ok()?).ok()
    }
}

impl KvStore for FileStore {
    async fn put(&self, ns: Namespace, key: &str, value: Value) -> Result<()> {
        let dir = self.namespace_dir(ns);
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
        let bytes = serde_json::to_vec(&value)?;
        // write-then-rename so a crash never leaves a truncated record
        let path = self.record_path(ns, key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>> {
        match std::fs::read(self.record_path(ns, key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self, ns: Namespace) -> Result<Vec<(String, Value)>> {
        let entries = match std::fs::read_dir(self.namespace_dir(ns)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(Self::key_from_file_name) else {
                continue;
            };
            let bytes = std::fs::read(entry.path())?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => out.push((key, value)),
                Err(e) => tracing::warn!("Ignoring corrupt record {}: {e}", entry.path().display()),
            }
        }
        Ok(out)
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(ns, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, ns: Namespace) -> Result<()> {
        match std::fs::remove_dir_all(self.namespace_dir(ns)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
