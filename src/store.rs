//! Persistent Store Adapter - durable key-value storage for JSON documents
//!
//! This module provides:
//! - The [`KeyValueStore`] seam with synchronous get/set/remove
//! - A file-backed store (one JSON file per key) and an in-memory store
//! - Versioned document helpers shared by the autosave, registry and
//!   completion documents

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Live conversation mirror.
pub const AUTOSAVE_KEY: &str = "socratic-math-tutor-history";
/// Saved session registry.
pub const SAVED_SESSIONS_KEY: &str = "socratic-math-tutor-sessions";
/// Attempted practice problems.
pub const COMPLETED_PROBLEMS_KEY: &str = "socratic-math-tutor-completed-problems";

/// Version written into every stored document envelope.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored document '{key}' is corrupt: {detail}")]
    Corrupt { key: String, detail: String },

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Synchronous key-value storage scoped by fixed string keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================
// File Backend (native platforms)
// ============================================

/// Stores each key as `<root>/<sanitized key>.json`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(io_err)?;

        // Write-then-rename so a reader never sees half a document.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

// ============================================
// In-memory Backend
// ============================================

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Sanitize storage key for filesystem use
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

// ============================================
// Versioned documents
// ============================================

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    data: &'a T,
}

/// Serializes `value` inside a versioned envelope and writes it under `key`.
pub fn write_document<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(&Envelope {
        version: DOCUMENT_VERSION,
        data: value,
    })
    .map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &json)
}

/// Reads a document written by [`write_document`], or a bare legacy payload.
pub fn read_document<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    let corrupt = |detail: String| StoreError::Corrupt {
        key: key.to_string(),
        detail,
    };

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|err| corrupt(err.to_string()))?;

    let payload = match value {
        serde_json::Value::Object(mut map) if map.contains_key("version") => {
            let version = map
                .get("version")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| corrupt("version is not a number".to_string()))?;
            if version == 0 || version > u64::from(DOCUMENT_VERSION) {
                return Err(corrupt(format!("unsupported document version {version}")));
            }
            map.remove("data")
                .ok_or_else(|| corrupt("envelope has no data".to_string()))?
        }
        other => other,
    };

    serde_json::from_value(payload)
        .map(Some)
        .map_err(|err| corrupt(err.to_string()))
}

/// Reads `key`, discarding it when corrupt. Storage failures are logged and
/// yield `None`; they never reach the user.
pub fn load_or_discard<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match read_document(store, key) {
        Ok(value) => value,
        Err(StoreError::Corrupt { detail, .. }) => {
            tracing::warn!(key, %detail, "discarding corrupt stored document");
            if let Err(err) = store.remove(key) {
                tracing::warn!(key, error = %err, "failed to remove corrupt document");
            }
            None
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to read stored document");
            None
        }
    }
}
