//! Durable key-value store.
//!
//! The store is the sole source of truth. In-memory copies held by the session
//! manager and timers are caches that are written through on every mutation.
//!
//! # File Format
//!
//! [`FileStore`] keeps one pretty-printed JSON document per key:
//!
//! ```text
//! ~/.workout/store/
//!   current_session.json
//!   session_history.json
//!   personal_records.json
//!   backgrounded_at.json
//!   last_active_at.json
//!   subscription_tier.json
//! ```
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a crash mid-write leaves the previous value intact.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, WorkoutError};
use crate::types::{PersonalRecord, WorkoutSession};

/// Well-known keys.
pub mod keys {
    pub const CURRENT_SESSION: &str = "current_session";
    pub const SESSION_HISTORY: &str = "session_history";
    pub const PERSONAL_RECORDS: &str = "personal_records";
    pub const BACKGROUNDED_AT: &str = "backgrounded_at";
    pub const LAST_ACTIVE_AT: &str = "last_active_at";
    pub const SUBSCRIPTION_TIER: &str = "subscription_tier";

    /// Lifecycle markers cleared on recovery and discard.
    pub const LIFECYCLE_MARKERS: [&str; 2] = [BACKGROUNDED_AT, LAST_ACTIVE_AT];
}

/// Whether a persist call must land before the caller proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Failure is logged and swallowed; the next full-object write heals it.
    Eventual,
    /// Failure is returned to the caller.
    Awaited,
}

/// Crash-safe string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Typed JSON access on top of any [`KeyValueStore`].
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| WorkoutError::Json {
                    context: format!("decoding {}", key),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string_pretty(value).map_err(|source| WorkoutError::Json {
            context: format!("encoding {}", key),
            source,
        })?;
        self.set_raw(key, &raw)
    }

    /// Reads a value, treating unreadable or corrupt payloads as absent.
    fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get_json(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(err) => {
                tracing::warn!(key, error = %err, "Unreadable stored value, using default");
                T::default()
            }
        }
    }

    /// Writes according to `durability`: eventual writes log failures instead of returning them.
    fn persist_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        durability: Durability,
    ) -> Result<()> {
        match (self.set_json(key, value), durability) {
            (Ok(()), _) => Ok(()),
            (Err(err), Durability::Eventual) => {
                tracing::warn!(key, error = %err, "Write-through persist failed; next write will retry");
                Ok(())
            }
            (Err(err), Durability::Awaited) => Err(err),
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

// ─────────────────────────────────────────────────────────────────────────────
// Typed accessors for the well-known keys
// ─────────────────────────────────────────────────────────────────────────────

pub fn load_current_session(store: &dyn KeyValueStore) -> Option<WorkoutSession> {
    store.load_or_default(keys::CURRENT_SESSION)
}

pub fn load_history(store: &dyn KeyValueStore) -> Vec<WorkoutSession> {
    store.load_or_default(keys::SESSION_HISTORY)
}

pub fn load_ledger(store: &dyn KeyValueStore) -> Vec<PersonalRecord> {
    store.load_or_default(keys::PERSONAL_RECORDS)
}

pub fn load_marker(store: &dyn KeyValueStore, key: &str) -> Option<DateTime<Utc>> {
    store.load_or_default(key)
}

pub fn set_marker(store: &dyn KeyValueStore, key: &str, at: DateTime<Utc>) -> Result<()> {
    store.set_json(key, &at)
}

/// Removes both lifecycle markers, logging failures.
pub fn clear_lifecycle_markers(store: &dyn KeyValueStore) {
    for key in keys::LIFECYCLE_MARKERS {
        if let Err(err) = store.remove(key) {
            tracing::warn!(key, error = %err, "Failed to clear lifecycle marker");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FileStore
// ═══════════════════════════════════════════════════════════════════════════════

/// One JSON file per key under a root directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: &Path) -> Self {
        FileStore {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(WorkoutError::PersistenceWrite {
                key: key.to_string(),
                details: "invalid key".to_string(),
            });
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs_err::read_to_string(&path) {
            // Empty file reads as absent (interrupted first write)
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WorkoutError::Io {
                context: format!("reading {}", key),
                source,
            }),
        }
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let write_err = |details: String| WorkoutError::PersistenceWrite {
            key: key.to_string(),
            details,
        };

        fs_err::create_dir_all(&self.root).map_err(|e| write_err(e.to_string()))?;
        let mut temp_file =
            NamedTempFile::new_in(&self.root).map_err(|e| write_err(format!("temp file: {}", e)))?;
        temp_file
            .write_all(value.as_bytes())
            .map_err(|e| write_err(format!("write: {}", e)))?;
        temp_file
            .flush()
            .map_err(|e| write_err(format!("flush: {}", e)))?;
        temp_file
            .persist(&path)
            .map_err(|e| write_err(format!("rename: {}", e.error)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs_err::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(WorkoutError::PersistenceWrite {
                key: key.to_string(),
                details: err.to_string(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryStore
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    failing_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .map(|values| values.contains_key(key))
            .unwrap_or(false)
    }

    /// Makes the next `count` writes (set or remove) fail.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self, key: &str) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(WorkoutError::PersistenceWrite {
                key: key.to_string(),
                details: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn poisoned(key: &str) -> WorkoutError {
        WorkoutError::PersistenceWrite {
            key: key.to_string(),
            details: "store lock poisoned".to_string(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| Self::poisoned(key))?;
        Ok(values.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.take_injected_failure(key)?;
        let mut values = self.values.lock().map_err(|_| Self::poisoned(key))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.take_injected_failure(key)?;
        let mut values = self.values.lock().map_err(|_| Self::poisoned(key))?;
        values.remove(key);
        Ok(())
    }
}
