//! The shared key-value store.
//!
//! Every context (CLI invocations, the watch loop, the monitor UI) runs
//! independently; the store is the only channel between them. Keys hold
//! arbitrary JSON values. [`MemoryStore`] backs tests and single-process
//! runs, [`FileStore`] persists to a JSON file guarded by an OS file lock
//! so separate processes see a serialized view.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use serde_json::Value;

use crate::error::StoreError;

/// Minimal persistent map shared between contexts.
///
/// `get` returns only the keys that are present; callers treat a missing
/// entry as "unset" rather than an error. `set` merges, `remove` ignores
/// absent keys.
pub trait Store: Send + Sync {
    fn get(&self, keys: &[&str]) -> Result<BTreeMap<String, Value>, StoreError>;

    fn set(&self, entries: BTreeMap<String, Value>) -> Result<(), StoreError>;

    fn remove(&self, keys: &[&str]) -> Result<(), StoreError>;

    /// Writes `value` under `key` iff `free` approves the current value,
    /// returning whether the write happened.
    ///
    /// Implementations with interior access to their state override this
    /// with a genuinely atomic check-and-write; the default is a plain
    /// read-then-write for backends that cannot do better.
    fn claim(
        &self,
        key: &str,
        value: Value,
        free: &dyn Fn(Option<&Value>) -> bool,
    ) -> Result<bool, StoreError> {
        let current = self.get_one(key)?;
        if free(current.as_ref()) {
            self.set_one(key, value)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn get_one(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get(&[key])?.remove(key))
    }

    fn set_one(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.set(BTreeMap::from([(key.to_owned(), value)]))
    }
}

/// In-memory store for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of the current contents, for assertions in tests.
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.entries().clone()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        // A panic while holding the guard leaves the map itself intact.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<BTreeMap<String, Value>, StoreError> {
        let entries = self.entries();
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|value| ((*key).to_owned(), value.clone())))
            .collect())
    }

    fn set(&self, new: BTreeMap<String, Value>) -> Result<(), StoreError> {
        self.entries().extend(new);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    fn claim(
        &self,
        key: &str,
        value: Value,
        free: &dyn Fn(Option<&Value>) -> bool,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries();
        if free(entries.get(key)) {
            entries.insert(key.to_owned(), value);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Store persisted as one JSON object in a file.
///
/// Each operation takes an exclusive OS lock on a sibling `.lock` file,
/// reads the current contents, and (for writes) replaces the file through
/// a temp-file rename. The lock file is opened fresh per operation, so
/// threads within one process are serialized the same way processes are.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` on the decoded contents while holding the OS lock,
    /// writing the file back when `op` reports it dirtied the map.
    ///
    /// A missing parent directory means no store exists yet: reads see
    /// an empty map, writes fail from the write itself.
    fn with_exclusive<T>(
        &self,
        op: impl FnOnce(&mut BTreeMap<String, Value>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let lock_file = match OpenOptions::new().create(true).write(true).open(&self.lock_path) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(source) => return Err(StoreError::Io { path: self.lock_path.clone(), source }),
        };
        if let Some(lock_file) = &lock_file {
            lock_file
                .lock_exclusive()
                .map_err(|source| StoreError::Io { path: self.lock_path.clone(), source })?;
        }
        // Lock released when lock_file drops.

        let mut entries = self.read_entries()?;
        let (out, dirty) = op(&mut entries);
        if dirty {
            self.write_entries(&entries)?;
        }
        Ok(out)
    }

    fn read_entries(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(StoreError::Io { path: self.path.clone(), source }),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|source| StoreError::Corrupt { path: self.path.clone(), source })
    }

    fn write_entries(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let mut body = serde_json::to_string_pretty(entries)
            .map_err(|source| StoreError::Encode { path: self.path.clone(), source })?;
        body.push('\n');
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &self.path)
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, keys: &[&str]) -> Result<BTreeMap<String, Value>, StoreError> {
        self.with_exclusive(|entries| {
            let found = keys
                .iter()
                .filter_map(|key| {
                    entries.get(*key).map(|value| ((*key).to_owned(), value.clone()))
                })
                .collect();
            (found, false)
        })
    }

    fn set(&self, new: BTreeMap<String, Value>) -> Result<(), StoreError> {
        self.with_exclusive(move |entries| {
            entries.extend(new);
            ((), true)
        })
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.with_exclusive(|entries| {
            let mut dirty = false;
            for key in keys {
                dirty |= entries.remove(*key).is_some();
            }
            ((), dirty)
        })
    }

    fn claim(
        &self,
        key: &str,
        value: Value,
        free: &dyn Fn(Option<&Value>) -> bool,
    ) -> Result<bool, StoreError> {
        self.with_exclusive(move |entries| {
            if free(entries.get(key)) {
                entries.insert(key.to_owned(), value);
                (true, true)
            } else {
                (false, false)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    /// Verifies that get returns only the keys that are present.
    #[test]
    fn memory_get_skips_absent_keys() {
        let store = MemoryStore::new();
        store.set_one("a", json!(1)).expect("set");

        let found = store.get(&["a", "missing"]).expect("get");
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a"), Some(&json!(1)));
    }

    /// Verifies that set merges into existing contents instead of replacing them.
    #[test]
    fn memory_set_merges() {
        let store = MemoryStore::new();
        store.set_one("a", json!(1)).expect("set a");
        store
            .set(BTreeMap::from([("b".to_owned(), json!(2))]))
            .expect("set b");

        assert_eq!(store.get_one("a").expect("get"), Some(json!(1)));
        assert_eq!(store.get_one("b").expect("get"), Some(json!(2)));
    }

    /// Verifies that remove tolerates keys that were never set.
    #[test]
    fn memory_remove_ignores_absent_keys() {
        let store = MemoryStore::new();
        store.set_one("a", json!(1)).expect("set");
        store.remove(&["a", "missing"]).expect("remove");

        assert_eq!(store.get_one("a").expect("get"), None);
    }

    /// Verifies that claim writes only when the predicate approves the
    /// current value.
    #[test]
    fn memory_claim_respects_predicate() {
        let store = MemoryStore::new();

        let taken = store
            .claim("flag", json!(true), &|current| current.is_none())
            .expect("claim");
        assert!(taken);
        assert_eq!(store.get_one("flag").expect("get"), Some(json!(true)));

        let taken_again = store
            .claim("flag", json!(false), &|current| current.is_none())
            .expect("claim");
        assert!(!taken_again);
        assert_eq!(store.get_one("flag").expect("get"), Some(json!(true)));
    }

    /// Verifies that a file store round-trips values across instances.
    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let store = FileStore::new(&path);
        store.set_one("until", json!(1_000)).expect("set");

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get_one("until").expect("get"), Some(json!(1_000)));
    }

    /// Verifies that a missing store file reads as an empty map.
    #[test]
    fn file_store_missing_file_is_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("store.json"));

        assert!(store.get(&["anything"]).expect("get").is_empty());
    }

    /// Verifies that reads work before the store directory exists while
    /// writes fail.
    #[test]
    fn file_store_missing_parent_reads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("absent").join("store.json"));

        assert_eq!(store.get_one("a").expect("get"), None);
        assert!(store.set_one("a", json!(1)).is_err());
    }

    /// Verifies that unparseable store contents surface as a corrupt-file
    /// error instead of being silently dropped.
    #[test]
    fn file_store_rejects_corrupt_contents() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").expect("write");

        let store = FileStore::new(&path);
        let err = store.get_one("a").expect_err("corrupt file should error");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    /// Verifies that writes keep unrelated keys intact.
    #[test]
    fn file_store_set_preserves_other_keys() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("store.json"));

        store.set_one("a", json!("left")).expect("set a");
        store.set_one("b", json!("right")).expect("set b");
        store.remove(&["a"]).expect("remove");

        assert_eq!(store.get_one("a").expect("get"), None);
        assert_eq!(store.get_one("b").expect("get"), Some(json!("right")));
    }

    /// Verifies that claim on the file store behaves like the in-memory one.
    #[test]
    fn file_store_claim_respects_predicate() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("store.json"));

        assert!(store
            .claim("flag", json!(1), &|current| current.is_none())
            .expect("claim"));
        assert!(!store
            .claim("flag", json!(2), &|current| current.is_none())
            .expect("claim"));
        assert_eq!(store.get_one("flag").expect("get"), Some(json!(1)));
    }
}
