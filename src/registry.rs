//! Lazily created databases, keyed or single.
//!
//! [`DatabaseRegistry`] maps keys to live databases. The first
//! [`DatabaseRegistry::get_database`] for a key creates the database through
//! the [`DatabaseFactory`]; concurrent first calls for the same key are
//! serialized on a per-key lock so creation happens at most once. Lookups of
//! registered keys only take a read lock.
//!
//! [`DatabaseProvider`] is the single-slot variant.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{instrument, Level};

use crate::{Database, Result};

/// Something that holds engine resources and can release them.
pub trait Closeable: Send + Sync {
    fn close(&self) -> Result<()>;
}

impl Closeable for Database {
    fn close(&self) -> Result<()> {
        Database::close(self)
    }
}

/// Hooks a registry uses to locate, create and delete its databases.
pub trait DatabaseFactory: Send + Sync {
    type Key: Eq + Hash + Clone + Send + Sync;
    type Database: Closeable;

    /// File backing `key`, or `None` when the database cannot be registered
    /// (for example because the file is expected to exist and does not).
    fn database_filename(&self, key: &Self::Key) -> Option<PathBuf>;

    fn create_database(&self, path: &Path) -> Result<Self::Database>;

    /// Deletes the files of a closed database.
    fn delete_database(&self, path: &Path) -> Result<()> {
        crate::files::delete_database_files(path)?;
        Ok(())
    }

    fn key_to_string(&self, key: &Self::Key) -> String;
}

/// Per-key creation locks. The map itself is locked only while a key's lock
/// is fetched or inserted, never while it is held.
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct Entry<D> {
    database: Arc<D>,
    path: PathBuf,
}

fn close_entry<F: DatabaseFactory>(factory: &F, key: &F::Key, entry: Entry<F::Database>, delete: bool) {
    let name = factory.key_to_string(key);
    if let Err(e) = entry.database.close() {
        tracing::warn!(key = %name, "failed to close database: {e}");
    }
    if delete {
        if let Err(e) = factory.delete_database(&entry.path) {
            tracing::warn!(key = %name, path = %entry.path.display(), "failed to delete database: {e}");
        }
    }
    tracing::debug!(key = %name, deleted = delete, "closed database");
}

/// A map from keys to lazily created databases.
pub struct DatabaseRegistry<F: DatabaseFactory> {
    factory: F,
    entries: RwLock<HashMap<F::Key, Entry<F::Database>>>,
    creation_locks: KeyedLocks<F::Key>,
}

impl<F: DatabaseFactory> DatabaseRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
            creation_locks: KeyedLocks::new(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn registered(&self, key: &F::Key) -> Option<Arc<F::Database>> {
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.database.clone())
    }

    /// Returns the database for `key`, creating and registering it on first use.
    ///
    /// Returns `Ok(None)` when the factory has no file for `key`. A creation
    /// error is returned to the caller and leaves the key unregistered, so a
    /// later call retries.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn get_database(&self, key: &F::Key) -> Result<Option<Arc<F::Database>>> {
        if let Some(database) = self.registered(key) {
            return Ok(Some(database));
        }
        let lock = self.creation_locks.lock_for(key);
        let _guard = lock.lock();
        if let Some(database) = self.registered(key) {
            return Ok(Some(database));
        }
        let name = self.factory.key_to_string(key);
        let Some(path) = self.factory.database_filename(key) else {
            tracing::debug!(key = %name, "no database file, not registering");
            return Ok(None);
        };
        let database = Arc::new(self.factory.create_database(&path)?);
        tracing::debug!(key = %name, path = %path.display(), "registered database");
        self.entries.write().insert(
            key.clone(),
            Entry {
                database: database.clone(),
                path,
            },
        );
        Ok(Some(database))
    }

    pub fn is_database_registered(&self, key: &F::Key) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn registered_keys(&self) -> Vec<F::Key> {
        self.entries.read().keys().cloned().collect()
    }

    /// Closes and unregisters `key`, deleting its files when `delete_file`
    /// is set. Close and delete failures are logged; the entry is removed
    /// regardless. Returns whether `key` was registered.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn close_database(&self, key: &F::Key, delete_file: bool) -> bool {
        let lock = self.creation_locks.lock_for(key);
        let _guard = lock.lock();
        let Some(entry) = self.entries.write().remove(key) else {
            return false;
        };
        close_entry(&self.factory, key, entry, delete_file);
        true
    }

    /// Closes every registered database. One failing close does not stop the others.
    pub fn close_all_databases(&self, delete_files: bool) {
        for key in self.registered_keys() {
            self.close_database(&key, delete_files);
        }
    }
}

impl<F: DatabaseFactory> Debug for DatabaseRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .registered_keys()
            .iter()
            .map(|key| self.factory.key_to_string(key))
            .collect();
        f.debug_struct("DatabaseRegistry")
            .field("keys", &keys)
            .finish()
    }
}

/// A single lazily created database.
pub struct DatabaseProvider<F: DatabaseFactory<Key = ()>> {
    factory: F,
    slot: Mutex<Option<Entry<F::Database>>>,
}

impl<F: DatabaseFactory<Key = ()>> DatabaseProvider<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Returns the database, creating it on first use.
    pub fn get_database(&self) -> Result<Option<Arc<F::Database>>> {
        let mut slot = self.slot.lock();
        if let Some(entry) = slot.as_ref() {
            return Ok(Some(entry.database.clone()));
        }
        let Some(path) = self.factory.database_filename(&()) else {
            return Ok(None);
        };
        let database = Arc::new(self.factory.create_database(&path)?);
        *slot = Some(Entry {
            database: database.clone(),
            path,
        });
        Ok(Some(database))
    }

    pub fn is_database_created(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Closes the database and empties the slot. Returns whether one was open.
    pub fn close_database(&self, delete_file: bool) -> bool {
        let Some(entry) = self.slot.lock().take() else {
            return false;
        };
        close_entry(&self.factory, &(), entry, delete_file);
        true
    }
}
