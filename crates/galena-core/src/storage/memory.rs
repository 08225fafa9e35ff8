//! In-memory key-value store guarded by one global readers-writer lock.
//!
//! Every consumer in the system (workers, backups) goes through this one
//! lock: batch reads share it, batch writes hold it exclusively for the
//! whole batch, so no reader ever observes a half-applied batch. The lock
//! is synchronous and never held across a suspension point; critical
//! sections copy what they need and release.

use parking_lot::RwLock;

use crate::error::{GalenaError, Result};
use crate::storage::table::{Entry, HashTable};

/// The store engine. Created uninitialized; [`KvStore::init`] builds the
/// table and [`KvStore::terminate`] tears it down, mirroring the process
/// lifecycle.
#[derive(Debug)]
pub struct KvStore {
    table: RwLock<Option<HashTable>>,
    buckets: usize,
}

impl KvStore {
    /// Create an uninitialized store that will use `buckets` hash buckets
    /// once initialized.
    pub fn new(buckets: usize) -> Self {
        Self {
            table: RwLock::new(None),
            buckets,
        }
    }

    /// Build the table. Fails if the store is already initialized.
    pub fn init(&self) -> Result<()> {
        let mut guard = self.table.write();
        if guard.is_some() {
            return Err(GalenaError::AlreadyInitialized);
        }
        *guard = Some(HashTable::new(self.buckets));
        Ok(())
    }

    /// Drop the table and every entry in it. Fails if the store was never
    /// initialized (or was already terminated).
    pub fn terminate(&self) -> Result<()> {
        let mut guard = self.table.write();
        if guard.is_none() {
            return Err(GalenaError::NotInitialized);
        }
        *guard = None;
        Ok(())
    }

    /// Insert or replace every pair in the batch under one exclusive lock
    /// acquisition.
    pub fn write(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut guard = self.table.write();
        let table = guard.as_mut().ok_or(GalenaError::NotInitialized)?;
        for (key, value) in pairs {
            table.set(key, value);
        }
        Ok(())
    }

    /// Look up every key in the batch under one shared lock acquisition,
    /// so the report reflects a single consistent point in time. Missing
    /// keys come back as `None`, not as errors.
    pub fn read(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or(GalenaError::NotInitialized)?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), table.get(key).map(str::to_string)))
            .collect())
    }

    /// Remove every present key in the batch under one exclusive lock
    /// acquisition. Each key is reported with whether it was present.
    pub fn delete(&self, keys: &[String]) -> Result<Vec<(String, bool)>> {
        let mut guard = self.table.write();
        let table = guard.as_mut().ok_or(GalenaError::NotInitialized)?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), table.remove(key)))
            .collect())
    }

    /// Every live entry in bucket-then-chain order, under the shared lock.
    pub fn show(&self) -> Result<Vec<Entry>> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or(GalenaError::NotInitialized)?;
        Ok(table.entries())
    }

    /// Consistent point-in-time duplicate of the store for backup
    /// serialization. Taken under one shared lock acquisition; mutations
    /// after this call never affect the returned copy.
    pub fn snapshot(&self) -> Result<Vec<Entry>> {
        self.show()
    }

    /// Number of live entries, or `NotInitialized`.
    pub fn len(&self) -> Result<usize> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or(GalenaError::NotInitialized)?;
        Ok(table.len())
    }
}
