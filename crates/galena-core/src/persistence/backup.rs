//! Backup manager
//!
//! BACKUP serializes a consistent point-in-time copy of the store into a
//! `.bck` file. The copy is taken under one shared-lock acquisition and
//! handed to a spawned task, so serialization never holds the store lock
//! and mutations after the snapshot point never leak into the file. A
//! semaphore bounds how many snapshot tasks are in flight; a request made
//! at the bound waits for a slot instead of failing.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GalenaError, Result};
use crate::storage::{Entry, KvStore};

/// Coordinates snapshot tasks against a fixed concurrency budget.
#[derive(Debug)]
pub struct BackupManager {
    budget: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Snapshot file path for job `stem`, backup number `seq` within that job.
pub fn backup_path(dir: &Path, stem: &str, seq: u64) -> PathBuf {
    dir.join(format!("{stem}-{seq}.bck"))
}

impl BackupManager {
    /// Create a manager allowing `max_concurrent` in-flight snapshots.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            budget: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Claim a budget slot, snapshot the store, and spawn the task that
    /// serializes the snapshot to `dest`.
    ///
    /// Waits while the budget is exhausted; returns once the snapshot has
    /// been taken and the task is running, which is the point after which
    /// further mutations cannot affect the file. A serialization failure
    /// inside the task is logged and the slot released; the requesting job
    /// has already moved on.
    pub async fn schedule(&self, store: &KvStore, dest: PathBuf) -> Result<()> {
        let permit = Arc::clone(&self.budget)
            .acquire_owned()
            .await
            .map_err(|_| GalenaError::Internal("backup budget closed".to_string()))?;

        let snapshot = store.snapshot()?;
        debug!(path = %dest.display(), entries = snapshot.len(), "snapshot taken, serializing");

        tokio::spawn(async move {
            match write_snapshot(&snapshot, &dest).await {
                Ok(()) => debug!(path = %dest.display(), entries = snapshot.len(), "backup written"),
                Err(e) => warn!(path = %dest.display(), error = %e, "backup serialization failed"),
            }
            drop(permit);
        });

        Ok(())
    }

    /// Number of snapshot tasks currently in flight.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.budget.available_permits()
    }

    /// Wait until every in-flight snapshot task has finished. Called on
    /// shutdown before the store is torn down.
    pub async fn drain(&self) {
        if let Ok(all) = self.budget.acquire_many(self.max_concurrent as u32).await {
            drop(all);
        }
        debug!("all backups drained");
    }
}

/// Serialize `entries` (already in bucket-then-chain order) as one
/// `(key, value)` line each.
async fn write_snapshot(entries: &[Entry], dest: &Path) -> std::io::Result<()> {
    let mut contents = String::with_capacity(entries.len() * 32);
    for entry in entries {
        let _ = writeln!(contents, "({}, {})", entry.key, entry.value);
    }
    tokio::fs::write(dest, contents).await
}
