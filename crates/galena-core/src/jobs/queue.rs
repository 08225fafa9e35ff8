//! Job discovery and the claim protocol.
//!
//! The jobs directory is enumerated exactly once at startup; files that
//! appear later are never discovered. Workers then claim entries through a
//! mutex that covers only the cursor advance, so claiming is exactly-once
//! while the actual file processing runs outside any lock.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{GalenaError, Result};

/// One discovered job: input script, matched output path, and the base
/// name used for its backup files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFile {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stem: String,
}

/// Startup snapshot of the jobs directory with a guarded claim cursor.
#[derive(Debug)]
pub struct JobQueue {
    remaining: Mutex<VecDeque<JobFile>>,
}

impl JobQueue {
    /// Enumerate `dir` once, keeping regular files with the `.job`
    /// extension, sorted by name so claim order is deterministic.
    pub fn discover(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            GalenaError::Config(format!("Failed to open jobs directory {:?}: {}", dir, e))
        })?;

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("job") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            jobs.push(JobFile {
                stem: stem.to_string(),
                output: path.with_extension("out"),
                input: path,
            });
        }

        jobs.sort_by(|a, b| a.input.cmp(&b.input));
        debug!(dir = %dir.display(), jobs = jobs.len(), "jobs directory snapshot taken");

        Ok(Self {
            remaining: Mutex::new(jobs.into()),
        })
    }

    /// Claim the next unclaimed job, or `None` when the snapshot is
    /// exhausted. The lock is held only for the pop.
    pub fn claim(&self) -> Option<JobFile> {
        self.remaining.lock().pop_front()
    }

    /// Jobs not yet claimed.
    pub fn len(&self) -> usize {
        self.remaining.lock().len()
    }

    /// True when every job has been claimed.
    pub fn is_empty(&self) -> bool {
        self.remaining.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"SHOW\n").unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.job");
        touch(dir.path(), "a.job");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "trap.job.bak");
        std::fs::create_dir(dir.path().join("sub.job")).unwrap();

        let queue = JobQueue::discover(dir.path()).unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.claim().unwrap();
        assert_eq!(first.stem, "a");
        assert_eq!(first.output, dir.path().join("a.out"));
        assert_eq!(queue.claim().unwrap().stem, "b");
        assert!(queue.claim().is_none());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(JobQueue::discover(Path::new("/no/such/dir/galena")).is_err());
    }

    #[test]
    fn test_each_job_claimed_exactly_once_across_threads() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            touch(dir.path(), &format!("job{i:02}.job"));
        }

        let queue = Arc::new(JobQueue::discover(dir.path()).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim() {
                    claimed.push(job.stem);
                }
                claimed
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        assert_eq!(all.len(), 50);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 50, "a job was claimed twice");
        assert!(queue.is_empty());
    }
}
