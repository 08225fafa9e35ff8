//! Worker pool and job execution.
//!
//! A fixed number of workers claim jobs from the startup snapshot and run
//! each one end-to-end: parse a line, apply it to the store, append the
//! response record to the job's `.out` file. A malformed line is reported
//! and skipped; an I/O failure is fatal to that job only. Workers stop
//! claiming when the snapshot is exhausted or shutdown is signalled, but
//! always finish the job they are on.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::jobs::command::{Command, HELP_TEXT};
use crate::jobs::parser::parse_line;
use crate::jobs::queue::{JobFile, JobQueue};
use crate::persistence::{backup_path, BackupManager};
use crate::storage::{Entry, KvStore};

/// Fixed pool of workers draining the job queue.
#[derive(Debug)]
pub struct JobScheduler {
    store: Arc<KvStore>,
    backups: Arc<BackupManager>,
    queue: Arc<JobQueue>,
    workers: usize,
}

impl JobScheduler {
    pub fn new(
        store: Arc<KvStore>,
        backups: Arc<BackupManager>,
        queue: Arc<JobQueue>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            backups,
            queue,
            workers,
        }
    }

    /// Run the pool until the snapshot is exhausted (or shutdown fires
    /// between jobs). Returns the number of jobs that completed cleanly.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> usize {
        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let store = Arc::clone(&self.store);
            let backups = Arc::clone(&self.backups);
            let queue = Arc::clone(&self.queue);
            let shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(worker_loop(
                id, store, backups, queue, shutdown_rx,
            )));
        }

        let mut processed = 0;
        for handle in handles {
            processed += handle.await.unwrap_or(0);
        }
        info!(processed, "job pool finished");
        processed
    }
}

async fn worker_loop(
    id: usize,
    store: Arc<KvStore>,
    backups: Arc<BackupManager>,
    queue: Arc<JobQueue>,
    mut shutdown: broadcast::Receiver<()>,
) -> usize {
    let mut processed = 0;
    loop {
        match shutdown.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            _ => {
                debug!(worker = id, "shutdown signalled, no more claims");
                break;
            }
        }
        let Some(job) = queue.claim() else { break };

        info!(worker = id, job = %job.input.display(), "processing job");
        match run_job(&store, &backups, &job).await {
            Ok(()) => {
                processed += 1;
                debug!(worker = id, job = %job.stem, "job finished");
            }
            Err(e) => error!(worker = id, job = %job.input.display(), error = %e, "job failed"),
        }
    }
    processed
}

/// Execute one claimed job end-to-end.
async fn run_job(store: &KvStore, backups: &BackupManager, job: &JobFile) -> Result<()> {
    let input = tokio::fs::read_to_string(&job.input).await?;
    let mut out = BufWriter::new(tokio::fs::File::create(&job.output).await?);
    let mut backup_seq = 0u64;

    for (idx, line) in input.lines().enumerate() {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(job = %job.stem, line = idx + 1, error = %e, "invalid command, see HELP for usage");
                continue;
            }
        };

        match command {
            Command::Empty => {}
            Command::Write(pairs) => {
                if let Err(e) = store.write(&pairs) {
                    warn!(job = %job.stem, error = %e, "failed to write pairs");
                }
            }
            Command::Read(keys) => match store.read(&keys) {
                Ok(report) => out.write_all(format_read(&report).as_bytes()).await?,
                Err(e) => warn!(job = %job.stem, error = %e, "failed to read keys"),
            },
            Command::Delete(keys) => match store.delete(&keys) {
                Ok(report) => {
                    if let Some(record) = format_delete(&report) {
                        out.write_all(record.as_bytes()).await?;
                    }
                }
                Err(e) => warn!(job = %job.stem, error = %e, "failed to delete keys"),
            },
            Command::Show => match store.show() {
                Ok(entries) => out.write_all(format_show(&entries).as_bytes()).await?,
                Err(e) => warn!(job = %job.stem, error = %e, "failed to show entries"),
            },
            Command::Wait(delay_ms) => {
                if delay_ms > 0 {
                    info!(job = %job.stem, delay_ms, "waiting");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
            Command::Backup => {
                backup_seq += 1;
                let dir = job.input.parent().unwrap_or_else(|| Path::new("."));
                let dest = backup_path(dir, &job.stem, backup_seq);
                if let Err(e) = backups.schedule(store, dest).await {
                    warn!(job = %job.stem, error = %e, "failed to do backup");
                }
            }
            Command::Help => out.write_all(HELP_TEXT.as_bytes()).await?,
        }
    }

    out.flush().await?;
    Ok(())
}

/// `[(key,value)(key,KVSERROR)...]` in request order.
fn format_read(report: &[(String, Option<String>)]) -> String {
    let mut record = String::from("[");
    for (key, value) in report {
        match value {
            Some(value) => {
                let _ = write!(record, "({key},{value})");
            }
            None => {
                let _ = write!(record, "({key},KVSERROR)");
            }
        }
    }
    record.push_str("]\n");
    record
}

/// `[(key,KVSMISSING)...]` for the keys that were absent, or nothing when
/// every key was removed.
fn format_delete(report: &[(String, bool)]) -> Option<String> {
    let mut record = String::new();
    for (key, _) in report.iter().filter(|(_, present)| !present) {
        if record.is_empty() {
            record.push('[');
        }
        let _ = write!(record, "({key},KVSMISSING)");
    }
    if record.is_empty() {
        return None;
    }
    record.push_str("]\n");
    Some(record)
}

/// One `(key, value)` line per live entry.
fn format_show(entries: &[Entry]) -> String {
    let mut record = String::with_capacity(entries.len() * 32);
    for entry in entries {
        let _ = writeln!(record, "({}, {})", entry.key, entry.value);
    }
    record
}
