//! Job script command model.

/// One parsed job script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert or replace a batch of pairs, atomically.
    Write(Vec<(String, String)>),
    /// Report a batch of keys from one consistent view.
    Read(Vec<String>),
    /// Remove a batch of keys, reporting the ones that were absent.
    Delete(Vec<String>),
    /// Report every live entry.
    Show,
    /// Suspend this worker for the given number of milliseconds.
    Wait(u64),
    /// Snapshot the store into the next `.bck` file for this job.
    Backup,
    /// Append the command summary to the output file.
    Help,
    /// Blank line or `#` comment.
    Empty,
}

/// Command summary appended to the output file by HELP.
pub const HELP_TEXT: &str = "Available commands:\n  \
    WRITE [(key,value)(key2,value2),...]\n  \
    READ [key,key2,...]\n  \
    DELETE [key,key2,...]\n  \
    SHOW\n  \
    WAIT <delay_ms>\n  \
    BACKUP\n  \
    HELP\n";
