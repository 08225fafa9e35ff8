//! Job scheduler module for Galena
//!
//! Batch command scripts (`.job` files) are discovered once at startup,
//! claimed exactly once each by a fixed worker pool, and executed
//! sequentially against the store. Each job produces a matching `.out`
//! file and may request snapshots through the backup manager.

mod command;
mod parser;
mod queue;
mod runner;

pub use command::{Command, HELP_TEXT};
pub use parser::parse_line;
pub use queue::{JobFile, JobQueue};
pub use runner::JobScheduler;
