//! Persistence module for Galena
//!
//! The only durability surface is the explicit BACKUP snapshot; there is
//! no write-ahead log and no recovery on restart.

mod backup;

pub use backup::{backup_path, BackupManager};
