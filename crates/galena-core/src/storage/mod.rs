//! Storage module for Galena
//!
//! The store is a fixed-bucket chained hash table behind one global
//! readers-writer lock. Batch operations hold the lock for the whole
//! batch, which is what gives WRITE its all-or-nothing visibility and
//! READ/SHOW their single-point-in-time reports.

mod memory;
mod table;

pub use memory::KvStore;
pub use table::{Entry, HashTable};

/// Longest accepted key, in bytes.
pub const MAX_KEY_SIZE: usize = 40;
/// Longest accepted value, in bytes.
pub const MAX_VALUE_SIZE: usize = 256;
/// Most pairs in a WRITE batch, or keys in a READ/DELETE batch.
pub const MAX_BATCH_SIZE: usize = 128;
