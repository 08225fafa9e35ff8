//! # Galena
//!
//! A hashed key-value store that batch-processes job files and serves
//! interactive publish/subscribe sessions over named pipes.
//!
//! This is the top-level crate that re-exports the engine from
//! `galena-core` for a unified API. The server binary entry point lives
//! in `main.rs`; embedders can depend on this crate and drive
//! [`server::Server`] directly.

// ── Re-exports from galena-core ──────────────────────────────────────────────

pub use galena_core::config;
pub use galena_core::error;
pub use galena_core::jobs;
pub use galena_core::persistence;
pub use galena_core::pipe;
pub use galena_core::runtime;
pub use galena_core::server;
pub use galena_core::storage;

// ── Top-level re-exports for convenience ─────────────────────────────────────

pub use galena_core::Config;
pub use galena_core::{GalenaError, Result};
