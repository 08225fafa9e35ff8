//! # Galena Core
//!
//! Core engine for Galena: the hashed key-value store, batch job
//! scheduling, interactive client sessions, and snapshot persistence.
//!
//! The server binary in the workspace root wires these modules together;
//! everything here is usable as a library for embedding or testing.

pub mod config;
pub mod error;
pub mod jobs;
pub mod persistence;
pub mod pipe;
pub mod runtime;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{GalenaError, Result};
