//! Error types for Galena
//!
//! This module defines all error types used throughout the Galena codebase.
//! Uses `thiserror` for ergonomic error definitions.

use std::io;
use thiserror::Error;

/// Main error type for Galena operations
#[derive(Error, Debug)]
pub enum GalenaError {
    /// Store lifecycle: `init` called on an initialized store
    #[error("KVS state has already been initialized")]
    AlreadyInitialized,

    /// Store lifecycle: operation on an uninitialized store
    #[error("KVS state must be initialized")]
    NotInitialized,

    /// Malformed job script command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Malformed session protocol line
    #[error("Malformed {0} command")]
    MalformedSession(String),

    /// Connection announcement that cannot be honored
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Backup snapshot could not be taken or serialized
    #[error("Backup error: {0}")]
    Backup(String),

    /// Outbound channel to a session is gone
    #[error("Session channel closed")]
    ChannelClosed,

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Galena operations
pub type Result<T> = std::result::Result<T, GalenaError>;

impl GalenaError {
    /// Returns true if this error should end the session or job it occurred in
    #[cold]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GalenaError::Io(_) | GalenaError::ChannelClosed | GalenaError::Internal(_)
        )
    }
}
