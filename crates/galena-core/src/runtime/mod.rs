//! Shared runtime components
//!
//! State that outlives any single session and is handed around as
//! `Arc<...>` by the server.

/// Key subscription registry and notification fanout
pub mod subscription;

pub use subscription::{SessionId, SharedSubscriptionRegistry, SubscriptionRegistry};
