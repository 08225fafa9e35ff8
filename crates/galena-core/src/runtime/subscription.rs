//! Key subscription registry and notification fanout
//!
//! Sessions subscribe to store keys; PUBLISH hands a message line to every
//! other current subscriber of that key. One mutex guards the whole map,
//! independent of the store lock, and delivery inside the critical section
//! is non-blocking: each subscriber is reached through the bounded outbox
//! of its session, so a slow client can never stall a publisher.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Identifies one connected session for the lifetime of the process.
pub type SessionId = u64;

/// One (key, session) subscription; the outbox is the session's delivery
/// handle.
#[derive(Debug, Clone)]
struct Subscriber {
    session: SessionId,
    outbox: mpsc::Sender<String>,
}

/// Manages key subscriptions and message fanout
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// key -> subscribed sessions
    entries: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `session` to `key`, delivering future messages through
    /// `outbox`. Idempotent: re-subscribing an already subscribed session
    /// changes nothing. Returns false in that case.
    pub fn subscribe(&self, session: SessionId, key: &str, outbox: mpsc::Sender<String>) -> bool {
        let mut entries = self.entries.lock();
        let subscribers = entries.entry(key.to_string()).or_default();
        if subscribers.iter().any(|s| s.session == session) {
            return false;
        }
        subscribers.push(Subscriber { session, outbox });
        true
    }

    /// Remove the (key, session) pair if present. Absence is not an error;
    /// returns whether anything was removed.
    pub fn unsubscribe(&self, session: SessionId, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(subscribers) = entries.get_mut(key) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.session != session);
        let removed = subscribers.len() < before;
        if subscribers.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Deliver `message` to every subscriber of `key` except `sender`.
    /// Best-effort: a full or closed outbox drops that one copy with a
    /// warning and the rest still receive. Returns the number delivered.
    pub fn publish(&self, key: &str, message: &str, sender: SessionId) -> usize {
        let entries = self.entries.lock();
        let Some(subscribers) = entries.get(key) else {
            return 0;
        };

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.session != sender) {
            match sub.outbox.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = sub.session, key, "subscriber outbox full, dropping notification");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(session = sub.session, key, "subscriber outbox closed, dropping notification");
                }
            }
        }
        delivered
    }

    /// Remove every subscription owned by `session`, regardless of key.
    /// Invoked during session teardown. Returns the number removed.
    pub fn remove_all(&self, session: SessionId) -> usize {
        let mut entries = self.entries.lock();
        let mut removed = 0;
        entries.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.session != session);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    /// Number of sessions currently subscribed to `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        let entries = self.entries.lock();
        entries.get(key).map(Vec::len).unwrap_or(0)
    }
}

/// Thread-safe registry handle
pub type SharedSubscriptionRegistry = Arc<SubscriptionRegistry>;
