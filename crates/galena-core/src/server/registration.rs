//! Registration listener.
//!
//! Clients join by writing one announcement line to the server's
//! registration pipe. The listener holds its own write end open so the
//! pipe never reaches EOF between clients, reads announcements as they
//! arrive, and spawns a session task per accepted client.
//!
//! Admission is a semaphore sized to `server.max_sessions`. The slot is
//! taken before the handshake starts, so at capacity further
//! registrations queue on the pipe until a session ends.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::pipe as fifo;
use crate::runtime::SharedSubscriptionRegistry;
use crate::server::session::{self, Announcement};

pub struct RegistrationListener {
    path: PathBuf,
    registry: SharedSubscriptionRegistry,
    session_budget: Arc<Semaphore>,
    outbox_depth: usize,
    next_id: AtomicU64,
    shutdown: broadcast::Sender<()>,
}

impl RegistrationListener {
    pub fn new(
        path: PathBuf,
        registry: SharedSubscriptionRegistry,
        session_budget: Arc<Semaphore>,
        outbox_depth: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            path,
            registry,
            session_budget,
            outbox_depth,
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Listen on the registration pipe until shutdown. The pipe itself
    /// must already exist; the server creates it at startup.
    pub async fn run(&self) -> Result<()> {
        let bus = match fifo::open_bus(&self.path) {
            Ok(bus) => bus,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "cannot open registration pipe");
                return Err(e);
            }
        };
        let mut lines = BufReader::new(bus);
        let mut line = String::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(path = %self.path.display(), "listening for registrations");
        loop {
            line.clear();
            tokio::select! {
                read = lines.read_line(&mut line) => match read {
                    // Our own write end keeps the pipe open, so EOF means
                    // the pipe was torn out from under us.
                    Ok(0) => {
                        warn!(path = %self.path.display(), "registration pipe closed");
                        break;
                    }
                    Ok(_) => self.register(line.trim(), &mut shutdown_rx).await,
                    Err(e) => {
                        error!(error = %e, "registration read failed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("registration listener shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle one announcement line. A bad line is reported and skipped;
    /// the listener keeps serving.
    async fn register(&self, line: &str, shutdown: &mut broadcast::Receiver<()>) {
        if line.is_empty() {
            return;
        }
        let announcement = match Announcement::parse(line) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!(line, error = %e, "rejected announcement");
                return;
            }
        };
        if !self.channels_exist(&announcement) {
            return;
        }

        // The session's shutdown receiver must exist before the admission
        // wait; a signal sent while this client waits for a slot is
        // buffered for it.
        let session_shutdown = self.shutdown.subscribe();
        let permit = tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            permit = Arc::clone(&self.session_budget).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(session = id, request = %announcement.request.display(), "client registered");
        session::spawn(
            id,
            announcement,
            Arc::clone(&self.registry),
            self.outbox_depth,
            permit,
            session_shutdown,
        );
    }

    /// The announced paths must already be FIFOs; the client creates them
    /// before announcing.
    fn channels_exist(&self, announcement: &Announcement) -> bool {
        let mut paths = vec![&announcement.request, &announcement.response];
        if let Some(notification) = &announcement.notification {
            paths.push(notification);
        }
        for path in paths {
            if !fifo::is_fifo(path) {
                warn!(path = %path.display(), "announced channel does not exist");
                return false;
            }
        }
        debug!(request = %announcement.request.display(), "announcement channels verified");
        true
    }
}
