//! Server orchestration.
//!
//! The server owns the shared components and runs two command sources
//! concurrently: the job pool, which drains the job directory and then
//! stops, and the registration listener, which serves interactive
//! sessions until shutdown. Shutdown tears the system down in order:
//! command sources stop, sessions close, pending backups drain, the
//! store terminates, and the registration pipe is removed.

mod registration;
mod session;

pub use registration::RegistrationListener;
pub use session::{Announcement, MAX_MESSAGE_SIZE};

use std::sync::Arc;

use tokio::signal;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::jobs::{JobQueue, JobScheduler};
use crate::persistence::BackupManager;
use crate::pipe as fifo;
use crate::runtime::{SharedSubscriptionRegistry, SubscriptionRegistry};
use crate::storage::KvStore;

/// Overrides for the server's shared components, used by tests to keep a
/// handle on state the server would otherwise own exclusively. Anything
/// left `None` is built from the config.
#[derive(Default)]
pub struct ServerDependencies {
    pub store: Option<Arc<KvStore>>,
    pub registry: Option<SharedSubscriptionRegistry>,
    pub backups: Option<Arc<BackupManager>>,
}

pub struct Server {
    config: Config,
    store: Arc<KvStore>,
    registry: SharedSubscriptionRegistry,
    backups: Arc<BackupManager>,
    queue: Arc<JobQueue>,
    session_budget: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        Self::new_with_dependencies(config, ServerDependencies::default())
    }

    /// Build a server, failing fast on anything the system cannot run
    /// without: invalid config, a store that is already initialized, a
    /// registration pipe that cannot be created, or a missing job
    /// directory.
    pub fn new_with_dependencies(config: Config, deps: ServerDependencies) -> Result<Self> {
        config.validate()?;

        let store = deps
            .store
            .unwrap_or_else(|| Arc::new(KvStore::new(config.store.buckets)));
        store.init()?;

        fifo::create(&config.server.registry_path)?;

        let queue = Arc::new(JobQueue::discover(&config.jobs.directory)?);
        info!(jobs = queue.len(), directory = %config.jobs.directory.display(), "job directory scanned");

        let registry = deps
            .registry
            .unwrap_or_else(|| Arc::new(SubscriptionRegistry::new()));
        let backups = deps
            .backups
            .unwrap_or_else(|| Arc::new(BackupManager::new(config.backup.max_concurrent)));
        let session_budget = Arc::new(Semaphore::new(config.server.max_sessions));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            registry,
            backups,
            queue,
            session_budget,
            shutdown_tx,
        })
    }

    /// Sender half of the shutdown signal. Sending on it stops the
    /// server the same way ctrl-c does.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown. Installs the ctrl-c handler, then serves.
    pub async fn run(self) -> Result<()> {
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    let _ = shutdown_tx.send(());
                }
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
        });

        self.serve().await
    }

    async fn serve(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let scheduler = JobScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.backups),
            Arc::clone(&self.queue),
            self.config.jobs.workers,
        );
        let jobs = {
            let shutdown = self.shutdown_tx.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        let listener = RegistrationListener::new(
            self.config.server.registry_path.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.session_budget),
            self.config.server.outbox_depth,
            self.shutdown_tx.clone(),
        );
        let registrations = tokio::spawn(async move { listener.run().await });

        // The job pool finishing is normal operation; the server keeps
        // serving sessions until told to stop.
        let _ = shutdown_rx.recv().await;
        info!("server shutting down");

        let _ = jobs.await;
        let _ = registrations.await;
        self.drain_sessions().await;
        self.backups.drain().await;

        let entries = self.store.len().unwrap_or(0);
        self.store.terminate()?;
        info!(entries, "store terminated");

        fifo::remove(&self.config.server.registry_path)?;
        info!("shutdown complete");
        Ok(())
    }

    /// Wait for every active session to tear down by draining the
    /// admission budget.
    async fn drain_sessions(&self) {
        let slots = self.config.server.max_sessions as u32;
        if let Ok(all) = self.session_budget.acquire_many(slots).await {
            drop(all);
        }
        debug!("all sessions closed");
    }
}
