//! Orchestrator - owns the monitoring engine for the lifetime of the process
//!
//! The orchestrator:
//! - Wires the target store, scheduler and change notifier together
//! - Accepts target submissions and removals from the console
//! - Restores persisted targets at startup
//! - Persists the target list on every mutation
use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{DatabaseImpl, TargetRepository};
use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::{ChangeNotifier, HttpProber, Prober, Scheduler, StatusChange, Target, TargetStore};
use crate::validation::validate_target;

/// Writes full snapshots of the store, one at a time
struct Persister {
    store: Arc<TargetStore>,
    repository: Arc<dyn TargetRepository>,
    lock: tokio::sync::Mutex<()>,
}

impl Persister {
    /// Failures are logged and swallowed
    async fn save(&self) {
        let _guard = self.lock.lock().await;
        // Snapshot under the lock so writes land in mutation order
        let snapshot = self.store.list();
        if let Err(e) = self.repository.save_targets(&snapshot).await {
            warn!(error = %e, "failed to persist targets");
        }
    }

    fn spawn_writer(self: Arc<Self>, mut changes: broadcast::Receiver<StatusChange>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(url = %change.url, "persisting after status change");
                        self.save().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "persistence writer lagged");
                        self.save().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Main orchestrator for the pinger service
pub struct Orchestrator {
    store: Arc<TargetStore>,
    scheduler: Scheduler,
    notifier: ChangeNotifier,
    persister: Arc<Persister>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator. Must be called from within a tokio runtime.
    pub fn new(
        prober: Arc<dyn Prober>,
        repository: Arc<dyn TargetRepository>,
        event_capacity: usize,
    ) -> Self {
        let store = Arc::new(TargetStore::new());
        let notifier = ChangeNotifier::new(event_capacity);
        let scheduler = Scheduler::new(prober, store.clone(), notifier.clone());

        let persister = Arc::new(Persister {
            store: store.clone(),
            repository,
            lock: tokio::sync::Mutex::new(()),
        });
        let writer_handle = persister.clone().spawn_writer(notifier.subscribe());

        Self { store, scheduler, notifier, persister, writer_handle: Mutex::new(Some(writer_handle)) }
    }

    /// Build the HTTP prober and open the database named in `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let prober =
            HttpProber::new(config.probe.method, config.probe.timeout(), &config.probe.user_agent)?;
        let database = DatabaseImpl::open(&config.storage.database_path).await?;

        Ok(Self::new(Arc::new(prober), Arc::new(database), config.monitor.event_capacity))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.notifier.subscribe()
    }

    /// Re-seed the store from persistence and start a task per target.
    ///
    /// Returns how many targets are monitored afterwards.
    pub async fn restore(&self) -> Result<usize> {
        let persisted = self.persister.repository.load_targets().await?;
        info!("Found {} persisted targets", persisted.len());

        for record in persisted {
            let mut target = match validate_target(&record.name, &record.url, record.frequency) {
                Ok(target) => target,
                Err(e) => {
                    warn!(url = %record.url, error = %e, "skipping invalid persisted target");
                    continue;
                }
            };
            target.last_status_code = record.last_status_code;

            if let Err(e) = self.register(target) {
                warn!(url = %record.url, error = %e, "skipping persisted target");
            }
        }

        Ok(self.store.len())
    }

    /// Validate, store and start monitoring a new target
    pub async fn submit_target(&self, name: &str, url: &str, frequency: u64) -> MonitorResult<Target> {
        let target = validate_target(name, url, frequency)?;
        self.register(target.clone())?;
        info!(name = %target.name, url = %target.url, frequency, "added target");

        self.persister.save().await;
        Ok(target)
    }

    /// Stop monitoring `url` and drop it from the store
    pub async fn request_removal(&self, url: &str) -> MonitorResult<Target> {
        let url = url.trim();
        self.scheduler.stop(url)?;
        let removed = self.store.remove(url)?;
        info!(name = %removed.name, url = %removed.url, "removed target");

        self.persister.save().await;
        Ok(removed)
    }

    /// Store + schedule, rolling the store back if the task cannot start
    fn register(&self, target: Target) -> MonitorResult<()> {
        self.store.add(target.clone())?;
        if let Err(e) = self.scheduler.start(&target) {
            let _ = self.store.remove(&target.url);
            return Err(e);
        }
        Ok(())
    }

    pub fn targets(&self) -> Vec<Target> {
        self.store.list()
    }

    pub fn target(&self, url: &str) -> MonitorResult<Target> {
        let url = url.trim();
        self.store.get(url).ok_or_else(|| MonitorError::NotFound(url.to_string()))
    }

    /// Urls with a running probe task, sorted
    pub fn active_tasks(&self) -> Vec<String> {
        self.scheduler.active_urls()
    }

    /// Cancel every task and write a final snapshot
    pub async fn shutdown(&self) {
        let cancelled = self.scheduler.shutdown();
        self.persister.save().await;
        self.stop_writer();
        info!(cancelled, "orchestrator stopped");
    }

    fn stop_writer(&self) {
        let handle = self.writer_handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_writer();
    }
}
