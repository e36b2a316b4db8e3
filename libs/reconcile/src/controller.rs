//! Fleet controller: work queue, worker pool and resync loop.

use std::sync::Arc;
use std::time::Duration;

use seedfleet_events::Notification;
use seedfleet_id::FleetKey;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::RetryTracker;
use crate::error::ReconcileError;
use crate::queue::WorkQueue;
use crate::reconciler::FleetReconciler;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Interval at which every known fleet is enqueued.
    pub resync_interval: Duration,

    /// Upper bound on a single pass.
    pub pass_timeout: Duration,

    /// Window over which consecutive pass failures are counted.
    pub failure_window: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(30),
            pass_timeout: Duration::from_secs(60),
            failure_window: Duration::from_secs(10 * 60),
        }
    }
}

/// Runs reconciliation passes for many fleets.
pub struct FleetController {
    reconciler: Arc<FleetReconciler>,
    queue: Arc<WorkQueue<FleetKey>>,
    options: ControllerOptions,
    retries: Mutex<RetryTracker>,
}

impl FleetController {
    pub fn new(reconciler: FleetReconciler, options: ControllerOptions) -> Self {
        let retries = RetryTracker::new(reconciler.config().backoff, options.failure_window);
        Self {
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            options,
            retries: Mutex::new(retries),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<FleetKey>> {
        &self.queue
    }

    /// Run until shutdown is signaled.
    ///
    /// Fleets are enqueued on every notification, on every resync tick and
    /// whenever a pass asks to be requeued.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::UnboundedReceiver<Notification>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            workers = self.options.workers,
            resync_secs = self.options.resync_interval.as_secs(),
            "Starting fleet controller"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.options.workers.max(1) {
            let controller = Arc::clone(&self);
            workers.spawn(async move { controller.worker(id).await });
        }

        self.resync().await;
        let mut interval = tokio::time::interval(self.options.resync_interval);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.resync().await;
                }
                Some(notification) = notifications.recv() => {
                    debug!(?notification, "notification received");
                    self.queue.add(notification.fleet().clone()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Fleet controller shutting down");
                        break;
                    }
                }
            }
        }

        self.queue.shutdown().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }
    }

    async fn worker(&self, id: usize) {
        debug!(worker = id, "worker started");
        while self.handle_next().await {}
        debug!(worker = id, "worker stopped");
    }

    /// Take one key off the queue and process it. Returns `false` once the
    /// queue is shut down.
    async fn handle_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.process(&key).await;
        self.queue.done(&key).await;
        true
    }

    /// Run one pass and schedule the next one.
    ///
    /// The pass runs on its own task. Past `pass_timeout` it counts as a
    /// failure, but the key stays held until the in-flight replica call
    /// returns so no second pass overlaps it.
    pub async fn process(&self, key: &FleetKey) {
        let timeout = self.options.pass_timeout;
        let reconciler = Arc::clone(&self.reconciler);
        let pass_key = key.clone();
        let mut pass = tokio::spawn(async move { reconciler.reconcile(&pass_key).await });

        let joined = match tokio::time::timeout(timeout, &mut pass).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    fleet = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Pass exceeded its timeout, waiting for in-flight work"
                );
                pass.await.map(|_| {
                    Err(ReconcileError::Timeout {
                        resource: key.to_string(),
                        elapsed: timeout,
                    })
                })
            }
        };

        let result = joined.unwrap_or_else(|e| {
            Err(ReconcileError::Aborted {
                fleet: key.clone(),
                message: e.to_string(),
            })
        });

        match result {
            Ok(outcome) => {
                self.retries.lock().await.clear(&key.to_string());
                if let Some(delay) = outcome.requeue_after() {
                    self.queue.add_after(key.clone(), delay).await;
                }
            }
            Err(e) => {
                let (delay, failures) = {
                    let mut retries = self.retries.lock().await;
                    let delay = retries.record_failure(&key.to_string());
                    (delay, retries.failures(&key.to_string()))
                };
                error!(
                    fleet = %key,
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Fleet reconciliation failed"
                );
                self.queue.add_after(key.clone(), delay).await;
            }
        }
    }

    /// Enqueue every known fleet.
    async fn resync(&self) {
        match self.reconciler.fleet_store().list_fleets().await {
            Ok(keys) => {
                debug!(count = keys.len(), "resync");
                for key in keys {
                    self.queue.add(key).await;
                }
            }
            Err(e) => warn!(error = %e, "resync failed to list fleets"),
        }
        self.retries.lock().await.prune();
    }
}
