//! Runs the reconciler against the store
//!
//! The manager lists every Promotion once at start, then follows the store's
//! change stream. Keys go through a [`WorkQueue`] drained by a fixed number
//! of workers, so no Promotion is reconciled by two workers at once.

use relay_store::ObjectStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::predicates::{keys_to_enqueue, ShardFilter};
use crate::queue::WorkQueue;
use crate::reconciler::PromotionReconciler;

/// Drives a [`PromotionReconciler`] from store events
pub struct Manager {
    reconciler: Arc<PromotionReconciler>,
    queue: Arc<WorkQueue>,
    filter: ShardFilter,
}

impl Manager {
    pub fn new(reconciler: PromotionReconciler) -> Self {
        let filter = ShardFilter::from_config(reconciler.config());
        Self {
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            filter,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Arc<PromotionReconciler> {
        &self.reconciler
    }

    /// Run until `shutdown` resolves. In-flight reconciles are allowed to
    /// finish; queued keys are dropped.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let name = self.reconciler.config().name();
        let workers = self.reconciler.config().max_concurrent_reconciles.max(1);

        // Subscribe before listing so nothing between the two is missed.
        let events = self.reconciler.store().watch();
        enqueue_all(self.reconciler.store().as_ref(), &self.queue, &self.filter).await?;

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            tasks.spawn(async move { run_worker(worker, reconciler, queue).await });
        }
        let watcher = tokio::spawn(forward_events(
            self.reconciler.clone(),
            self.queue.clone(),
            self.filter.clone(),
            events,
        ));

        info!(controller = %name, workers, "Promotion controller started");
        shutdown.await;
        info!(controller = %name, "Promotion controller shutting down");

        watcher.abort();
        self.queue.shut_down();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }

        info!(controller = %name, "Promotion controller stopped");
        Ok(())
    }
}

async fn enqueue_all(store: &dyn ObjectStore, queue: &WorkQueue, filter: &ShardFilter) -> Result<()> {
    let promotions = store.list_promotions().await?;
    let mut queued = 0usize;
    for promotion in promotions {
        if filter.matches(&promotion.metadata) && !promotion.status.is_terminal() {
            queue.add(promotion.metadata.key());
            queued += 1;
        }
    }
    debug!(queued, "enqueued existing Promotions");
    Ok(())
}

async fn forward_events(
    reconciler: Arc<PromotionReconciler>,
    queue: Arc<WorkQueue>,
    filter: ShardFilter,
    mut events: tokio::sync::broadcast::Receiver<relay_store::WatchEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                for key in keys_to_enqueue(&event, &filter) {
                    queue.add(key);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "watch lagged, resyncing");
                if let Err(e) = enqueue_all(reconciler.store().as_ref(), &queue, &filter).await {
                    error!(error = %e, "resync failed");
                }
            }
            Err(RecvError::Closed) => {
                debug!("watch closed");
                return;
            }
        }
    }
}

async fn run_worker(worker: usize, reconciler: Arc<PromotionReconciler>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                queue.forget(&key);
                if let Some(delay) = outcome.requeue_after {
                    queue.add_after(key.clone(), delay);
                }
            }
            Err(e) => {
                if e.is_conflict() {
                    debug!(worker, promotion = %key, "status write conflicted, retrying");
                } else {
                    error!(worker, promotion = %key, error = %e, "reconcile failed");
                }
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
    debug!(worker, "worker stopped");
}
