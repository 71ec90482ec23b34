//! Main controller implementation.
//!
//! Owns the cache, the queue and the task handles, and wires them into the
//! watch→queue→reconcile loop: one watcher task keeps the cache fresh and
//! feeds the queue, a pool of worker tasks drains it. `start` returns as
//! soon as scheduling has launched; `stop` drives the graceful shutdown.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::ResourceCache;
use crate::error::ControllerError;
use crate::queue::ChangeQueue;
use crate::reconciler::{self, Reconciler};
use crate::watcher::Watcher;

/// Main controller for workload exposure management.
pub struct Controller {
    cache: Arc<ResourceCache>,
    queue: Arc<ChangeQueue>,
    reconciler: Arc<Reconciler>,
    workload_api: Api<Deployment>,
    workers: usize,
    shutdown_tx: watch::Sender<bool>,
    watcher_handle: Option<JoinHandle<Result<(), ControllerError>>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Creates a controller watching one namespace, or the whole cluster
    /// when `namespace` is `None`. Nothing runs until [`Controller::start`].
    pub fn new(client: Client, namespace: Option<String>, workers: usize) -> Self {
        info!("Initializing Auto-Expose Controller");

        let workload_api = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let cache = Arc::new(ResourceCache::new());
        let queue = Arc::new(ChangeQueue::new());
        let reconciler = Arc::new(Reconciler::new(client, Arc::clone(&cache)));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            cache,
            queue,
            reconciler,
            workload_api,
            workers: workers.max(1),
            shutdown_tx,
            watcher_handle: None,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns the watcher and worker tasks and returns once scheduling has
    /// launched. Workers hold off dequeuing until the cache reports synced,
    /// so nothing is reconciled against a partial view; callers that need
    /// the synced state poll [`Controller::synced`].
    pub fn start(&mut self) {
        let watcher = Watcher::new(
            self.workload_api.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.queue),
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.watcher_handle = Some(tokio::spawn(
            async move { watcher.run(shutdown_rx).await },
        ));

        for id in 0..self.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&self.queue);
            let cache = Arc::clone(&self.cache);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            self.worker_handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = cache.wait_synced() => {}
                    _ = shutdown_rx.changed() => return,
                }
                debug!("worker {} starting", id);
                reconciler::run_worker(reconciler, queue).await;
            }));
        }

        info!("controller started with {} worker(s)", self.workers);
    }

    /// Whether the initial workload listing has been applied in full.
    #[allow(dead_code)] // Lifecycle surface; the entry point does not poll it
    pub fn synced(&self) -> bool {
        self.cache.synced()
    }

    /// Initiates graceful shutdown and returns once every task has drained.
    ///
    /// The watcher stops, blocked dequeues return immediately, and workers
    /// exit after their current attempt; an in-flight API call is allowed
    /// to finish, only the next dequeue is refused.
    pub async fn stop(&mut self) {
        info!("Shutting down controller");
        self.shutdown_tx.send_replace(true);
        self.queue.shutdown();

        if let Some(handle) = self.watcher_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("workload watcher failed: {}", e),
                Err(e) => error!("workload watcher panicked: {}", e),
            }
        }
        for handle in self.worker_handles.drain(..) {
            if let Err(e) = handle.await {
                error!("worker panicked: {}", e);
            }
        }
        info!("controller stopped");
    }
}
