//! Workload watch wiring.
//!
//! Runs the long-lived watch subscription over Deployments and fans every
//! notification into the two consumers: the resource cache (all objects,
//! so lookups stay complete) and the change queue (opted-in objects only).
//! The listing events that open every (re-)connect drive the cache's
//! staging cycle, which is what keeps `synced()` honest across reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use kube_runtime::watcher;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::ResourceCache;
use crate::error::ControllerError;
use crate::event::{ChangeEvent, WorkloadRef};
use crate::filter;
use crate::queue::ChangeQueue;

/// Watches the workload collection and feeds cache and queue.
pub struct Watcher {
    api: Api<Deployment>,
    cache: Arc<ResourceCache>,
    queue: Arc<ChangeQueue>,
}

impl Watcher {
    pub fn new(api: Api<Deployment>, cache: Arc<ResourceCache>, queue: Arc<ChangeQueue>) -> Self {
        Self { api, cache, queue }
    }

    /// Runs the subscription until the shutdown signal fires.
    ///
    /// Stream errors are not fatal: the underlying watcher re-establishes
    /// the connection and re-lists, we just log and keep polling (with a
    /// short pause so a persistently failing API server does not spin us).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        info!("Starting workload watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("workload watcher stopping");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => apply_event(&self.cache, &self.queue, event),
                    Some(Err(e)) => {
                        warn!("watch stream error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    None => {
                        return Err(ControllerError::Watch(
                            "workload watch stream ended unexpectedly".to_string(),
                        ));
                    }
                },
            }
        }
    }
}

/// Applies one watch event to the cache and, when the object opts in, the
/// queue. Objects failing the filter are dropped here, before any queue
/// traffic.
fn apply_event(cache: &ResourceCache, queue: &ChangeQueue, event: watcher::Event<Deployment>) {
    match event {
        watcher::Event::Init => {
            debug!("workload listing started");
            cache.begin_resync();
        }
        watcher::Event::InitApply(workload) => handle_apply(cache, queue, workload, true),
        watcher::Event::InitDone => {
            info!("workload cache synced");
            cache.complete_resync();
        }
        watcher::Event::Apply(workload) => handle_apply(cache, queue, workload, false),
        watcher::Event::Delete(workload) => handle_delete(cache, queue, workload),
    }
}

fn handle_apply(cache: &ResourceCache, queue: &ChangeQueue, workload: Deployment, listing: bool) {
    let Some(workload_ref) = WorkloadRef::from_meta(&workload.metadata) else {
        warn!("ignoring workload notification without a name");
        return;
    };
    let interested = filter::interesting(&workload);
    if listing {
        cache.stage(workload_ref.clone(), workload);
    } else {
        cache.insert(workload_ref.clone(), workload);
    }
    if interested {
        debug!("workload {} applied", workload_ref);
        queue.add(ChangeEvent::Added(workload_ref));
    } else {
        debug!(
            "skipped workload {}: missing label `{}: {}`",
            workload_ref,
            filter::LABEL_KEY,
            filter::OPT_IN_VALUE
        );
    }
}

fn handle_delete(cache: &ResourceCache, queue: &ChangeQueue, workload: Deployment) {
    let Some(workload_ref) = WorkloadRef::from_meta(&workload.metadata) else {
        warn!("ignoring workload notification without a name");
        return;
    };
    cache.remove(&workload_ref);
    if filter::interesting(&workload) {
        info!("workload {} deleted", workload_ref);
        queue.add(ChangeEvent::Deleted(workload_ref));
    } else {
        debug!(
            "skipped deleted workload {}: missing label `{}: {}`",
            workload_ref,
            filter::LABEL_KEY,
            filter::OPT_IN_VALUE
        );
    }
}
