//! Reconciliation logic for workload exposure.
//!
//! Each dequeued change event is re-derived from current observed state
//! rather than replayed: look the workload up, classify, then issue the one
//! create or delete call that moves the cluster toward the desired state.
//! Every step is idempotent, so duplicated or reordered notifications
//! converge to the same result.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::cache::ResourceCache;
use crate::error::ControllerError;
use crate::event::{ChangeEvent, WorkloadRef};
use crate::exposure;
use crate::filter;
use crate::queue::ChangeQueue;

/// Convergence action derived from the last observed workload state.
#[derive(Debug)]
pub enum Plan<'a> {
    /// Workload exists and opts in: ensure its Service exists.
    Converge(&'a Deployment),
    /// Workload is gone: remove the managed Service if it is ours.
    Teardown,
    /// Workload exists but does not opt in (e.g. the label was removed
    /// between enqueue and processing): nothing to do.
    Skip,
}

/// Classifies the observed state of a workload. Pure; the caller supplies
/// whatever view (cache or direct read) fits the triggering event.
pub fn plan(current: Option<&Deployment>) -> Plan<'_> {
    match current {
        None => Plan::Teardown,
        Some(workload) if filter::interesting(workload) => Plan::Converge(workload),
        Some(_) => Plan::Skip,
    }
}

/// Executes convergence actions against the cluster.
pub struct Reconciler {
    client: Client,
    cache: Arc<ResourceCache>,
}

impl Reconciler {
    pub fn new(client: Client, cache: Arc<ResourceCache>) -> Self {
        Self { client, cache }
    }

    fn workloads(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Runs the full state machine for one dequeued event.
    ///
    /// `Ok` means converged (including the deliberate no-op outcomes);
    /// `Err` means the attempt should be retried with backoff.
    pub async fn reconcile(&self, event: &ChangeEvent) -> Result<(), ControllerError> {
        let workload = event.workload();
        let current = match event {
            ChangeEvent::Added(r) => self.cache.get(r),
            // The cache has usually evicted a deleted object already; ask
            // the API directly so a quick re-create is not torn down.
            ChangeEvent::Deleted(r) => self
                .workloads(&r.namespace)
                .get_opt(&r.name)
                .await?
                .map(Arc::new),
        };

        match plan(current.as_deref()) {
            Plan::Converge(observed) => self.converge(workload, observed).await,
            Plan::Teardown => self.teardown(workload).await,
            Plan::Skip => {
                debug!("workload {} does not opt in, nothing to converge", workload);
                Ok(())
            }
        }
    }

    /// Ensures the exposure Service for an opted-in workload exists.
    ///
    /// An already existing Service is left untouched: creation is the only
    /// write, so replaying the same event is a no-op.
    async fn converge(
        &self,
        workload: &WorkloadRef,
        observed: &Deployment,
    ) -> Result<(), ControllerError> {
        let desired = exposure::build_exposure(observed);
        match self
            .services(&workload.namespace)
            .create(&PostParams::default(), &desired)
            .await
        {
            Ok(_) => {
                info!("created service {}", workload);
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!("service {} already exists, leaving it untouched", workload);
                Ok(())
            }
            Err(e) => {
                warn!("creating service {} failed: {}", workload, e);
                Err(e.into())
            }
        }
    }

    /// Removes the Service belonging to a deleted workload, but only when
    /// it carries the management label. User-created Services of the same
    /// name are never touched.
    async fn teardown(&self, workload: &WorkloadRef) -> Result<(), ControllerError> {
        let services = self.services(&workload.namespace);
        let existing = match services.get_opt(&workload.name).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                debug!("service {} already gone", workload);
                return Ok(());
            }
            Err(e) => {
                warn!("looking up service {} failed: {}", workload, e);
                return Err(e.into());
            }
        };

        if !filter::managed(&existing) {
            info!(
                "service {} was not created by this controller, leaving it in place",
                workload
            );
            return Ok(());
        }

        match services.delete(&workload.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("deleted service {}", workload);
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("service {} already gone", workload);
                Ok(())
            }
            Err(e) => {
                warn!("deleting service {} failed: {}", workload, e);
                Err(e.into())
            }
        }
    }
}

/// Sequential worker loop: drains the queue until shutdown, reporting every
/// attempt back to the queue exactly once.
pub async fn run_worker(reconciler: Arc<Reconciler>, queue: Arc<ChangeQueue>) {
    while let Some(event) = queue.get().await {
        let workload = event.workload().clone();
        match reconciler.reconcile(&event).await {
            Ok(()) => queue.forget(&workload),
            Err(e) => {
                warn!("reconciling {} failed: {}", workload, e);
                queue.add_rate_limited(event);
            }
        }
    }
    debug!("worker loop exiting: queue shut down");
}
