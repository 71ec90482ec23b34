//! Local mirror of the watched workload collection.
//!
//! Maintains an eventually-consistent `WorkloadRef -> Deployment` table so
//! reconcile lookups never cost a network round trip. Written only by the
//! watcher task, read by any number of workers.
//!
//! The watch subscription re-lists after a reconnect. During a re-list the
//! incoming objects accumulate in a staging buffer which atomically replaces
//! the live table once the listing completes, so objects deleted while the
//! subscription was down do not linger. `synced()` is false until the first
//! listing has been applied in full and drops back to false for the duration
//! of a re-list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use k8s_openapi::api::apps::v1::Deployment;
use tokio::sync::watch;

use crate::event::WorkloadRef;

/// Read-mostly mirror of all watched workloads.
#[derive(Debug)]
pub struct ResourceCache {
    objects: RwLock<HashMap<WorkloadRef, Arc<Deployment>>>,
    staging: Mutex<Option<HashMap<WorkloadRef, Arc<Deployment>>>>,
    synced_tx: watch::Sender<bool>,
}

impl ResourceCache {
    pub fn new() -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            objects: RwLock::new(HashMap::new()),
            staging: Mutex::new(None),
            synced_tx,
        }
    }

    /// Point lookup by namespace and name. No network I/O; the result may
    /// lag the true external state between reconciles.
    pub fn get(&self, workload: &WorkloadRef) -> Option<Arc<Deployment>> {
        self.objects.read().unwrap().get(workload).cloned()
    }

    /// Applies a live add/update notification.
    pub fn insert(&self, workload: WorkloadRef, object: Deployment) {
        self.objects.write().unwrap().insert(workload, Arc::new(object));
    }

    /// Applies a live delete notification.
    pub fn remove(&self, workload: &WorkloadRef) {
        self.objects.write().unwrap().remove(workload);
    }

    /// Marks the start of a (re-)listing: lookups keep serving the previous
    /// view, new listed objects go to a staging buffer.
    pub fn begin_resync(&self) {
        *self.staging.lock().unwrap() = Some(HashMap::new());
        self.synced_tx.send_replace(false);
    }

    /// Records one object of an in-progress listing.
    pub fn stage(&self, workload: WorkloadRef, object: Deployment) {
        let mut staging = self.staging.lock().unwrap();
        match staging.as_mut() {
            Some(buffer) => {
                buffer.insert(workload, Arc::new(object));
            }
            // Listing events always follow a begin_resync; tolerate a bare
            // one by applying it live.
            None => self.insert(workload, object),
        }
    }

    /// Completes the listing: the staged view replaces the live one and the
    /// cache reports synced again.
    pub fn complete_resync(&self) {
        if let Some(buffer) = self.staging.lock().unwrap().take() {
            *self.objects.write().unwrap() = buffer;
        }
        self.synced_tx.send_replace(true);
    }

    /// Whether the initial listing has been fully applied. Permanently true
    /// apart from re-list windows after a subscription reconnect.
    pub fn synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Suspends until `synced()` is true.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced_tx.subscribe();
        // Resolves immediately when already synced.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_workload;

    fn workload(name: &str) -> (WorkloadRef, Deployment) {
        (
            WorkloadRef::new("ns", name),
            test_workload(name, "ns", true, &[("app", name)], &[8080]),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = ResourceCache::new();
        let (r, dep) = workload("foo");

        assert!(cache.get(&r).is_none());
        cache.insert(r.clone(), dep);
        assert_eq!(
            cache.get(&r).unwrap().metadata.name.as_deref(),
            Some("foo")
        );
        cache.remove(&r);
        assert!(cache.get(&r).is_none());
    }

    #[test]
    fn test_synced_flips_on_complete() {
        let cache = ResourceCache::new();
        assert!(!cache.synced());

        cache.begin_resync();
        assert!(!cache.synced());
        cache.complete_resync();
        assert!(cache.synced());
    }

    #[test]
    fn test_resync_replaces_stale_view() {
        let cache = ResourceCache::new();
        let (stale_ref, stale) = workload("stale");
        let (live_ref, live) = workload("live");

        cache.insert(stale_ref.clone(), stale);
        cache.begin_resync();
        cache.stage(live_ref.clone(), live);
        // Old view still served during the re-list.
        assert!(cache.get(&stale_ref).is_some());
        assert!(cache.get(&live_ref).is_none());

        cache.complete_resync();
        // Objects missing from the new listing are gone.
        assert!(cache.get(&stale_ref).is_none());
        assert!(cache.get(&live_ref).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_resync_drops_synced_until_done() {
        let cache = ResourceCache::new();
        cache.begin_resync();
        cache.complete_resync();
        assert!(cache.synced());

        cache.begin_resync();
        assert!(!cache.synced());
        cache.complete_resync();
        assert!(cache.synced());
    }

    #[tokio::test]
    async fn test_wait_synced_resolves_after_listing() {
        let cache = Arc::new(ResourceCache::new());
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_synced().await })
        };

        cache.begin_resync();
        cache.complete_resync();
        waiter.await.unwrap();
        assert!(cache.synced());
    }
}
