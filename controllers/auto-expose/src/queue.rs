//! Deduplicating, rate-limited change queue.
//!
//! The queue holds presence, not history: one slot per workload ref, with
//! the most recent event kind winning when notifications coalesce. A ref
//! handed to a worker stays exclusive until that worker reports back with
//! [`ChangeQueue::forget`] or [`ChangeQueue::add_rate_limited`], so at most
//! one reconcile attempt per ref is ever in flight regardless of how many
//! workers drain the queue.
//!
//! Failed items are re-queued after an exponential per-ref delay and dropped
//! with an operator-visible error once the retry budget is exhausted; a
//! fresh notification for the same ref can always re-enqueue it later.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::backoff::ExponentialBackoff;
use crate::event::{ChangeEvent, WorkloadRef};

// Same retry budget the upstream controller work queues default to.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);
const DEFAULT_MAX_RETRIES: u32 = 15;

#[derive(Debug)]
struct QueueState {
    /// Refs ready to hand to a worker, FIFO.
    ready: VecDeque<WorkloadRef>,
    /// Latest event per ref that is queued or due for re-queue.
    pending: HashMap<WorkloadRef, ChangeEvent>,
    /// Refs currently held by a worker.
    processing: HashSet<WorkloadRef>,
    /// Consecutive failures per ref.
    retries: HashMap<WorkloadRef, u32>,
    shutting_down: bool,
}

enum Dequeue {
    Item(ChangeEvent),
    Empty,
    ShuttingDown,
}

/// Work queue feeding the reconcile workers.
///
/// Safe for concurrent `add`/`get`/`forget` from any number of tasks; hand
/// it around as an `Arc<ChangeQueue>`.
#[derive(Debug)]
pub struct ChangeQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ExponentialBackoff,
    max_retries: u32,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES)
    }

    /// Queue with an explicit retry policy; tests shrink the budget.
    pub fn with_policy(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                pending: HashMap::new(),
                processing: HashSet::new(),
                retries: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff: ExponentialBackoff::new(base_delay, max_delay),
            max_retries,
        }
    }

    /// Enqueues a change event, deduplicating by workload ref.
    ///
    /// A ref that is already queued coalesces to this (most recent) event.
    /// A ref currently being processed is marked and re-queued as soon as
    /// the in-flight attempt completes. Events arriving after shutdown are
    /// dropped.
    pub fn add(&self, event: ChangeEvent) {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            debug!("queue shutting down, dropping event for {}", event.workload());
            return;
        }
        let workload = event.workload().clone();
        let was_pending = state.pending.insert(workload.clone(), event).is_some();
        if was_pending || state.processing.contains(&workload) {
            return;
        }
        state.ready.push_back(workload);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Dequeues the next event, suspending the caller until one is
    /// available. Returns `None` once [`ChangeQueue::shutdown`] has been
    /// called; items still queued at that point are not handed out.
    pub async fn get(&self) -> Option<ChangeEvent> {
        loop {
            // Register for wakeup before checking state so an add or
            // shutdown landing in between is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.try_get() {
                Dequeue::Item(event) => return Some(event),
                Dequeue::ShuttingDown => return None,
                Dequeue::Empty => notified.await,
            }
        }
    }

    fn try_get(&self) -> Dequeue {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Dequeue::ShuttingDown;
        }
        while let Some(workload) = state.ready.pop_front() {
            if let Some(event) = state.pending.remove(&workload) {
                state.processing.insert(workload);
                return Dequeue::Item(event);
            }
        }
        Dequeue::Empty
    }

    /// Completes a successful attempt: clears the ref's retry state and
    /// releases its processing slot. Call exactly once per dequeued item,
    /// or use [`ChangeQueue::add_rate_limited`] instead on failure.
    pub fn forget(&self, workload: &WorkloadRef) {
        let mut state = self.state.lock().unwrap();
        state.retries.remove(workload);
        let requeued = Self::complete(&mut state, workload);
        drop(state);
        if requeued {
            self.notify.notify_waiters();
        }
    }

    /// Completes a failed attempt: releases the processing slot and re-adds
    /// the event after an exponential delay. Once the retry budget for the
    /// ref is exhausted the item is dropped and an error is surfaced; a
    /// later fresh notification starts over.
    pub fn add_rate_limited(self: &Arc<Self>, event: ChangeEvent) {
        let workload = event.workload().clone();
        let mut state = self.state.lock().unwrap();
        let attempts = {
            let count = state.retries.entry(workload.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts > self.max_retries {
            error!(
                "giving up on {} after {} failed attempts",
                workload, self.max_retries
            );
            state.retries.remove(&workload);
            let requeued = Self::complete(&mut state, &workload);
            drop(state);
            if requeued {
                self.notify.notify_waiters();
            }
            return;
        }
        let delay = self.backoff.delay_for(attempts);
        let requeued = Self::complete(&mut state, &workload);
        drop(state);
        if requeued {
            self.notify.notify_waiters();
        }

        debug!("requeuing {} in {:?} (attempt {})", workload, delay, attempts);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(event);
        });
    }

    /// Wakes every blocked [`ChangeQueue::get`] caller; they return `None`.
    /// In-flight attempts may still report back, but nothing new is handed
    /// out or accepted.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }

    // Releases a processing slot; returns whether the ref went straight
    // back to the ready list because a notification arrived mid-flight.
    fn complete(state: &mut QueueState, workload: &WorkloadRef) -> bool {
        state.processing.remove(workload);
        if state.pending.contains_key(workload) && !state.shutting_down {
            state.ready.push_back(workload.clone());
            return true;
        }
        false
    }

    #[cfg(test)]
    fn retry_count(&self, workload: &WorkloadRef) -> u32 {
        self.state
            .lock()
            .unwrap()
            .retries
            .get(workload)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}
