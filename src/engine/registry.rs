//! In-flight request table for one aggregator contract
//!
//! The pending table and the seen-set sit behind one mutex so that insert-if-absent,
//! remove and the deadline scan are each a single critical section. Whoever removes a job
//! first (fulfillment path or deadline scan) owns its outcome; the loser sees `None`.

use crate::types::{BlockHeight, PendingJob, RequestId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct RegistryInner {
    pending: HashMap<RequestId, PendingJob>,
    /// Every id ever inserted; kept for the registry's lifetime
    seen: HashSet<RequestId>,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `job` unless its id was seen before. Returns false for duplicates, which
    /// leave the registry untouched.
    pub fn try_insert(&self, job: PendingJob) -> bool {
        let mut inner = self.lock();
        if !inner.seen.insert(job.request_id) {
            return false;
        }
        inner.pending.insert(job.request_id, job);
        true
    }

    pub fn remove(&self, request_id: &RequestId) -> Option<PendingJob> {
        self.lock().pending.remove(request_id)
    }

    /// Removes and returns every job with `current_height - request_height > miss_threshold`,
    /// oldest first
    pub fn scan_expired(&self, current_height: BlockHeight, miss_threshold: u64) -> Vec<PendingJob> {
        let mut inner = self.lock();

        let expired_ids: Vec<RequestId> = inner
            .pending
            .values()
            .filter(|job| current_height.saturating_sub(job.request_height) > miss_threshold)
            .map(|job| job.request_id)
            .collect();

        let mut expired: Vec<PendingJob> = expired_ids
            .iter()
            .filter_map(|id| inner.pending.remove(id))
            .collect();

        expired.sort_by_key(|job| (job.request_height, job.request_id));
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.lock().pending.contains_key(request_id)
    }
}
