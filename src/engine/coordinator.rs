//! Aggregator discovery and block fan-out
//!
//! The coordinator learns about aggregator contracts from the requests it sees. Each new
//! requester is probed once; confirmed aggregators get an `AggregatorTracker` with its own
//! supervised fulfillment feed, rejected ones are remembered and ignored from then on.
//!
//! ```text
//! RequestEvent ──> on_request ──> probe (first time only) ──> tracker.on_request
//! Header ────────> on_new_block ──> snapshot of trackers ──> tracker.on_new_block
//! ```

use super::tracker::AggregatorTracker;
use super::watermark::Watermarks;
use crate::outcome::OutcomeSink;
use crate::source::{ContractProbe, FulfillmentFeed};
use crate::supervisor::RestartPolicy;
use crate::types::{Address, BlockHeight, PendingJob, RequestEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Blocks a request may stay unfulfilled; missed once the gap is strictly greater
    pub miss_threshold: u64,
    /// Supervision of each tracker's fulfillment subscription
    pub fulfillment_policy: RestartPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            miss_threshold: 15,
            fulfillment_policy: RestartPolicy {
                setup_timeout: std::time::Duration::from_secs(3),
                ..RestartPolicy::default()
            },
        }
    }
}

/// Result of probing a previously unknown requester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    ConfirmedAggregator,
    Rejected,
}

/// What happened to one request event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDisposition {
    Tracked,
    Duplicate,
    /// Requester is not an aggregator
    Rejected,
    /// Probe could not answer; the requester stays unclassified and is probed again later
    ProbeFailed,
}

pub struct Coordinator {
    settings: TrackerSettings,
    probe: Arc<dyn ContractProbe>,
    fulfillments: Arc<dyn FulfillmentFeed>,
    sink: Arc<dyn OutcomeSink>,
    watermarks: Arc<Watermarks>,
    trackers: RwLock<HashMap<Address, Arc<AggregatorTracker>>>,
    /// Held across the probe so a requester is classified (and its tracker built) once
    classifications: tokio::sync::Mutex<HashMap<Address, Classification>>,
    feed_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        settings: TrackerSettings,
        probe: Arc<dyn ContractProbe>,
        fulfillments: Arc<dyn FulfillmentFeed>,
        sink: Arc<dyn OutcomeSink>,
        watermarks: Arc<Watermarks>,
    ) -> Self {
        Self {
            settings,
            probe,
            fulfillments,
            sink,
            watermarks,
            trackers: RwLock::new(HashMap::new()),
            classifications: tokio::sync::Mutex::new(HashMap::new()),
            feed_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn watermarks(&self) -> &Arc<Watermarks> {
        &self.watermarks
    }

    pub fn tracker(&self, address: &Address) -> Option<Arc<AggregatorTracker>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Copy of the tracker list; the table lock is released before the copy is used
    pub fn trackers_snapshot(&self) -> Vec<Arc<AggregatorTracker>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub async fn on_request(&self, event: RequestEvent) -> RequestDisposition {
        log::info!(
            "📥 Received request: request_id={} requester={} spec_id={} height={}",
            event.request_id,
            event.requester,
            event.spec_id.to_label(),
            event.block_number
        );

        self.watermarks.last_request.observe(event.block_number);

        let job = PendingJob::from(&event);
        if let Some(tracker) = self.tracker(&event.requester) {
            return Self::forward(&tracker, job);
        }

        let mut classifications = self.classifications.lock().await;

        // another request from the same requester may have won the race
        if let Some(tracker) = self.tracker(&event.requester) {
            return Self::forward(&tracker, job);
        }
        if classifications.get(&event.requester) == Some(&Classification::Rejected) {
            log::debug!("Requester {} previously rejected; dropping request", event.requester);
            return RequestDisposition::Rejected;
        }

        log::debug!(
            "Requester {} unknown; probing for aggregator",
            event.requester
        );

        match self.probe.is_aggregator(event.requester).await {
            Ok(true) => {
                classifications.insert(event.requester, Classification::ConfirmedAggregator);
                let tracker = self.register_tracker(event.requester);
                drop(classifications);
                Self::forward(&tracker, job)
            }
            Ok(false) => {
                classifications.insert(event.requester, Classification::Rejected);
                log::warn!("⚠️  Requester {} is not an aggregator", event.requester);
                RequestDisposition::Rejected
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Failed to probe requester {}: {}",
                    event.requester,
                    e
                );
                RequestDisposition::ProbeFailed
            }
        }
    }

    fn forward(tracker: &AggregatorTracker, job: PendingJob) -> RequestDisposition {
        if tracker.on_request(job) {
            RequestDisposition::Tracked
        } else {
            RequestDisposition::Duplicate
        }
    }

    fn register_tracker(&self, address: Address) -> Arc<AggregatorTracker> {
        let tracker = Arc::new(AggregatorTracker::new(
            address,
            self.settings.miss_threshold,
            self.sink.clone(),
            self.watermarks.clone(),
        ));

        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, tracker.clone());

        let handle = tokio::spawn(
            tracker
                .clone()
                .run_fulfillment_feed(self.fulfillments.clone(), self.settings.fulfillment_policy.clone()),
        );
        self.feed_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        log::info!("🆕 Tracking aggregator {}", address);
        tracker
    }

    /// Records the new height and runs the deadline scan on every tracker; returns the
    /// number of jobs reported missed
    pub fn on_new_block(&self, height: BlockHeight) -> usize {
        self.watermarks.current_height.observe(height);

        self.trackers_snapshot()
            .iter()
            .map(|tracker| tracker.on_new_block(height))
            .sum()
    }

    /// Stops every tracker's fulfillment feed
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self
            .feed_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            log::info!("🛑 Stopped {} aggregator feeds", tasks.len());
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
