//! Per-aggregator request tracking
//!
//! One tracker exists for each confirmed aggregator contract. It owns the contract's
//! `JobRegistry` and turns fulfillment events and new block heights into outcomes.

use super::registry::JobRegistry;
use super::watermark::Watermarks;
use crate::outcome::{Fulfilled, Missed, OutcomeSink};
use crate::source::FulfillmentFeed;
use crate::supervisor::{supervise, RestartPolicy};
use crate::types::{Address, BlockHeight, FulfillmentEvent, PendingJob};
use std::sync::Arc;

pub struct AggregatorTracker {
    address: Address,
    registry: JobRegistry,
    miss_threshold: u64,
    sink: Arc<dyn OutcomeSink>,
    watermarks: Arc<Watermarks>,
}

impl AggregatorTracker {
    pub fn new(
        address: Address,
        miss_threshold: u64,
        sink: Arc<dyn OutcomeSink>,
        watermarks: Arc<Watermarks>,
    ) -> Self {
        Self {
            address,
            registry: JobRegistry::new(),
            miss_threshold,
            sink,
            watermarks,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Starts tracking a request; false if the id was already seen
    pub fn on_request(&self, job: PendingJob) -> bool {
        let request_id = job.request_id;
        let request_height = job.request_height;
        let spec_label = job.spec_id.to_label();

        let inserted = self.registry.try_insert(job);
        if !inserted {
            log::info!(
                "🔁 Request dropped; already seen same id: request_id={} requester={} spec_id={} height={}",
                request_id,
                self.address,
                spec_label,
                request_height
            );
        }
        inserted
    }

    /// Finalises the matching job as fulfilled and returns its latency in blocks. Unknown
    /// ids are ignored.
    pub fn on_fulfillment(&self, event: &FulfillmentEvent) -> Option<BlockHeight> {
        let Some(job) = self.registry.remove(&event.request_id) else {
            log::debug!(
                "Fulfillment for untracked request ignored: request_id={} aggregator={} height={}",
                event.request_id,
                self.address,
                event.block_number
            );
            self.sink.observe_orphan_fulfillment(self.address, event.request_id);
            return None;
        };

        log::info!(
            "✅ Job fulfilled: request_id={} requester={} spec_id={} request_height={} height={}",
            job.request_id,
            job.requester,
            job.spec_id.to_label(),
            job.request_height,
            event.block_number
        );

        self.watermarks.last_fulfillment.observe(event.block_number);

        let outcome = Fulfilled::new(job, event.block_number);
        self.sink.observe_fulfilled(&outcome);
        Some(outcome.latency_blocks)
    }

    /// Reports every job past its deadline as missed; returns how many
    pub fn on_new_block(&self, height: BlockHeight) -> usize {
        let expired = self.registry.scan_expired(height, self.miss_threshold);

        for job in &expired {
            log::info!(
                "❌ Job fulfillment slot missed: request_id={} requester={} spec_id={} request_height={} height={}",
                job.request_id,
                job.requester,
                job.spec_id.to_label(),
                job.request_height,
                height
            );
        }

        let missed = expired.len();
        for job in expired {
            self.sink.observe_missed(&Missed::from(job));
        }
        missed
    }

    /// Consumes this contract's fulfillment feed forever, resubscribing on failure
    pub async fn run_fulfillment_feed(self: Arc<Self>, feed: Arc<dyn FulfillmentFeed>, policy: RestartPolicy) {
        let address = self.address;
        let name = format!("aggregator {}", address);

        supervise(
            name,
            policy,
            move || {
                let feed = feed.clone();
                async move { feed.subscribe_fulfillments(address).await }
            },
            move |event: FulfillmentEvent| {
                let tracker = self.clone();
                async move {
                    tracker.on_fulfillment(&event);
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{job, RecordingSink, REQUESTER};
    use std::sync::Barrier;

    fn tracker(sink: Arc<RecordingSink>) -> AggregatorTracker {
        AggregatorTracker::new(REQUESTER, 15, sink, Arc::new(Watermarks::default()))
    }

    fn fulfillment(id: u8, height: u64) -> FulfillmentEvent {
        FulfillmentEvent {
            request_id: job(id, 0).request_id,
            block_number: height,
        }
    }

    #[test]
    fn test_fulfillment_emits_latency() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(sink.clone());

        assert!(tracker.on_request(job(0xaa, 10)));
        assert_eq!(tracker.on_fulfillment(&fulfillment(0xaa, 12)), Some(2));

        let fulfilled = sink.fulfilled();
        assert_eq!(fulfilled.len(), 1);
        assert_eq!(fulfilled[0].latency_blocks, 2);
        assert_eq!(fulfilled[0].requester, REQUESTER);
        assert_eq!(tracker.watermarks.last_fulfillment.get(), 12);

        // later block produces nothing further
        assert_eq!(tracker.on_new_block(30), 0);
        assert!(sink.missed().is_empty());
    }

    #[test]
    fn test_unknown_fulfillment_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(sink.clone());

        assert_eq!(tracker.on_fulfillment(&fulfillment(0x01, 12)), None);
        assert!(sink.fulfilled().is_empty());
        assert_eq!(sink.orphans(), vec![(REQUESTER, job(0x01, 0).request_id)]);
        assert_eq!(tracker.watermarks.last_fulfillment.get(), 0);
    }

    #[test]
    fn test_missed_after_deadline() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(sink.clone());
        tracker.on_request(job(0x10, 100));

        assert_eq!(tracker.on_new_block(115), 0);
        assert_eq!(tracker.on_new_block(116), 1);
        assert_eq!(sink.missed().len(), 1);

        // fulfillment after the miss is an orphan, not a second outcome
        assert_eq!(tracker.on_fulfillment(&fulfillment(0x10, 117)), None);
        assert!(sink.fulfilled().is_empty());
    }

    #[test]
    fn test_duplicate_request_not_reemitted() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(sink.clone());

        assert!(tracker.on_request(job(0x20, 100)));
        assert!(!tracker.on_request(job(0x20, 101)));
        tracker.on_new_block(200);

        assert_eq!(sink.missed().len(), 1);
    }

    #[test]
    fn test_racing_fulfillment_and_block_emit_one_outcome() {
        for round in 0..200u8 {
            let sink = Arc::new(RecordingSink::default());
            let tracker = Arc::new(tracker(sink.clone()));
            tracker.on_request(job(round, 100));
            let barrier = Arc::new(Barrier::new(2));

            let t1 = {
                let (tracker, barrier) = (tracker.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    tracker.on_fulfillment(&fulfillment(round, 116));
                })
            };
            let t2 = {
                let (tracker, barrier) = (tracker.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    tracker.on_new_block(116);
                })
            };
            t1.join().unwrap();
            t2.join().unwrap();

            assert_eq!(sink.fulfilled().len() + sink.missed().len(), 1, "round {}", round);
        }
    }
}
