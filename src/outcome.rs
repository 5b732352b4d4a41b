//! Finalised request outcomes and the observer interface receiving them

use crate::types::{Address, BlockHeight, Payment, PendingJob, RequestId, SpecId};

/// A request fulfilled before its deadline scan removed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfilled {
    pub request_id: RequestId,
    pub spec_id: SpecId,
    pub requester: Address,
    pub payment: Payment,
    pub latency_blocks: BlockHeight,
}

impl Fulfilled {
    pub fn new(job: PendingJob, fulfillment_height: BlockHeight) -> Self {
        Self {
            latency_blocks: fulfillment_height.saturating_sub(job.request_height),
            request_id: job.request_id,
            spec_id: job.spec_id,
            requester: job.requester,
            payment: job.payment,
        }
    }
}

/// A request whose deadline passed without a fulfillment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Missed {
    pub request_id: RequestId,
    pub spec_id: SpecId,
    pub requester: Address,
    pub payment: Payment,
}

impl From<PendingJob> for Missed {
    fn from(job: PendingJob) -> Self {
        Self {
            request_id: job.request_id,
            spec_id: job.spec_id,
            requester: job.requester,
            payment: job.payment,
        }
    }
}

/// Receives exactly one outcome per inserted request
///
/// Called inline from the feed tasks, so implementations must return quickly.
pub trait OutcomeSink: Send + Sync {
    fn observe_fulfilled(&self, outcome: &Fulfilled);

    fn observe_missed(&self, outcome: &Missed);

    /// A fulfillment arrived for a request this process never tracked (seen before startup
    /// or lost in a subscription gap). Not an outcome; only makes the gap visible.
    fn observe_orphan_fulfillment(&self, _aggregator: Address, _request_id: RequestId) {}
}
