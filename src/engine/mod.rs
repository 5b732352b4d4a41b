//! Request/fulfillment correlation and SLA tracking
//!
//! # Architecture
//!
//! ```text
//! request feed ──> Coordinator ──(lazy, per requester)──> AggregatorTracker ──> JobRegistry
//! header feed  ──> Coordinator ──(fan-out snapshot)─────> AggregatorTracker::on_new_block
//! fulfillment feed (one per tracker) ───────────────────> AggregatorTracker::on_fulfillment
//!                                                                │
//!                                                                └──> OutcomeSink
//! ```
//!
//! A request is finalised exactly once: the fulfillment path and the deadline scan both
//! go through `JobRegistry::remove`/`scan_expired`, and only one of them gets the job.
//! All state is in memory; a restart forgets in-flight requests.

pub mod coordinator;
pub mod registry;
pub mod tracker;
pub mod watermark;

pub use coordinator::{Coordinator, RequestDisposition, TrackerSettings};
pub use registry::JobRegistry;
pub use tracker::AggregatorTracker;
pub use watermark::{Watermark, Watermarks};
