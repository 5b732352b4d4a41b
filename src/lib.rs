//! # Oracle SLA monitor
//!
//! Watches an oracle contract's requests and the aggregator contracts that must fulfill
//! them within a bounded number of blocks, and turns that into service-level metrics:
//! fulfillment latency, miss rate and revenue.
//!
//! - `source` - feed traits plus in-memory and JSONL implementations
//! - `engine` - correlation of requests, fulfillments and block heights
//! - `outcome` - the observer interface receiving finalised requests
//! - `metrics` - Prometheus exporter and `/metrics` endpoint
//! - `monitor` - wiring of feeds, engine and exporter into running tasks

pub mod config;
pub mod engine;
pub mod metrics;
pub mod monitor;
pub mod outcome;
pub mod source;
pub mod supervisor;
pub mod types;

pub use config::MonitorConfig;
pub use engine::{Coordinator, TrackerSettings};
pub use metrics::MetricsExporter;
pub use monitor::{ChainSources, Monitor, MonitorError};
pub use outcome::{Fulfilled, Missed, OutcomeSink};
