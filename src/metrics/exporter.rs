use super::MetricsError;
use crate::engine::Watermarks;
use crate::outcome::{Fulfilled, Missed, OutcomeSink};
use crate::types::{wei_to_ether, Address, Payment, RequestId};
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "cl";
const SUBSYSTEM: &str = "mon";

/// Latency buckets, in blocks
const RESPONSE_TIME_BUCKETS: [f64; 7] = [1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 15.0];

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

/// Prometheus view of request outcomes, watermarks and balances
///
/// Owns its own registry so several exporters can coexist in one process.
pub struct MetricsExporter {
    registry: Registry,
    last_response: IntGauge,
    last_request: IntGauge,
    height: IntGauge,
    eth_balance: Gauge,
    link_balance: GaugeVec,
    response_time: HistogramVec,
    fulfilled: IntCounterVec,
    missed: IntCounterVec,
    revenue: CounterVec,
    orphan_fulfillments: IntCounterVec,
}

impl MetricsExporter {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let last_response = IntGauge::with_opts(opts("last_response", "Height of the last response"))?;
        let last_request = IntGauge::with_opts(opts("last_request", "Height of the last oracle request"))?;
        let height = IntGauge::with_opts(opts("height", "Last synced height"))?;
        let eth_balance = Gauge::with_opts(opts("eth_balance", "Balance of the oracle account"))?;
        let link_balance = GaugeVec::new(opts("link_balance", "Link balance of the oracle"), &["type"])?;
        let response_time = HistogramVec::new(
            HistogramOpts::new("response_time", "Response time in blocks")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM)
                .buckets(RESPONSE_TIME_BUCKETS.to_vec()),
            &["spec_id"],
        )?;
        let fulfilled = IntCounterVec::new(
            opts("fulfilled", "Number of successfully fulfilled requests"),
            &["spec_id", "requester"],
        )?;
        let missed = IntCounterVec::new(
            opts("missed", "Number of missed requests"),
            &["spec_id", "requester"],
        )?;
        let revenue = CounterVec::new(
            opts("revenue", "Number of LINK tokens earned"),
            &["spec_id", "requester", "status"],
        )?;
        let orphan_fulfillments = IntCounterVec::new(
            opts(
                "orphan_fulfillments",
                "Fulfillments seen for requests that were never tracked",
            ),
            &["aggregator"],
        )?;

        registry.register(Box::new(last_response.clone()))?;
        registry.register(Box::new(last_request.clone()))?;
        registry.register(Box::new(height.clone()))?;
        registry.register(Box::new(eth_balance.clone()))?;
        registry.register(Box::new(link_balance.clone()))?;
        registry.register(Box::new(response_time.clone()))?;
        registry.register(Box::new(fulfilled.clone()))?;
        registry.register(Box::new(missed.clone()))?;
        registry.register(Box::new(revenue.clone()))?;
        registry.register(Box::new(orphan_fulfillments.clone()))?;

        Ok(Self {
            registry,
            last_response,
            last_request,
            height,
            eth_balance,
            link_balance,
            response_time,
            fulfilled,
            missed,
            revenue,
            orphan_fulfillments,
        })
    }

    /// Copies the watermarks into their gauges
    pub fn sync_watermarks(&self, watermarks: &Watermarks) {
        self.height.set(gauge_value(watermarks.current_height.get()));
        self.last_request.set(gauge_value(watermarks.last_request.get()));
        self.last_response.set(gauge_value(watermarks.last_fulfillment.get()));
    }

    pub fn set_height(&self, height: u64) {
        self.height.set(gauge_value(height));
    }

    pub fn set_native_balance(&self, wei: Payment) {
        self.eth_balance.set(wei_to_ether(wei));
    }

    pub fn set_withdrawable_link(&self, amount: Payment) {
        self.link_balance
            .with_label_values(&["withdrawable"])
            .set(wei_to_ether(amount));
    }

    pub fn set_link_balance(&self, amount: Payment) {
        self.link_balance
            .with_label_values(&["balance"])
            .set(wei_to_ether(amount));
    }

    /// Text exposition format of every registered metric
    pub fn render(&self) -> Result<String, MetricsError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn gauge_value(height: u64) -> i64 {
    i64::try_from(height).unwrap_or(i64::MAX)
}

impl OutcomeSink for MetricsExporter {
    fn observe_fulfilled(&self, outcome: &Fulfilled) {
        let spec_id = outcome.spec_id.to_label();
        let requester = outcome.requester.to_string();

        self.response_time
            .with_label_values(&[spec_id.as_str()])
            .observe(outcome.latency_blocks as f64);
        self.fulfilled
            .with_label_values(&[spec_id.as_str(), requester.as_str()])
            .inc();
        self.revenue
            .with_label_values(&[spec_id.as_str(), requester.as_str(), "fulfilled"])
            .inc_by(wei_to_ether(outcome.payment));
    }

    fn observe_missed(&self, outcome: &Missed) {
        let spec_id = outcome.spec_id.to_label();
        let requester = outcome.requester.to_string();

        self.missed
            .with_label_values(&[spec_id.as_str(), requester.as_str()])
            .inc();
        self.revenue
            .with_label_values(&[spec_id.as_str(), requester.as_str(), "missed"])
            .inc_by(wei_to_ether(outcome.payment));
    }

    fn observe_orphan_fulfillment(&self, aggregator: Address, _request_id: RequestId) {
        self.orphan_fulfillments
            .with_label_values(&[aggregator.to_string().as_str()])
            .inc();
    }
}
