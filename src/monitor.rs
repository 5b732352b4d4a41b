//! Top-level assembly
//!
//! `Monitor` confirms the oracle contract, then runs three long-lived routines:
//! the head routine (deadline scans and balance refresh), the request routine (aggregator
//! discovery and job tracking) and the sampler copying watermarks into gauges. Fulfillment
//! feeds are owned by the coordinator's trackers.

use crate::config::MonitorConfig;
use crate::engine::{Coordinator, Watermarks};
use crate::metrics::MetricsExporter;
use crate::outcome::OutcomeSink;
use crate::source::{
    BalanceReader, ContractProbe, FulfillmentFeed, HeaderFeed, MemorySource, RequestFeed, SourceError,
};
use crate::supervisor::supervise;
use crate::types::{Address, Header, RequestEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

const BALANCE_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Chain-facing collaborators the monitor consumes
#[derive(Clone)]
pub struct ChainSources {
    pub headers: Arc<dyn HeaderFeed>,
    pub requests: Arc<dyn RequestFeed>,
    pub fulfillments: Arc<dyn FulfillmentFeed>,
    pub probe: Arc<dyn ContractProbe>,
    /// Balance gauges stay unset without a reader
    pub balances: Option<Arc<dyn BalanceReader>>,
}

impl ChainSources {
    /// All three feeds served by one in-memory source
    pub fn from_memory(source: Arc<MemorySource>, probe: Arc<dyn ContractProbe>) -> Self {
        Self {
            headers: source.clone(),
            requests: source.clone(),
            fulfillments: source,
            probe,
            balances: None,
        }
    }

    pub fn with_balances(mut self, balances: Arc<dyn BalanceReader>) -> Self {
        self.balances = Some(balances);
        self
    }
}

#[derive(Debug)]
pub enum MonitorError {
    OracleNotConfirmed(Address),
    Probe(SourceError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::OracleNotConfirmed(addr) => {
                write!(f, "{} is not an oracle contract", addr)
            }
            MonitorError::Probe(e) => write!(f, "failed to probe oracle contract: {}", e),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<SourceError> for MonitorError {
    fn from(err: SourceError) -> Self {
        MonitorError::Probe(err)
    }
}

pub struct Monitor {
    config: MonitorConfig,
    sources: ChainSources,
    exporter: Arc<MetricsExporter>,
    coordinator: Arc<Coordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Confirms the configured oracle contract and builds the engine; nothing runs until
    /// `start`
    pub async fn new(
        config: MonitorConfig,
        sources: ChainSources,
        exporter: Arc<MetricsExporter>,
    ) -> Result<Self, MonitorError> {
        let oracle = config.oracle_address;
        if !sources.probe.is_oracle(oracle).await? {
            return Err(MonitorError::OracleNotConfirmed(oracle));
        }
        log::info!("🔗 Oracle contract confirmed: {}", oracle);

        let sink: Arc<dyn OutcomeSink> = exporter.clone();
        let coordinator = Arc::new(Coordinator::new(
            config.tracker_settings(),
            sources.probe.clone(),
            sources.fulfillments.clone(),
            sink,
            Arc::new(Watermarks::default()),
        ));

        Ok(Self {
            config,
            sources,
            exporter,
            coordinator,
            tasks: Vec::new(),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn exporter(&self) -> &Arc<MetricsExporter> {
        &self.exporter
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawns the head, request and sampler routines. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            log::warn!("⚠️  Monitor already started");
            return;
        }

        self.tasks.push(tokio::spawn(self.head_routine()));
        self.tasks.push(tokio::spawn(self.request_routine()));
        self.tasks.push(tokio::spawn(self.sampler_routine()));

        log::info!(
            "🚀 Monitoring oracle {} (miss threshold {} blocks)",
            self.config.oracle_address,
            self.config.miss_threshold
        );
    }

    /// Stops every routine, including the per-aggregator fulfillment feeds
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coordinator.shutdown();
        log::info!("🛑 Monitor stopped");
    }

    fn head_routine(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let headers = self.sources.headers.clone();
        let coordinator = self.coordinator.clone();
        let exporter = self.exporter.clone();
        let balances = self.sources.balances.clone();
        let accounts = BalanceAccounts::from(&self.config);

        supervise(
            "head".to_string(),
            self.config.feed_policy(),
            move || {
                let headers = headers.clone();
                async move { headers.subscribe_headers().await }
            },
            move |header: Header| {
                let coordinator = coordinator.clone();
                let exporter = exporter.clone();
                let balances = balances.clone();
                async move {
                    log::debug!("⛓️  New head: {}", header.number);
                    coordinator.on_new_block(header.number);
                    exporter.set_height(coordinator.watermarks().current_height.get());

                    if let Some(reader) = balances {
                        tokio::spawn(refresh_balances(reader, exporter, accounts));
                    }
                }
            },
        )
    }

    fn request_routine(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let requests = self.sources.requests.clone();
        let coordinator = self.coordinator.clone();
        let oracle = self.config.oracle_address;

        supervise(
            "request".to_string(),
            self.config.feed_policy(),
            move || {
                let requests = requests.clone();
                async move { requests.subscribe_requests(oracle).await }
            },
            move |event: RequestEvent| {
                let coordinator = coordinator.clone();
                async move {
                    coordinator.on_request(event).await;
                }
            },
        )
    }

    fn sampler_routine(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let coordinator = self.coordinator.clone();
        let exporter = self.exporter.clone();
        let period = self.config.metrics_sample_interval;

        async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                exporter.sync_watermarks(coordinator.watermarks());
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BalanceAccounts {
    node: Address,
    oracle: Address,
    link: Address,
}

impl From<&MonitorConfig> for BalanceAccounts {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            node: config.node_address,
            oracle: config.oracle_address,
            link: config.link_address,
        }
    }
}

async fn refresh_balances(
    reader: Arc<dyn BalanceReader>,
    exporter: Arc<MetricsExporter>,
    accounts: BalanceAccounts,
) {
    let refresh = async {
        match reader.native_balance(accounts.node).await {
            Ok(wei) => exporter.set_native_balance(wei),
            Err(e) => log_balance_error("node balance", e),
        }
        match reader.withdrawable(accounts.oracle).await {
            Ok(amount) => exporter.set_withdrawable_link(amount),
            Err(e) => log_balance_error("withdrawable LINK", e),
        }
        match reader.token_balance(accounts.link, accounts.oracle).await {
            Ok(amount) => exporter.set_link_balance(amount),
            Err(e) => log_balance_error("oracle LINK balance", e),
        }
    };

    if timeout(BALANCE_REFRESH_TIMEOUT, refresh).await.is_err() {
        log::warn!(
            "⚠️  Balance refresh timed out after {}s",
            BALANCE_REFRESH_TIMEOUT.as_secs()
        );
    }
}

fn log_balance_error(what: &str, err: SourceError) {
    match err {
        SourceError::Unavailable(_) => log::debug!("No {} recorded yet", what),
        err => log::warn!("⚠️  Failed to read {}: {}", what, err),
    }
}
