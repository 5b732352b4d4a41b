//! Oracle monitor - SLA exporter for an oracle contract
//!
//! Tails a decoded chain event log, tracks every request sent to the oracle until it is
//! fulfilled or misses its deadline, and serves the results as Prometheus metrics.
//! Balance gauges follow the `native_balance`, `withdrawable_balance` and `token_balance`
//! records in the same log; they stay empty if the decoder never writes any.
//!
//! Usage:
//!   cargo run --release --bin oracle_monitor
//!
//! Environment variables:
//!   ADDRESS - Oracle contract address (required)
//!   NODE_ADDRESS - Fulfillment account (required)
//!   EVENT_LOG - JSONL event log to tail (required)
//!   LADDR - Metrics listen address, e.g. 0.0.0.0:9100 (required)
//!   LINK_ADDRESS - LINK token contract (default: mainnet LINK)
//!   AGGREGATOR_ALLOWLIST - Comma-separated aggregators (default: accept all)
//!   MISS_THRESHOLD - Deadline in blocks (default: 15)

use dotenv::dotenv;
use log::{error, info};
use oracle_sla_monitor::metrics::serve;
use oracle_sla_monitor::source::{AllowlistProbe, BalanceBook, JsonlEventSource};
use oracle_sla_monitor::supervisor::RestartPolicy;
use oracle_sla_monitor::{ChainSources, MetricsExporter, Monitor, MonitorConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Oracle monitor starting");

    let config = MonitorConfig::from_env()?;

    info!("   ├─ Oracle: {}", config.oracle_address);
    info!("   ├─ Node account: {}", config.node_address);
    info!("   ├─ LINK token: {}", config.link_address);
    info!("   ├─ Event log: {}", config.event_log.display());
    info!("   ├─ Miss threshold: {} blocks", config.miss_threshold);
    if config.aggregator_allowlist.is_empty() {
        info!("   └─ Aggregators: any requester");
    } else {
        info!("   └─ Aggregators: {} allowlisted", config.aggregator_allowlist.len());
    }

    let source = Arc::new(JsonlEventSource::new(
        config.event_log.clone(),
        config.event_poll_interval,
    ));
    let probe = Arc::new(AllowlistProbe::new(
        config.oracle_address,
        config.aggregator_allowlist.clone(),
    ));
    let balances = Arc::new(BalanceBook::new());
    let balance_policy = RestartPolicy {
        liveness_timeout: None,
        ..config.feed_policy()
    };
    let balance_task = tokio::spawn(source.clone().follow_balances(balances.clone(), balance_policy));

    let sources = ChainSources {
        headers: source.clone(),
        requests: source.clone(),
        fulfillments: source,
        probe,
        balances: Some(balances),
    };

    let exporter = Arc::new(MetricsExporter::new()?);
    let listen_addr = config.listen_addr.clone();

    let mut monitor = match Monitor::new(config, sources, exporter.clone()).await {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("❌ {}", e);
            return Err(e.into());
        }
    };
    monitor.start();

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        result = serve(&listen_addr, exporter) => {
            if let Err(e) = result {
                error!("❌ Metrics server failed: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
            }
        }
    }

    balance_task.abort();
    monitor.shutdown();
    info!("✅ Oracle monitor stopped");
    Ok(())
}
