use crate::engine::TrackerSettings;
use crate::supervisor::RestartPolicy;
use crate::types::Address;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Mainnet LINK token, used when `LINK_ADDRESS` is not set
pub const MAINNET_LINK_ADDRESS: &str = "0x514910771af9ca656af840dff83e8264ecf986ca";

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Oracle contract whose requests are monitored
    pub oracle_address: Address,
    /// Account submitting fulfillments (native balance gauge)
    pub node_address: Address,
    pub link_address: Address,
    /// Decoded event log tailed by the binary
    pub event_log: PathBuf,
    pub listen_addr: String,
    pub miss_threshold: u64,
    pub restart_delay: Duration,
    pub subscribe_timeout: Duration,
    pub aggregator_subscribe_timeout: Duration,
    /// `None` disables the stale-feed restart
    pub liveness_timeout: Option<Duration>,
    pub metrics_sample_interval: Duration,
    pub event_poll_interval: Duration,
    /// Empty accepts every requester as an aggregator
    pub aggregator_allowlist: Vec<Address>,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
        };

        let oracle_address = parse_address("ADDRESS", &required("ADDRESS")?)?;
        let node_address = parse_address("NODE_ADDRESS", &required("NODE_ADDRESS")?)?;
        let event_log = PathBuf::from(required("EVENT_LOG")?);
        let listen_addr = required("LADDR")?;

        let link_address = match lookup("LINK_ADDRESS").filter(|v| !v.trim().is_empty()) {
            Some(value) => parse_address("LINK_ADDRESS", &value)?,
            None => {
                log::warn!("LINK_ADDRESS isn't set. Falling back to mainnet default.");
                parse_address("LINK_ADDRESS", MAINNET_LINK_ADDRESS)?
            }
        };

        let miss_threshold = parse_number(&lookup, "MISS_THRESHOLD", 15)?;
        let restart_delay = Duration::from_secs(parse_number(&lookup, "RESTART_DELAY_SECS", 5)?);
        let subscribe_timeout = Duration::from_secs(parse_number(&lookup, "SUBSCRIBE_TIMEOUT_SECS", 10)?);
        let aggregator_subscribe_timeout =
            Duration::from_secs(parse_number(&lookup, "AGGREGATOR_SUBSCRIBE_TIMEOUT_SECS", 3)?);
        let liveness_timeout = match parse_number(&lookup, "FEED_LIVENESS_TIMEOUT_SECS", 120)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let metrics_sample_interval =
            Duration::from_millis(parse_number(&lookup, "METRICS_SAMPLE_INTERVAL_MS", 1000)?.max(1));
        let event_poll_interval =
            Duration::from_millis(parse_number(&lookup, "EVENT_POLL_INTERVAL_MS", 100)?.max(1));

        let aggregator_allowlist = lookup("AGGREGATOR_ALLOWLIST")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim())
                    .filter(|a| !a.is_empty())
                    .map(|a| parse_address("AGGREGATOR_ALLOWLIST", a))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            oracle_address,
            node_address,
            link_address,
            event_log,
            listen_addr,
            miss_threshold,
            restart_delay,
            subscribe_timeout,
            aggregator_subscribe_timeout,
            liveness_timeout,
            metrics_sample_interval,
            event_poll_interval,
            aggregator_allowlist,
        })
    }

    /// Supervision of the head and request feeds
    pub fn feed_policy(&self) -> RestartPolicy {
        RestartPolicy {
            restart_delay: self.restart_delay,
            setup_timeout: self.subscribe_timeout,
            liveness_timeout: self.liveness_timeout,
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            miss_threshold: self.miss_threshold,
            fulfillment_policy: RestartPolicy {
                restart_delay: self.restart_delay,
                setup_timeout: self.aggregator_subscribe_timeout,
                liveness_timeout: self.liveness_timeout,
            },
        }
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{} ({}): {}", key, value, e)))
}

fn parse_number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} must be a non-negative integer, got '{}'", key, value))),
        _ => Ok(default),
    }
}
