//! Metrics exposition
//!
//! `MetricsExporter` is the production `OutcomeSink`: it turns outcomes into Prometheus
//! counters and histograms, and `server` publishes them on `GET /metrics`.

pub mod exporter;
pub mod server;

pub use exporter::MetricsExporter;
pub use server::{metrics_router, serve};

#[derive(Debug)]
pub enum MetricsError {
    Prometheus(prometheus::Error),
    Encoding(std::string::FromUtf8Error),
}

impl From<prometheus::Error> for MetricsError {
    fn from(err: prometheus::Error) -> Self {
        MetricsError::Prometheus(err)
    }
}

impl From<std::string::FromUtf8Error> for MetricsError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        MetricsError::Encoding(err)
    }
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::Prometheus(e) => write!(f, "Prometheus error: {}", e),
            MetricsError::Encoding(e) => write!(f, "Encoding error: {}", e),
        }
    }
}

impl std::error::Error for MetricsError {}
