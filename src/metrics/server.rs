//! HTTP endpoint serving the exporter's registry
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/metrics` | Prometheus text exposition |

use super::MetricsExporter;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn metrics_router(exporter: Arc<MetricsExporter>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(exporter)
}

async fn render_metrics(State(exporter): State<Arc<MetricsExporter>>) -> Response {
    match exporter.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            log::error!("❌ Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Binds `listen_addr` and serves until the listener fails
pub async fn serve(listen_addr: &str, exporter: Arc<MetricsExporter>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    log::info!("📊 Serving metrics on http://{}/metrics", listener.local_addr()?);
    axum::serve(listener, metrics_router(exporter)).await
}
