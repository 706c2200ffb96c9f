use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics` on `bind_addr`.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics.bind_addr {bind_addr}: {e}"))?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;
    let _ = PROM_HANDLE.set(handle);
    describe_mirror_metrics();

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "serving metrics");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

fn describe_mirror_metrics() {
    describe_counter!("usage_fetch_total", "Usage snapshot fetch attempts");
    describe_counter!("usage_fetch_errors_total", "Usage fetches that gave up");
    describe_counter!("usage_fetch_retry_total", "Usage fetches retried after a transient error");
    describe_histogram!(
        "usage_fetch_latency_seconds",
        Unit::Seconds,
        "Latency of successful usage fetches"
    );
    describe_counter!("hierarchy_nodes_created_total", "Nodes created while building the tree");
    describe_counter!("sync_cycles_total", "Snapshots applied to the node tree");
    describe_counter!("sync_leaf_writes_total", "Leaf values written by the synchronizer");
    describe_histogram!(
        "sync_cycle_duration_seconds",
        Unit::Seconds,
        "Time to validate and apply one snapshot"
    );
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bind_addr_is_rejected_before_installing() {
        assert!(init("metrics:nine-thousand").is_err());
        assert!(PROM_HANDLE.get().is_none());
    }
}
