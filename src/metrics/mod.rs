//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Outbound RPC requests per network
//! - Gas price freshness and refresh failures
//! - Poll outcomes and cancellations

use crate::error::{GatewayError, GatewayResult};
use crate::tx::TxStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref RPC_REQUESTS: CounterVec = register_counter_vec!(
        "energi_gateway_rpc_requests_total",
        "Total RPC requests sent to the node",
        &["network"]
    ).unwrap();

    // Gas price metrics
    pub static ref GAS_PRICE: GaugeVec = register_gauge_vec!(
        "energi_gateway_gas_price_gwei",
        "Current gas price estimate in gwei",
        &["network"]
    ).unwrap();

    pub static ref GAS_PRICE_UPDATED: GaugeVec = register_gauge_vec!(
        "energi_gateway_gas_price_last_updated_seconds",
        "Unix time of the last successful gas price refresh",
        &["network"]
    ).unwrap();

    pub static ref GAS_REFRESH_FAILURES: CounterVec = register_counter_vec!(
        "energi_gateway_gas_refresh_failures_total",
        "Total failed gas price refreshes",
        &["network"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_POLLED: CounterVec = register_counter_vec!(
        "energi_gateway_transactions_polled_total",
        "Total transaction polls by outcome",
        &["network", "status"]
    ).unwrap();

    pub static ref TX_CANCELLED: CounterVec = register_counter_vec!(
        "energi_gateway_transactions_cancelled_total",
        "Total cancellation transactions submitted",
        &["network"]
    ).unwrap();

    pub static ref CONNECTORS: GaugeVec = register_gauge_vec!(
        "energi_gateway_connectors",
        "Live network connectors (1=open, 0=closed)",
        &["network"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> GatewayResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Server {
                addr: addr.to_string(),
                source,
            })?;
        axum::serve(listener, app)
            .await
            .map_err(|source| GatewayError::Server {
                addr: addr.to_string(),
                source,
            })?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_rpc_request(network: &str) {
    RPC_REQUESTS.with_label_values(&[network]).inc();
}

pub fn record_gas_price(network: &str, gwei: f64, updated_at: i64) {
    GAS_PRICE.with_label_values(&[network]).set(gwei);
    GAS_PRICE_UPDATED
        .with_label_values(&[network])
        .set(updated_at as f64);
}

pub fn record_gas_refresh_failure(network: &str) {
    GAS_REFRESH_FAILURES.with_label_values(&[network]).inc();
}

pub fn record_poll(network: &str, status: &TxStatus) {
    TX_POLLED
        .with_label_values(&[network, status.label()])
        .inc();
}

pub fn record_cancel(network: &str) {
    TX_CANCELLED.with_label_values(&[network]).inc();
}

pub fn record_connector_open(network: &str) {
    CONNECTORS.with_label_values(&[network]).set(1.0);
}

pub fn record_connector_closed(network: &str) {
    CONNECTORS.with_label_values(&[network]).set(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_conflict_is_server_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = MetricsServer::new(port).run().await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { .. }));
    }

    #[test]
    fn test_poll_outcomes_are_labelled() {
        record_poll("testnet", &TxStatus::Pending);
        let polled = TX_POLLED.with_label_values(&["testnet", "pending"]).get();
        assert!(polled >= 1.0);
    }
}
