//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Fee oracle polling
//! - Deploy and mint submissions, confirmations and failures
//! - Confirmation latency

use crate::error::{DeployerError, DeployerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Fee oracle metrics
    pub static ref FEE_POLLS: CounterVec = register_counter_vec!(
        "token_deployer_fee_polls_total",
        "Fee oracle polls by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref SELECTED_MAX_FEE: Gauge = register_gauge!(
        "token_deployer_selected_max_fee_gwei",
        "Max fee per gas captured for the most recent action, in gwei"
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "token_deployer_transactions_submitted_total",
        "Total transactions broadcast",
        &["action"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "token_deployer_transactions_confirmed_total",
        "Total transactions confirmed",
        &["action"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "token_deployer_actions_failed_total",
        "Total failed actions by error category",
        &["action", "category"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "token_deployer_action_duration_seconds",
        "Time from action start to confirmed receipt",
        &["action"],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
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

    pub async fn run(&self) -> DeployerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| DeployerError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| DeployerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> DeployerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| DeployerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| DeployerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_fee_poll(ok: bool) {
    FEE_POLLS
        .with_label_values(&[if ok { "ok" } else { "failed" }])
        .inc();
}

pub fn record_selected_max_fee(gwei: f64) {
    SELECTED_MAX_FEE.set(gwei);
}

pub fn record_tx_submitted(action: &str) {
    TX_SUBMITTED.with_label_values(&[action]).inc();
}

pub fn record_tx_confirmed(action: &str, duration_secs: f64) {
    TX_CONFIRMED.with_label_values(&[action]).inc();
    CONFIRMATION_LATENCY
        .with_label_values(&[action])
        .observe(duration_secs);
}

pub fn record_action_failed(action: &str, category: &str) {
    TX_FAILED.with_label_values(&[action, category]).inc();
}
