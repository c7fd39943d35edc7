//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Quotes**: raw quotes received, normalized, and filtered by reason
//! - **Detection**: spreads computed and profitable, triangular opportunities,
//!   triangular batch duration
//! - **Simulation**: simulated trades by outcome, paper balance
//! - **Resilience**: breaker transitions, ingestion errors, reconnects
//! - **Delivery**: events dropped by lagging subscribers
//!
//! Recording is fire-and-forget: without an installed recorder every call is
//! a no-op, so tests never need to initialize anything.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::resilience::BreakerPhase;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Failure installing the recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),
    /// Another recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder, serving `/metrics` on `listen` if given.
///
/// Calling it again returns the handle installed first.
///
/// # Errors
///
/// Returns `MetricsError` if the exporter cannot be built or a different
/// recorder is already installed.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new();
    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = builder.with_http_listener(addr).build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| MetricsError::Install(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Prometheus exporter stopped");
                }
            });
            tracing::info!(%addr, "Prometheus exporter listening");
            handle
        }
        None => builder.install_recorder()?,
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "arb_quotes_received_total",
        "Raw quotes handed to the normalizer"
    );
    describe_counter!(
        "arb_quotes_normalized_total",
        "Quotes that passed normalization"
    );
    describe_counter!(
        "arb_quotes_filtered_total",
        "Quotes dropped by the normalizer, by reason"
    );

    describe_counter!("arb_spreads_computed_total", "Spread events computed");
    describe_counter!(
        "arb_spreads_profitable_total",
        "Spread events flagged profitable"
    );
    describe_counter!(
        "arb_triangular_opportunities_total",
        "Profitable triangular opportunities broadcast"
    );
    describe_histogram!(
        "arb_triangular_batch_seconds",
        "Wall time to evaluate one batch of triangular paths"
    );

    describe_counter!("arb_simulated_trades_total", "Simulated trades by outcome");
    describe_gauge!("arb_simulated_balance", "Current paper balance in USD");

    describe_counter!(
        "arb_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "arb_ingestion_errors_total",
        "Terminal ingestion stream errors by kind"
    );
    describe_counter!("arb_reconnects_total", "Connector restart attempts");

    describe_counter!(
        "arb_events_dropped_total",
        "Events dropped because a subscriber lagged"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for simulated trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    /// Positive profit.
    Win,
    /// Zero or negative profit.
    Loss,
}

impl TradeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
        }
    }
}

/// Record a raw quote entering normalization.
pub fn record_quote_received(exchange: &str) {
    counter!("arb_quotes_received_total", "exchange" => exchange.to_string()).increment(1);
}

/// Record a quote accepted by the normalizer.
pub fn record_quote_normalized(exchange: &str) {
    counter!("arb_quotes_normalized_total", "exchange" => exchange.to_string()).increment(1);
}

/// Record a quote dropped by the normalizer.
pub fn record_quote_filtered(reason: &'static str) {
    counter!("arb_quotes_filtered_total", "reason" => reason).increment(1);
}

/// Record a computed spread.
pub fn record_spread(symbol: &str, profitable: bool) {
    counter!("arb_spreads_computed_total", "symbol" => symbol.to_string()).increment(1);
    if profitable {
        counter!("arb_spreads_profitable_total", "symbol" => symbol.to_string()).increment(1);
    }
}

/// Record a broadcast triangular opportunity.
pub fn record_triangular_opportunity(exchange: &str) {
    counter!("arb_triangular_opportunities_total", "exchange" => exchange.to_string())
        .increment(1);
}

/// Record the duration of one triangular evaluation batch.
pub fn record_triangular_batch(trigger: &'static str, duration: Duration) {
    histogram!("arb_triangular_batch_seconds", "trigger" => trigger).record(duration.as_secs_f64());
}

/// Record a simulated trade and the resulting balance.
pub fn record_simulated_trade(outcome: TradeOutcome, balance: f64) {
    counter!("arb_simulated_trades_total", "outcome" => outcome.as_str()).increment(1);
    gauge!("arb_simulated_balance").set(balance);
}

/// Record a circuit breaker transition.
pub fn record_breaker_transition(name: &str, to: BreakerPhase) {
    counter!(
        "arb_breaker_transitions_total",
        "exchange" => name.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Record a terminal ingestion error.
pub fn record_ingestion_error(exchange: &str, kind: &'static str) {
    counter!(
        "arb_ingestion_errors_total",
        "exchange" => exchange.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a connector restart attempt.
pub fn record_reconnect(exchange: &str) {
    counter!("arb_reconnects_total", "exchange" => exchange.to_string()).increment(1);
}

/// Record events lost by a lagging subscriber.
pub fn record_dropped_events(topic: &'static str, count: u64) {
    counter!("arb_events_dropped_total", "topic" => topic).increment(count);
}

// =============================================================================
// Tests
// =============================================================================
