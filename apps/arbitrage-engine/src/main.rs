//! Arbitrage Engine Binary
//!
//! Runs the pipeline against synthetic exchanges and logs what it finds.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin arbitrage-engine
//! ```
//!
//! # Environment Variables
//!
//! - `ARB_EXCHANGES`: Comma-separated exchange names (default: binance,coinbase,kraken)
//! - `ARB_SYMBOLS`: Comma-separated pairs (default: BTC-USD,ETH-USD,SOL-USD,ETH-BTC,SOL-BTC,SOL-ETH)
//! - `ARB_MIN_SPREAD_THRESHOLD`: Profitable spread fraction (default: 0.001)
//! - `ARB_INITIAL_BALANCE`: Paper balance in USD (default: 10000)
//! - `ARB_STATS_INTERVAL_SECS`: Statistics log period (default: 30)
//! - `ARB_METRICS_PORT`: Prometheus port, 0 disables the listener (default: 9090)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)
//!
//! See `PipelineConfig::from_env` for the complete list.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use arbitrage_engine::infrastructure::telemetry;
use arbitrage_engine::{
    ExchangeConnector, Pipeline, PipelineConfig, SupervisorExit, SyntheticConnector, init_metrics,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting arbitrage engine");

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let metrics_addr = config
        .service
        .metrics_port
        .map(|port| SocketAddr::from(([0, 0, 0, 0], port)));
    let _metrics_handle = init_metrics(metrics_addr).context("failed to initialize metrics")?;

    let mut pipeline = Pipeline::start(config.clone());

    let mut feeds = Vec::with_capacity(config.exchanges.len());
    for exchange in &config.exchanges {
        let connector = Arc::new(SyntheticConnector::new(
            exchange.clone(),
            config.synthetic.clone(),
        ));
        feeds.push((Arc::clone(&connector), connector.start()));
        pipeline.attach(connector as Arc<dyn ExchangeConnector>, &config.symbols);
    }

    let mut spreads = pipeline.subscribe_spreads();
    let mut opportunities = pipeline.subscribe_opportunities();
    let mut stats_tick = tokio::time::interval(config.service.stats_interval);
    stats_tick.tick().await;

    tracing::info!("Arbitrage engine ready");

    let shutdown = await_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(spread) = spreads.recv() => {
                if spread.is_profitable {
                    tracing::debug!(
                        symbol = %spread.symbol,
                        buy = %spread.buy_exchange,
                        sell = %spread.sell_exchange,
                        spread = %spread.spread_percentage,
                        "Spread opportunity"
                    );
                }
            }
            Some(opportunity) = opportunities.recv() => {
                tracing::debug!(
                    exchange = %opportunity.exchange,
                    path = %opportunity.path.join(" -> "),
                    profit = %opportunity.profit,
                    "Triangular opportunity received"
                );
            }
            _ = stats_tick.tick() => log_statistics(&pipeline).await,
            Some((exchange, outcome)) = pipeline.next_supervisor_exit() => match outcome {
                Ok(SupervisorExit::Cancelled) => {}
                Ok(exit) => tracing::warn!(%exchange, ?exit, "Connector supervisor exited"),
                Err(e) => tracing::error!(%exchange, error = %e, "Connector abandoned"),
            },
        }
    }

    if let Some(stats) = pipeline.shutdown().await {
        tracing::info!(
            trades = stats.total_trades,
            successful = stats.successful_trades,
            profit = %stats.total_profit,
            balance = %stats.current_balance,
            "Final simulation results"
        );
    }

    for (connector, feed) in feeds {
        connector.stop();
        let _ = feed.await;
    }

    tracing::info!("Arbitrage engine stopped");
    Ok(())
}

async fn log_statistics(pipeline: &Pipeline) {
    match pipeline.statistics().await {
        Ok(stats) => tracing::info!(
            trades = stats.total_trades,
            successful = stats.successful_trades,
            success_rate = stats.success_rate,
            profit = %stats.total_profit,
            balance = %stats.current_balance,
            "Simulation statistics"
        ),
        Err(e) => tracing::warn!(error = %e, "Statistics unavailable"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        exchanges = ?config.exchanges,
        symbols = ?config.symbols,
        min_spread = %config.spread.min_spread_threshold,
        min_triangular_profit = %config.triangular.min_profit_threshold,
        initial_balance = %config.simulation.initial_balance,
        metrics_port = ?config.service.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
