//! Synthetic Exchange Connector
//!
//! An [`ExchangeConnector`] that invents market data. Each connector runs its
//! own random walk of asset USD mids and quotes every subscribed pair from
//! them, so independent connectors drift apart and produce cross-exchange
//! spreads. Per-quote noise breaks the consistency between pairs on one
//! exchange, which is what triangular cycles feed on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectorError, ExchangeConnector};
use crate::domain::market_data::{
    ConnectionEvent, ConnectionStatus, RawQuote, canonical_symbol, split_pair,
};
use crate::domain::normalization::PRICE_ROUNDING;
use crate::domain::triangular::SETTLEMENT_ASSET;

/// Synthetic feed parameters.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Time between quote rounds.
    pub tick_interval: Duration,
    /// Maximum relative move of each USD mid per tick.
    pub volatility: f64,
    /// Maximum relative noise added to each individual quote.
    pub quote_noise: f64,
    /// Half the bid/ask spread as a fraction of the price.
    pub half_spread: Decimal,
    /// Starting USD mid per asset.
    pub seed_prices: Vec<(String, Decimal)>,
    /// Ticks between heartbeats.
    pub heartbeat_every: u32,
    /// Probability per tick of a simulated connection drop.
    pub drop_probability: f64,
    /// Capacity of the raw quote and event channels.
    pub channel_capacity: usize,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            volatility: 0.000_5,
            quote_noise: 0.001,
            half_spread: dec!(0.0002),
            seed_prices: [
                ("BTC", dec!(60000)),
                ("ETH", dec!(3000)),
                ("SOL", dec!(150)),
                ("BNB", dec!(550)),
                ("XRP", dec!(0.6)),
                ("ADA", dec!(0.45)),
                ("DOGE", dec!(0.12)),
                ("LINK", dec!(15)),
            ]
            .into_iter()
            .map(|(asset, price)| (asset.to_string(), price))
            .collect(),
            heartbeat_every: 40,
            drop_probability: 0.0,
            channel_capacity: 4_096,
            seed: None,
        }
    }
}

/// Randomly walking exchange.
#[derive(Debug)]
pub struct SyntheticConnector {
    exchange: String,
    config: SyntheticConfig,
    quotes_tx: broadcast::Sender<RawQuote>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    subscribed: Arc<RwLock<BTreeSet<String>>>,
    cancel: CancellationToken,
}

impl SyntheticConnector {
    /// Create an idle connector. Call [`start`](Self::start) to begin quoting.
    #[must_use]
    pub fn new(exchange: impl Into<String>, config: SyntheticConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        Self {
            exchange: exchange.into(),
            config,
            quotes_tx: broadcast::channel(capacity).0,
            events_tx: broadcast::channel(capacity).0,
            subscribed: Arc::new(RwLock::new(BTreeSet::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the feed task.
    #[must_use]
    pub fn start(&self) -> JoinHandle<()> {
        let feed = Feed {
            exchange: self.exchange.clone(),
            mids: self
                .config
                .seed_prices
                .iter()
                .map(|(asset, price)| (asset.clone(), *price))
                .collect(),
            rng: self
                .config
                .seed
                .map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64),
            config: self.config.clone(),
            quotes_tx: self.quotes_tx.clone(),
            events_tx: self.events_tx.clone(),
            subscribed: Arc::clone(&self.subscribed),
        };
        tokio::spawn(feed.run(self.cancel.clone()))
    }

    /// Stop the feed task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Publish a connection drop, as a real transport would.
    pub fn simulate_disconnect(&self, reason: impl Into<String>) {
        let _ = self.events_tx.send(ConnectionEvent::Disconnected {
            reason: Some(reason.into()),
        });
    }

    /// Symbols currently subscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscribed.read().iter().cloned().collect()
    }

    fn knows(&self, asset: &str) -> bool {
        asset == SETTLEMENT_ASSET || self.config.seed_prices.iter().any(|(a, _)| a == asset)
    }
}

#[async_trait]
impl ExchangeConnector for SyntheticConnector {
    fn exchange(&self) -> String {
        self.exchange.clone()
    }

    fn raw_quotes(&self) -> broadcast::Receiver<RawQuote> {
        self.quotes_tx.subscribe()
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    async fn subscribe(&self, symbol: &str) -> Result<(), ConnectorError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectorError::Closed);
        }
        let symbol = canonical_symbol(symbol);
        let known = split_pair(&symbol)
            .is_some_and(|(base, quote)| base != quote && self.knows(base) && self.knows(quote));
        if !known {
            return Err(ConnectorError::SubscriptionRejected {
                message: "unknown market".to_string(),
                symbol,
            });
        }
        tracing::debug!(exchange = %self.exchange, %symbol, "Synthetic subscription added");
        self.subscribed.write().insert(symbol);
        Ok(())
    }
}

/// State owned by the feed task.
struct Feed {
    exchange: String,
    config: SyntheticConfig,
    mids: HashMap<String, Decimal>,
    rng: StdRng,
    quotes_tx: broadcast::Sender<RawQuote>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    subscribed: Arc<RwLock<BTreeSet<String>>>,
}

impl Feed {
    async fn run(mut self, cancel: CancellationToken) {
        self.status(ConnectionStatus::Connecting);
        self.status(ConnectionStatus::Connected);
        tracing::info!(exchange = %self.exchange, "Synthetic feed connected");

        let mut interval = tokio::time::interval(self.config.tick_interval);
        let mut ticks: u32 = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    ticks = ticks.wrapping_add(1);
                    self.tick(ticks);
                }
            }
        }

        self.status(ConnectionStatus::Disconnected);
        tracing::info!(exchange = %self.exchange, "Synthetic feed stopped");
    }

    fn tick(&mut self, ticks: u32) {
        self.walk();

        let symbols: Vec<String> = self.subscribed.read().iter().cloned().collect();
        for symbol in symbols {
            if let Some(quote) = self.quote(&symbol) {
                let _ = self.quotes_tx.send(quote);
            }
        }

        if self.config.heartbeat_every > 0 && ticks % self.config.heartbeat_every == 0 {
            let _ = self.events_tx.send(ConnectionEvent::ReceivedHeartbeat);
        }
        if self.config.drop_probability > 0.0 && self.rng.random_bool(self.config.drop_probability.min(1.0)) {
            tracing::info!(exchange = %self.exchange, "Simulating connection drop");
            let _ = self.events_tx.send(ConnectionEvent::Disconnected {
                reason: Some("simulated drop".to_string()),
            });
        }
    }

    fn walk(&mut self) {
        let volatility = self.config.volatility;
        for mid in self.mids.values_mut() {
            let step = jitter(&mut self.rng, volatility);
            let next = *mid * step;
            if next > Decimal::ZERO {
                *mid = next;
            }
        }
    }

    fn usd_mid(&self, asset: &str) -> Option<Decimal> {
        if asset == SETTLEMENT_ASSET {
            return Some(Decimal::ONE);
        }
        self.mids.get(asset).copied()
    }

    fn quote(&mut self, symbol: &str) -> Option<RawQuote> {
        let (base, quote) = split_pair(symbol)?;
        let price = self
            .usd_mid(base)?
            .checked_div(self.usd_mid(quote)?)?
            .checked_mul(jitter(&mut self.rng, self.config.quote_noise))?;
        let half = price * self.config.half_spread;
        let bid = (price - half).round_dp_with_strategy(10, PRICE_ROUNDING);
        let ask = (price + half).round_dp_with_strategy(10, PRICE_ROUNDING);
        Some(RawQuote::now(self.exchange.clone(), symbol, bid, ask))
    }

    fn status(&self, status: ConnectionStatus) {
        let _ = self.events_tx.send(ConnectionEvent::StatusChanged(status));
    }
}

/// Multiplier in `[1 - amplitude, 1 + amplitude]`.
fn jitter(rng: &mut StdRng, amplitude: f64) -> Decimal {
    if amplitude <= 0.0 {
        return Decimal::ONE;
    }
    let offset = rng.random_range(-amplitude..=amplitude);
    Decimal::ONE + Decimal::try_from(offset).unwrap_or(Decimal::ZERO)
}
