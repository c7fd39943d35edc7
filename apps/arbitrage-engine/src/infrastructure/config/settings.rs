//! Pipeline Configuration Settings
//!
//! Configuration for every component, loaded from `ARB_*` environment
//! variables. Unset variables fall back to defaults; set but unparseable
//! values are errors, as are values outside their valid range.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::normalization::NormalizerConfig;
use crate::domain::simulation::SimulationConfig;
use crate::domain::spread::SpreadConfig;
use crate::domain::triangular::TriangularConfig;
use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::synthetic::SyntheticConfig;
use crate::resilience::{CircuitBreakerConfig, ReconnectConfig};

/// Exchanges simulated when `ARB_EXCHANGES` is unset.
const DEFAULT_EXCHANGES: [&str; 3] = ["binance", "coinbase", "kraken"];

/// Symbols subscribed when `ARB_SYMBOLS` is unset.
const DEFAULT_SYMBOLS: [&str; 6] = [
    "BTC-USD", "ETH-USD", "SOL-USD", "ETH-BTC", "SOL-BTC", "SOL-ETH",
];

/// Worker sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Capacity of each worker's command queue.
    pub command_capacity: usize,
    /// How often the binary logs simulation statistics.
    pub stats_interval: Duration,
    /// Prometheus exporter port; `None` disables the listener.
    pub metrics_port: Option<u16>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            command_capacity: 1_024,
            stats_interval: Duration::from_secs(30),
            metrics_port: Some(9_090),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Exchanges to attach.
    pub exchanges: Vec<String>,
    /// Symbols to subscribe on every exchange.
    pub symbols: Vec<String>,
    /// Quote normalizer.
    pub normalizer: NormalizerConfig,
    /// Cross-exchange spread detector.
    pub spread: SpreadConfig,
    /// Triangular detector.
    pub triangular: TriangularConfig,
    /// Per-connector circuit breaker.
    pub breaker: CircuitBreakerConfig,
    /// Per-connector restart backoff.
    pub reconnect: ReconnectConfig,
    /// Paper trading.
    pub simulation: SimulationConfig,
    /// Topic capacities.
    pub broadcast: BroadcastConfig,
    /// Worker sizing and process settings.
    pub service: ServiceSettings,
    /// Synthetic feed parameters.
    pub synthetic: SyntheticConfig,
}

impl PipelineConfig {
    /// Defaults with the demo exchange and symbol lists filled in.
    #[must_use]
    pub fn with_default_markets() -> Self {
        Self {
            exchanges: DEFAULT_EXCHANGES.map(String::from).to_vec(),
            symbols: DEFAULT_SYMBOLS.map(String::from).to_vec(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is out of
    /// range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { get: &get };
        let defaults = Self::with_default_markets();

        let exchanges = env.list("ARB_EXCHANGES").unwrap_or(defaults.exchanges);
        let symbols = env.list("ARB_SYMBOLS").unwrap_or(defaults.symbols);

        let normalizer = NormalizerConfig {
            stale_interval: env.millis("ARB_STALE_INTERVAL_MS", defaults.normalizer.stale_interval)?,
            minimum_gap: env.micros("ARB_MINIMUM_GAP_US", defaults.normalizer.minimum_gap)?,
            rounding_scale: env.parse("ARB_ROUNDING_SCALE", defaults.normalizer.rounding_scale)?,
        };

        let spread = SpreadConfig {
            min_spread_threshold: env.parse(
                "ARB_MIN_SPREAD_THRESHOLD",
                defaults.spread.min_spread_threshold,
            )?,
            max_latency_ms: env.parse("ARB_MAX_LATENCY_MS", defaults.spread.max_latency_ms)?,
        };

        let triangular = TriangularConfig {
            start_amount: env.parse("ARB_TRIANGULAR_START_AMOUNT", defaults.triangular.start_amount)?,
            fee_percentage: env.parse("ARB_TRIANGULAR_FEE", defaults.triangular.fee_percentage)?,
            fee_overrides: env.fee_table("ARB_TRIANGULAR_FEE_OVERRIDES")?,
            // Cycles share the spread threshold unless tuned on their own.
            min_profit_threshold: env.parse(
                "ARB_TRIANGULAR_MIN_PROFIT",
                spread.min_spread_threshold,
            )?,
            max_quote_age: env.millis(
                "ARB_TRIANGULAR_MAX_QUOTE_AGE_MS",
                defaults.triangular.max_quote_age,
            )?,
            max_concurrent_evaluations: env.parse(
                "ARB_TRIANGULAR_MAX_CONCURRENCY",
                defaults.triangular.max_concurrent_evaluations,
            )?,
            sweep_interval: env.millis(
                "ARB_TRIANGULAR_SWEEP_INTERVAL_MS",
                defaults.triangular.sweep_interval,
            )?,
            max_pending_batches: env.parse(
                "ARB_TRIANGULAR_MAX_BATCHES",
                defaults.triangular.max_pending_batches,
            )?,
        };

        let breaker = CircuitBreakerConfig {
            failure_threshold: env.parse(
                "ARB_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            )?,
            timeout: env.secs("ARB_BREAKER_TIMEOUT_SECS", defaults.breaker.timeout)?,
            success_threshold: env.parse(
                "ARB_BREAKER_SUCCESS_THRESHOLD",
                defaults.breaker.success_threshold,
            )?,
        };

        let reconnect = ReconnectConfig {
            initial_delay: env.millis(
                "ARB_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.initial_delay,
            )?,
            max_delay: env.millis("ARB_RECONNECT_DELAY_MAX_MS", defaults.reconnect.max_delay)?,
            multiplier: env.parse("ARB_RECONNECT_MULTIPLIER", defaults.reconnect.multiplier)?,
            jitter_factor: env.parse("ARB_RECONNECT_JITTER", defaults.reconnect.jitter_factor)?,
            max_attempts: env.parse("ARB_RECONNECT_MAX_ATTEMPTS", defaults.reconnect.max_attempts)?,
        };

        let simulation = SimulationConfig {
            initial_balance: env.parse("ARB_INITIAL_BALANCE", defaults.simulation.initial_balance)?,
            fee_percentage_per_trade: env.parse(
                "ARB_SIMULATION_FEE",
                defaults.simulation.fee_percentage_per_trade,
            )?,
            trade_allocation_percentage: env.parse(
                "ARB_TRADE_ALLOCATION",
                defaults.simulation.trade_allocation_percentage,
            )?,
        };

        let broadcast = BroadcastConfig {
            quotes_capacity: env.parse("ARB_QUOTES_CAPACITY", defaults.broadcast.quotes_capacity)?,
            spreads_capacity: env.parse("ARB_SPREADS_CAPACITY", defaults.broadcast.spreads_capacity)?,
            opportunities_capacity: env.parse(
                "ARB_OPPORTUNITIES_CAPACITY",
                defaults.broadcast.opportunities_capacity,
            )?,
        };

        let metrics_port: u16 = env.parse(
            "ARB_METRICS_PORT",
            defaults.service.metrics_port.unwrap_or(0),
        )?;
        let service = ServiceSettings {
            command_capacity: env.parse("ARB_COMMAND_CAPACITY", defaults.service.command_capacity)?,
            stats_interval: env.secs("ARB_STATS_INTERVAL_SECS", defaults.service.stats_interval)?,
            metrics_port: (metrics_port != 0).then_some(metrics_port),
        };

        let synthetic = SyntheticConfig {
            tick_interval: env.millis("ARB_SYNTHETIC_TICK_MS", defaults.synthetic.tick_interval)?,
            volatility: env.parse("ARB_SYNTHETIC_VOLATILITY", defaults.synthetic.volatility)?,
            half_spread: env.parse("ARB_SYNTHETIC_HALF_SPREAD", defaults.synthetic.half_spread)?,
            ..defaults.synthetic
        };

        let config = Self {
            exchanges,
            symbols,
            normalizer,
            spread,
            triangular,
            breaker,
            reconnect,
            simulation,
            broadcast,
            service,
            synthetic,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fee_range = |key: &'static str, fee: Decimal| {
            check(key, fee >= Decimal::ZERO && fee < Decimal::ONE, "must be in [0, 1)")
        };

        check("ARB_EXCHANGES", !self.exchanges.is_empty(), "must not be empty")?;
        check("ARB_SYMBOLS", !self.symbols.is_empty(), "must not be empty")?;

        check(
            "ARB_MINIMUM_GAP_US",
            !self.normalizer.minimum_gap.is_zero(),
            "must be > 0",
        )?;
        check(
            "ARB_ROUNDING_SCALE",
            self.normalizer.rounding_scale <= 28,
            "must be <= 28",
        )?;

        check(
            "ARB_MIN_SPREAD_THRESHOLD",
            self.spread.min_spread_threshold >= Decimal::ZERO,
            "must be >= 0",
        )?;
        check(
            "ARB_MAX_LATENCY_MS",
            self.spread.max_latency_ms.is_finite() && self.spread.max_latency_ms >= 0.0,
            "must be >= 0",
        )?;

        check(
            "ARB_TRIANGULAR_START_AMOUNT",
            self.triangular.start_amount > Decimal::ZERO,
            "must be > 0",
        )?;
        fee_range("ARB_TRIANGULAR_FEE", self.triangular.fee_percentage)?;
        for fee in self.triangular.fee_overrides.values() {
            fee_range("ARB_TRIANGULAR_FEE_OVERRIDES", *fee)?;
        }
        check(
            "ARB_TRIANGULAR_MIN_PROFIT",
            self.triangular.min_profit_threshold >= Decimal::ZERO,
            "must be >= 0",
        )?;
        check(
            "ARB_TRIANGULAR_MAX_CONCURRENCY",
            self.triangular.max_concurrent_evaluations > 0,
            "must be > 0",
        )?;
        check(
            "ARB_TRIANGULAR_SWEEP_INTERVAL_MS",
            !self.triangular.sweep_interval.is_zero(),
            "must be > 0",
        )?;
        check(
            "ARB_TRIANGULAR_MAX_BATCHES",
            self.triangular.max_pending_batches > 0,
            "must be > 0",
        )?;

        check(
            "ARB_BREAKER_FAILURE_THRESHOLD",
            self.breaker.failure_threshold > 0,
            "must be > 0",
        )?;
        check(
            "ARB_BREAKER_SUCCESS_THRESHOLD",
            self.breaker.success_threshold > 0,
            "must be > 0",
        )?;

        check(
            "ARB_RECONNECT_MULTIPLIER",
            self.reconnect.multiplier >= 1.0,
            "must be >= 1",
        )?;
        check(
            "ARB_RECONNECT_JITTER",
            (0.0..1.0).contains(&self.reconnect.jitter_factor),
            "must be in [0, 1)",
        )?;

        check(
            "ARB_INITIAL_BALANCE",
            self.simulation.initial_balance > Decimal::ZERO,
            "must be > 0",
        )?;
        fee_range("ARB_SIMULATION_FEE", self.simulation.fee_percentage_per_trade)?;
        check(
            "ARB_TRADE_ALLOCATION",
            self.simulation.trade_allocation_percentage > Decimal::ZERO
                && self.simulation.trade_allocation_percentage <= Decimal::ONE,
            "must be in (0, 1]",
        )?;

        check(
            "ARB_QUOTES_CAPACITY",
            self.broadcast.quotes_capacity > 0,
            "must be > 0",
        )?;
        check(
            "ARB_SPREADS_CAPACITY",
            self.broadcast.spreads_capacity > 0,
            "must be > 0",
        )?;
        check(
            "ARB_OPPORTUNITIES_CAPACITY",
            self.broadcast.opportunities_capacity > 0,
            "must be > 0",
        )?;
        check(
            "ARB_COMMAND_CAPACITY",
            self.service.command_capacity > 0,
            "must be > 0",
        )?;
        check(
            "ARB_STATS_INTERVAL_SECS",
            !self.service.stats_interval.is_zero(),
            "must be > 0",
        )?;
        check(
            "ARB_SYNTHETIC_TICK_MS",
            !self.synthetic.tick_interval.is_zero(),
            "must be > 0",
        )
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Value parsed but is outside its valid range.
    #[error("{key} {constraint}")]
    OutOfRange {
        /// Variable name.
        key: &'static str,
        /// Human-readable constraint.
        constraint: &'static str,
    },
}

fn check(key: &'static str, ok: bool, constraint: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, constraint })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    get: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.get)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }

    fn micros(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_micros()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_micros)
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .raw(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Some(items)
    }

    /// `exchange=fee,exchange=fee`
    fn fee_table(&self, key: &str) -> Result<HashMap<String, Decimal>, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(HashMap::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| -> Result<(String, Decimal), ConfigError> {
                let invalid = || ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: entry.to_string(),
                };
                let (exchange, fee) = entry.split_once('=').ok_or_else(invalid)?;
                let fee = fee.trim().parse::<Decimal>().map_err(|_| invalid())?;
                Ok((exchange.trim().to_lowercase(), fee))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.exchanges, ["binance", "coinbase", "kraken"]);
        assert_eq!(config.symbols.len(), 6);
        assert_eq!(config.normalizer.stale_interval, Duration::from_secs(5));
        assert_eq!(config.spread.min_spread_threshold, dec!(0.001));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.simulation.initial_balance, dec!(10000));
        assert_eq!(config.service.metrics_port, Some(9090));
    }

    #[test]
    fn overrides_are_applied() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ARB_EXCHANGES", "alpha, beta"),
            ("ARB_SYMBOLS", "btc-usd"),
            ("ARB_STALE_INTERVAL_MS", "2500"),
            ("ARB_MIN_SPREAD_THRESHOLD", "0.002"),
            ("ARB_MAX_LATENCY_MS", "250"),
            ("ARB_BREAKER_FAILURE_THRESHOLD", "3"),
            ("ARB_INITIAL_BALANCE", "5000"),
            ("ARB_TRIANGULAR_FEE_OVERRIDES", "Binance=0.00075, kraken=0.0026"),
            ("ARB_METRICS_PORT", "0"),
        ]))
        .unwrap();

        assert_eq!(config.exchanges, ["alpha", "beta"]);
        assert_eq!(config.symbols, ["btc-usd"]);
        assert_eq!(config.normalizer.stale_interval, Duration::from_millis(2500));
        assert_eq!(config.spread.min_spread_threshold, dec!(0.002));
        assert!((config.spread.max_latency_ms - 250.0).abs() < f64::EPSILON);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.simulation.initial_balance, dec!(5000));
        assert_eq!(config.triangular.fee_for("binance"), dec!(0.00075));
        assert_eq!(config.triangular.fee_for("kraken"), dec!(0.0026));
        assert_eq!(config.triangular.fee_for("coinbase"), dec!(0.001));
        assert_eq!(config.service.metrics_port, None);
    }

    #[test]
    fn triangular_threshold_follows_spread_threshold_unless_set() {
        let config =
            PipelineConfig::from_lookup(lookup(&[("ARB_MIN_SPREAD_THRESHOLD", "0.004")])).unwrap();
        assert_eq!(config.triangular.min_profit_threshold, dec!(0.004));

        let config = PipelineConfig::from_lookup(lookup(&[
            ("ARB_MIN_SPREAD_THRESHOLD", "0.004"),
            ("ARB_TRIANGULAR_MIN_PROFIT", "0.0005"),
        ]))
        .unwrap();
        assert_eq!(config.spread.min_spread_threshold, dec!(0.004));
        assert_eq!(config.triangular.min_profit_threshold, dec!(0.0005));
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let err = PipelineConfig::from_lookup(lookup(&[("ARB_MAX_LATENCY_MS", "fast")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "ARB_MAX_LATENCY_MS".to_string(),
                value: "fast".to_string(),
            }
        );
    }

    #[test]
    fn malformed_fee_override_is_an_error() {
        let err = PipelineConfig::from_lookup(lookup(&[(
            "ARB_TRIANGULAR_FEE_OVERRIDES",
            "binance:0.001",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (key, value) in [
            ("ARB_TRADE_ALLOCATION", "1.5"),
            ("ARB_SIMULATION_FEE", "1"),
            ("ARB_MINIMUM_GAP_US", "0"),
            ("ARB_TRIANGULAR_MAX_CONCURRENCY", "0"),
            ("ARB_TRIANGULAR_MAX_BATCHES", "0"),
            ("ARB_BREAKER_SUCCESS_THRESHOLD", "0"),
            ("ARB_INITIAL_BALANCE", "-1"),
        ] {
            let err = PipelineConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::OutOfRange { key: k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn blank_value_falls_back_to_default() {
        let config = PipelineConfig::from_lookup(lookup(&[("ARB_ROUNDING_SCALE", "  ")])).unwrap();
        assert_eq!(config.normalizer.rounding_scale, 8);
    }
}
