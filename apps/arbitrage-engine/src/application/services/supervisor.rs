//! Connector Supervisor
//!
//! Keeps one connector's symbols flowing into the pipeline. Each round opens
//! a bridge stream per symbol and merges them; a terminal error on any of
//! them ends the round. Between rounds the supervisor backs off, and while
//! the connector's circuit breaker is open it waits out the open window.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::select_all;
use tokio_util::sync::CancellationToken;

use super::ingestion::IngestionBridge;
use super::router::QuoteRouter;
use crate::application::ports::ExchangeConnector;
use crate::domain::market_data::canonical_exchange;
use crate::error::IngestionError;
use crate::infrastructure::metrics;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, ReconnectConfig, ReconnectError, ReconnectPolicy,
};

/// Why a supervisor stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The pipeline was shut down.
    Cancelled,
    /// Every raw feed closed.
    SourcesEnded,
    /// A pipeline worker is gone.
    PipelineStopped,
}

/// Outcome of one ingestion round.
enum Round {
    Exit(SupervisorExit),
    Failed(IngestionError),
}

/// Restarts one connector's ingestion under a breaker and a backoff policy.
pub struct ConnectorSupervisor {
    exchange: String,
    connector: Arc<dyn ExchangeConnector>,
    symbols: Vec<String>,
    bridge: IngestionBridge,
    router: QuoteRouter,
    breaker: CircuitBreaker,
    policy: ReconnectPolicy,
}

impl ConnectorSupervisor {
    /// Create a supervisor for `symbols` on `connector`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        symbols: Vec<String>,
        bridge: IngestionBridge,
        router: QuoteRouter,
        breaker: CircuitBreakerConfig,
        reconnect: ReconnectConfig,
    ) -> Self {
        let exchange = canonical_exchange(&connector.exchange());
        Self {
            breaker: CircuitBreaker::new(exchange.clone(), breaker),
            policy: ReconnectPolicy::new(reconnect),
            exchange,
            connector,
            symbols,
            bridge,
            router,
        }
    }

    /// Exchange being supervised.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Run until cancelled, the sources end, or restarts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns `ReconnectError::AttemptsExhausted` when the backoff policy
    /// gives up.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SupervisorExit, ReconnectError> {
        tracing::info!(
            exchange = %self.exchange,
            symbols = ?self.symbols,
            "Connector supervisor started"
        );

        loop {
            if let Some(wait) = self.breaker.retry_after() {
                tracing::info!(
                    exchange = %self.exchange,
                    wait_ms = wait.as_millis(),
                    "Circuit open, waiting before reconnect"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(SupervisorExit::Cancelled),
                    () = tokio::time::sleep(wait) => {}
                }
            }

            let error = match self.round(&cancel).await {
                Round::Exit(exit) => {
                    tracing::info!(exchange = %self.exchange, ?exit, "Connector supervisor stopped");
                    return Ok(exit);
                }
                Round::Failed(error) => error,
            };

            metrics::record_ingestion_error(&self.exchange, error.kind());
            self.breaker.record_failure();
            tracing::warn!(
                exchange = %self.exchange,
                %error,
                breaker = %self.breaker.state().phase(),
                "Ingestion round failed"
            );

            let Some(delay) = self.policy.next_delay() else {
                tracing::error!(
                    exchange = %self.exchange,
                    attempts = self.policy.attempts(),
                    "Giving up on connector"
                );
                return Err(ReconnectError::AttemptsExhausted(self.policy.attempts()));
            };
            metrics::record_reconnect(&self.exchange);
            tracing::info!(
                exchange = %self.exchange,
                attempt = self.policy.attempts(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(SupervisorExit::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn round(&mut self, cancel: &CancellationToken) -> Round {
        let mut merged = select_all(
            self.symbols
                .iter()
                .map(|symbol| self.bridge.open(Arc::clone(&self.connector), symbol)),
        );

        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Round::Exit(SupervisorExit::Cancelled),
                item = merged.next() => item,
            };
            match item {
                Some(Ok(quote)) => {
                    self.breaker.record_success();
                    self.policy.reset();
                    if self.router.route(quote).await.is_err() {
                        return Round::Exit(SupervisorExit::PipelineStopped);
                    }
                }
                Some(Err(IngestionError::PipelineUnavailable { .. })) => {
                    return Round::Exit(SupervisorExit::PipelineStopped);
                }
                Some(Err(error)) => return Round::Failed(error),
                None => return Round::Exit(SupervisorExit::SourcesEnded),
            }
        }
    }
}

impl std::fmt::Debug for ConnectorSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSupervisor")
            .field("exchange", &self.exchange)
            .field("symbols", &self.symbols)
            .field("breaker", &self.breaker)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use tokio::sync::broadcast;

    use super::*;
    use crate::application::ports::{ConnectorError, MockExchangeConnector};
    use crate::application::services::normalizer::NormalizerService;
    use crate::application::services::spread_detector::SpreadDetectorService;
    use crate::application::services::triangular_detector::TriangularDetectorService;
    use crate::domain::market_data::{ConnectionEvent, NormalizedQuote, RawQuote};
    use crate::domain::normalization::{Normalizer, NormalizerConfig, SystemClock};
    use crate::domain::spread::SpreadBook;
    use crate::domain::triangular::{PathCatalog, PathEvaluator, TriangularConfig};
    use crate::infrastructure::broadcast::EventBus;

    struct Fixture {
        quotes: broadcast::Sender<RawQuote>,
        events: broadcast::Sender<ConnectionEvent>,
        subscribe_calls: Arc<AtomicUsize>,
        normalized: EventBus<NormalizedQuote>,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                quotes: broadcast::channel(16).0,
                events: broadcast::channel(16).0,
                subscribe_calls: Arc::new(AtomicUsize::new(0)),
                normalized: EventBus::new("quotes", 16),
                cancel: CancellationToken::new(),
            }
        }

        fn connector(&self, subscribe: Result<(), ConnectorError>) -> Arc<dyn ExchangeConnector> {
            let quotes = self.quotes.clone();
            let events = self.events.clone();
            let calls = Arc::clone(&self.subscribe_calls);

            let mut mock = MockExchangeConnector::new();
            mock.expect_exchange().returning(|| "sim".to_string());
            mock.expect_raw_quotes().returning(move || quotes.subscribe());
            mock.expect_connection_events()
                .returning(move || events.subscribe());
            mock.expect_subscribe().returning(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                subscribe.clone()
            });
            Arc::new(mock)
        }

        fn supervisor(
            &self,
            connector: Arc<dyn ExchangeConnector>,
            breaker: CircuitBreakerConfig,
            reconnect: ReconnectConfig,
        ) -> ConnectorSupervisor {
            let cancel = self.cancel.clone();
            let (normalizer, _) =
                NormalizerService::spawn(Normalizer::new(NormalizerConfig::default()), 16, cancel.clone());
            let (spread, _) = SpreadDetectorService::spawn(
                SpreadBook::default(),
                EventBus::new("spreads", 16),
                16,
                cancel.clone(),
            );
            let (triangular, _) = TriangularDetectorService::spawn(
                PathEvaluator::new(TriangularConfig::default()),
                PathCatalog::standard(),
                Arc::new(SystemClock),
                EventBus::new("opportunities", 16),
                16,
                cancel,
            );
            ConnectorSupervisor::new(
                connector,
                vec!["BTC-USD".to_string()],
                IngestionBridge::new(normalizer, 16),
                QuoteRouter::new(self.normalized.clone(), spread, triangular),
                breaker,
                reconnect,
            )
        }
    }

    fn quick_reconnect(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn routes_quotes_until_cancelled() {
        let fixture = Fixture::new();
        let supervisor = fixture.supervisor(
            fixture.connector(Ok(())),
            CircuitBreakerConfig::default(),
            ReconnectConfig::default(),
        );
        let mut normalized = fixture.normalized.subscribe();
        let run = tokio::spawn(supervisor.run(fixture.cancel.clone()));

        // Wait for the bridge to take its receiver.
        while fixture.quotes.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        fixture
            .quotes
            .send(RawQuote::now("sim", "BTC-USD", dec!(100), dec!(101)))
            .unwrap();

        let quote = normalized.recv().await.unwrap();
        assert_eq!(quote.exchange, "sim");
        assert_eq!(quote.symbol, "BTC-USD");

        fixture.cancel.cancel();
        assert_eq!(run.await.unwrap(), Ok(SupervisorExit::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_reconnect_budget() {
        let fixture = Fixture::new();
        let supervisor = fixture.supervisor(
            fixture.connector(Err(ConnectorError::Transport {
                message: "refused".to_string(),
            })),
            CircuitBreakerConfig::default(),
            quick_reconnect(2),
        );

        let result = supervisor.run(fixture.cancel.clone()).await;

        assert_eq!(result, Err(ReconnectError::AttemptsExhausted(2)));
        assert_eq!(fixture.subscribe_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_delays_the_next_round() {
        let fixture = Fixture::new();
        let supervisor = fixture.supervisor(
            fixture.connector(Err(ConnectorError::Closed)),
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(10),
                success_threshold: 1,
            },
            quick_reconnect(0),
        );
        let run = tokio::spawn(supervisor.run(fixture.cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fixture.subscribe_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fixture.subscribe_calls.load(Ordering::SeqCst), 2);

        fixture.cancel.cancel();
        assert_eq!(run.await.unwrap(), Ok(SupervisorExit::Cancelled));
    }

    #[tokio::test]
    async fn closed_sources_end_the_supervisor() {
        let fixture = Fixture::new();
        let (quotes, quotes_rx) = broadcast::channel::<RawQuote>(16);
        let (_events, events_rx) = broadcast::channel::<ConnectionEvent>(16);

        let mut mock = MockExchangeConnector::new();
        mock.expect_exchange().returning(|| "sim".to_string());
        mock.expect_raw_quotes().return_once(move || quotes_rx);
        mock.expect_connection_events().return_once(move || events_rx);
        mock.expect_subscribe().returning(|_| Ok(()));

        let supervisor = fixture.supervisor(
            Arc::new(mock),
            CircuitBreakerConfig::default(),
            ReconnectConfig::default(),
        );
        drop(quotes);

        let exit = supervisor.run(fixture.cancel.clone()).await;
        assert_eq!(exit, Ok(SupervisorExit::SourcesEnded));
    }
}
