//! Triangular Detector Service
//!
//! Keeps the latest quote per symbol for every exchange and evaluates the
//! [`PathCatalog`] against it. Every ingested quote starts a batch over the
//! paths that read its symbol; a periodic sweep starts a full-catalog batch
//! for every known exchange.
//!
//! Batches run on their own tasks so ingestion never waits on evaluation.
//! Inside a batch at most `max_concurrent_evaluations` paths are in flight,
//! and each profitable result is published as soon as its task completes.
//! Batches read a copy-on-write snapshot of the exchange's quotes.
//!
//! At most `max_pending_batches` batches run at once. Work arriving while
//! the limit is reached is merged into one deferred path set per exchange,
//! which starts on the latest quotes as soon as a batch finishes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::market_data::NormalizedQuote;
use crate::domain::normalization::Clock;
use crate::domain::triangular::{ExchangeQuotes, PathCatalog, PathEvaluator, TriangularOpportunity};
use crate::error::ServiceError;
use crate::infrastructure::broadcast::{EventBus, Subscription};
use crate::infrastructure::metrics;

const SERVICE: &str = "triangular_detector";

#[derive(Debug)]
enum Command {
    Ingest {
        quote: NormalizedQuote,
        reply: oneshot::Sender<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    ExchangeCount {
        reply: oneshot::Sender<usize>,
    },
}

/// What started a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Ingest,
    Sweep,
    Deferred,
}

impl Trigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Sweep => "sweep",
            Self::Deferred => "deferred",
        }
    }
}

/// Handle to the triangular detector worker.
#[derive(Debug, Clone)]
pub struct TriangularDetectorService {
    tx: mpsc::Sender<Command>,
    opportunities: EventBus<TriangularOpportunity>,
}

impl TriangularDetectorService {
    /// Spawn the worker publishing profitable cycles to `opportunities`.
    ///
    /// `clock` must be the clock that stamped the quotes' monotonic times.
    #[must_use]
    pub fn spawn(
        evaluator: PathEvaluator,
        catalog: Arc<PathCatalog>,
        clock: Arc<dyn Clock>,
        opportunities: EventBus<TriangularOpportunity>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Worker {
            books: HashMap::new(),
            catalog,
            evaluator: Arc::new(evaluator),
            clock,
            opportunities: opportunities.clone(),
            batches: JoinSet::new(),
            deferred: HashMap::new(),
            flush_waiters: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(rx, cancel));
        (Self { tx, opportunities }, handle)
    }

    /// Record a quote and schedule evaluation of the paths that read it.
    ///
    /// Returns once the quote is in the table, before evaluation finishes.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn ingest(&self, quote: NormalizedQuote) -> Result<(), ServiceError> {
        self.request(|reply| Command::Ingest { quote, reply }).await
    }

    /// Wait until every batch scheduled so far has finished publishing.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Number of exchanges with at least one quote.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn exchange_count(&self) -> Result<usize, ServiceError> {
        self.request(|reply| Command::ExchangeCount { reply }).await
    }

    /// Subscribe to profitable opportunities.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<TriangularOpportunity> {
        self.opportunities.subscribe()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    books: HashMap<String, Arc<ExchangeQuotes>>,
    catalog: Arc<PathCatalog>,
    evaluator: Arc<PathEvaluator>,
    clock: Arc<dyn Clock>,
    opportunities: EventBus<TriangularOpportunity>,
    batches: JoinSet<()>,
    deferred: HashMap<String, BTreeSet<usize>>,
    flush_waiters: Vec<oneshot::Sender<()>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let config = self.evaluator.config();
        tracing::info!(
            paths = self.catalog.len(),
            start_amount = %config.start_amount,
            max_concurrency = config.max_concurrent_evaluations,
            sweep_interval_ms = config.sweep_interval.as_millis(),
            "Triangular detector started"
        );

        // First sweep one period after start; ingestion covers the books until then.
        let period = config.sweep_interval.max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = self.batches.join_next(), if !self.batches.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "Triangular batch aborted");
                    }
                    self.batch_finished();
                }
                _ = sweep.tick() => self.sweep(),
                command = rx.recv() => match command {
                    Some(Command::Ingest { quote, reply }) => {
                        self.ingest(quote);
                        let _ = reply.send(());
                    }
                    Some(Command::Flush { reply }) => {
                        self.flush_waiters.push(reply);
                        self.release_flush_waiters();
                    }
                    Some(Command::ExchangeCount { reply }) => {
                        let _ = reply.send(self.books.len());
                    }
                    None => break,
                },
            }
        }

        self.batches.shutdown().await;
        tracing::info!(exchanges = self.books.len(), "Triangular detector stopped");
    }

    fn ingest(&mut self, quote: NormalizedQuote) {
        let exchange = quote.exchange.clone();
        let symbol = quote.symbol.clone();
        let book = self.books.entry(exchange.clone()).or_default();
        Arc::make_mut(book).insert(symbol.clone(), quote);
        let snapshot = Arc::clone(book);

        let catalog = Arc::clone(&self.catalog);
        let indices = catalog.indices_touching(&symbol);
        if !indices.is_empty() {
            self.schedule(Trigger::Ingest, exchange, snapshot, indices.iter().copied());
        }
    }

    fn sweep(&mut self) {
        if self.books.is_empty() {
            return;
        }
        let snapshots: Vec<_> = self
            .books
            .iter()
            .map(|(exchange, book)| (exchange.clone(), Arc::clone(book)))
            .collect();
        tracing::trace!(exchanges = snapshots.len(), "Triangular sweep");
        for (exchange, book) in snapshots {
            self.schedule(Trigger::Sweep, exchange, book, 0..self.catalog.len());
        }
    }

    /// Start a batch now, or fold its paths into the exchange's deferred set.
    fn schedule(
        &mut self,
        trigger: Trigger,
        exchange: String,
        quotes: Arc<ExchangeQuotes>,
        indices: impl IntoIterator<Item = usize>,
    ) {
        let limit = self.evaluator.config().max_pending_batches.max(1);
        if self.batches.len() < limit {
            self.spawn_batch(trigger, exchange, quotes, indices.into_iter().collect());
        } else {
            self.deferred.entry(exchange).or_default().extend(indices);
        }
    }

    fn batch_finished(&mut self) {
        let limit = self.evaluator.config().max_pending_batches.max(1);
        while self.batches.len() < limit {
            let Some(exchange) = self.deferred.keys().next().cloned() else {
                break;
            };
            let Some(indices) = self.deferred.remove(&exchange) else {
                break;
            };
            let Some(quotes) = self.books.get(&exchange).map(Arc::clone) else {
                continue;
            };
            tracing::trace!(%exchange, paths = indices.len(), "Starting deferred batch");
            self.spawn_batch(Trigger::Deferred, exchange, quotes, indices.into_iter().collect());
        }
        self.release_flush_waiters();
    }

    fn spawn_batch(
        &mut self,
        trigger: Trigger,
        exchange: String,
        quotes: Arc<ExchangeQuotes>,
        indices: Vec<usize>,
    ) {
        let batch = Batch {
            trigger,
            exchange: Arc::from(exchange),
            quotes,
            catalog: Arc::clone(&self.catalog),
            evaluator: Arc::clone(&self.evaluator),
            now: self.clock.monotonic_now(),
            opportunities: self.opportunities.clone(),
        };
        self.batches.spawn(batch.run(indices));
    }

    fn release_flush_waiters(&mut self) {
        if self.batches.is_empty() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

// =============================================================================
// Batch
// =============================================================================

/// One bounded fan-out over a set of catalog paths on one exchange.
struct Batch {
    trigger: Trigger,
    exchange: Arc<str>,
    quotes: Arc<ExchangeQuotes>,
    catalog: Arc<PathCatalog>,
    evaluator: Arc<PathEvaluator>,
    now: Duration,
    opportunities: EventBus<TriangularOpportunity>,
}

impl Batch {
    async fn run(self, indices: Vec<usize>) {
        let started = Instant::now();
        let limit = self.evaluator.config().max_concurrent_evaluations.max(1);
        let total = indices.len();
        let mut pending = indices.into_iter();
        let mut in_flight = JoinSet::new();
        let mut published = 0usize;

        loop {
            while in_flight.len() < limit {
                let Some(index) = pending.next() else { break };
                in_flight.spawn(self.evaluate(index));
            }
            match in_flight.join_next().await {
                Some(Ok(Some(opportunity))) => {
                    self.publish(opportunity);
                    published += 1;
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => tracing::warn!(error = %e, "Path evaluation aborted"),
                None => break,
            }
        }

        metrics::record_triangular_batch(self.trigger.as_str(), started.elapsed());
        tracing::trace!(
            exchange = %self.exchange,
            trigger = self.trigger.as_str(),
            paths = total,
            published,
            "Triangular batch finished"
        );
    }

    fn evaluate(&self, index: usize) -> impl Future<Output = Option<TriangularOpportunity>> + use<> {
        let exchange = Arc::clone(&self.exchange);
        let quotes = Arc::clone(&self.quotes);
        let catalog = Arc::clone(&self.catalog);
        let evaluator = Arc::clone(&self.evaluator);
        let now = self.now;
        async move {
            let path = catalog.path(index)?;
            evaluator
                .evaluate(&exchange, path, &quotes, now)
                .filter(|opportunity| opportunity.is_profitable)
        }
    }

    fn publish(&self, opportunity: TriangularOpportunity) {
        metrics::record_triangular_opportunity(&opportunity.exchange);
        tracing::info!(
            exchange = %opportunity.exchange,
            path = %opportunity.path.join(" -> "),
            profit = %opportunity.profit,
            profit_pct = %opportunity.profit_percentage,
            "Triangular opportunity"
        );
        let _ = self.opportunities.publish(opportunity);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::normalization::ManualClock;
    use crate::domain::triangular::TriangularConfig;

    fn quote(exchange: &str, symbol: &str, bid: Decimal, ask: Decimal) -> NormalizedQuote {
        NormalizedQuote {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            bid,
            ask,
            raw_timestamp: Utc::now(),
            monotonic_time: Duration::ZERO,
        }
    }

    fn spawn(clock: Arc<ManualClock>) -> TriangularDetectorService {
        spawn_with(
            TriangularConfig {
                sweep_interval: Duration::from_secs(3600),
                ..Default::default()
            },
            clock,
        )
    }

    fn spawn_with(config: TriangularConfig, clock: Arc<ManualClock>) -> TriangularDetectorService {
        TriangularDetectorService::spawn(
            PathEvaluator::new(config),
            PathCatalog::standard(),
            clock,
            EventBus::new("opportunities", 64),
            16,
            CancellationToken::new(),
        )
        .0
    }

    async fn feed_profitable_cycle(service: &TriangularDetectorService, exchange: &str) {
        service
            .ingest(quote(exchange, "BTC-USD", dec!(49990), dec!(50000)))
            .await
            .unwrap();
        service
            .ingest(quote(exchange, "ETH-USD", dec!(2600), dec!(2601)))
            .await
            .unwrap();
        service
            .ingest(quote(exchange, "BTC-ETH", dec!(20), dec!(20.01)))
            .await
            .unwrap();
        service.flush().await.unwrap();
    }

    async fn nothing_more(sub: &mut Subscription<TriangularOpportunity>) -> bool {
        tokio::time::timeout(Duration::from_millis(50), sub.recv())
            .await
            .is_err()
    }

    #[tokio::test]
    async fn publishes_exactly_one_profitable_cycle() {
        let service = spawn(Arc::new(ManualClock::new(Utc::now())));
        let mut sub = service.subscribe();

        feed_profitable_cycle(&service, "kraken").await;

        let opportunity = sub.recv().await.unwrap();
        assert_eq!(opportunity.exchange, "kraken");
        assert_eq!(opportunity.path, ["BTC", "ETH", "USD", "BTC"]);
        assert_eq!(opportunity.end_amount, dec!(1036.88311896));
        assert!(opportunity.is_profitable);
        assert!(nothing_more(&mut sub).await);
        assert_eq!(service.exchange_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_intermediate_leg_publishes_nothing() {
        let service = spawn(Arc::new(ManualClock::new(Utc::now())));
        let mut sub = service.subscribe();

        service
            .ingest(quote("kraken", "BTC-USD", dec!(49990), dec!(50000)))
            .await
            .unwrap();
        service
            .ingest(quote("kraken", "BTC-ETH", dec!(20), dec!(20.01)))
            .await
            .unwrap();
        service.flush().await.unwrap();

        assert!(nothing_more(&mut sub).await);
    }

    #[tokio::test]
    async fn exchanges_are_evaluated_independently() {
        let service = spawn(Arc::new(ManualClock::new(Utc::now())));
        let mut sub = service.subscribe();

        service
            .ingest(quote("binance", "BTC-USD", dec!(49990), dec!(50000)))
            .await
            .unwrap();
        service
            .ingest(quote("coinbase", "ETH-USD", dec!(2600), dec!(2601)))
            .await
            .unwrap();
        service
            .ingest(quote("kraken", "BTC-ETH", dec!(20), dec!(20.01)))
            .await
            .unwrap();
        service.flush().await.unwrap();

        assert!(nothing_more(&mut sub).await);
        assert_eq!(service.exchange_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stale_legs_are_ignored() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = spawn(Arc::clone(&clock));
        let mut sub = service.subscribe();

        service
            .ingest(quote("kraken", "BTC-USD", dec!(49990), dec!(50000)))
            .await
            .unwrap();
        service
            .ingest(quote("kraken", "ETH-USD", dec!(2600), dec!(2601)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(6));
        service
            .ingest(NormalizedQuote {
                monotonic_time: Duration::from_secs(6),
                ..quote("kraken", "BTC-ETH", dec!(20), dec!(20.01))
            })
            .await
            .unwrap();
        service.flush().await.unwrap();

        assert!(nothing_more(&mut sub).await);
    }

    #[tokio::test]
    async fn flush_on_idle_worker_returns() {
        let service = spawn(Arc::new(ManualClock::new(Utc::now())));
        service.flush().await.unwrap();
        assert_eq!(service.exchange_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_waits_one_interval_then_republishes() {
        let config = TriangularConfig {
            sweep_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let service = spawn_with(config, Arc::new(ManualClock::new(Utc::now())));
        let mut sub = service.subscribe();

        feed_profitable_cycle(&service, "kraken").await;
        assert_eq!(sub.recv().await.unwrap().exchange, "kraken");

        // Nothing from the sweep before its first period has elapsed.
        assert!(
            tokio::time::timeout(Duration::from_millis(900), sub.recv())
                .await
                .is_err()
        );

        let swept = tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swept.path, ["BTC", "ETH", "USD", "BTC"]);
        assert_eq!(swept.end_amount, dec!(1036.88311896));
    }

    #[tokio::test]
    async fn work_beyond_the_batch_limit_is_coalesced_per_exchange() {
        let opportunities = EventBus::new("opportunities", 64);
        let mut sub = opportunities.subscribe();
        let mut worker = Worker {
            books: HashMap::new(),
            catalog: PathCatalog::standard(),
            evaluator: Arc::new(PathEvaluator::new(TriangularConfig {
                max_pending_batches: 1,
                ..Default::default()
            })),
            clock: Arc::new(ManualClock::new(Utc::now())),
            opportunities,
            batches: JoinSet::new(),
            deferred: HashMap::new(),
            flush_waiters: Vec::new(),
        };

        worker.ingest(quote("kraken", "BTC-USD", dec!(49990), dec!(50000)));
        worker.ingest(quote("kraken", "ETH-USD", dec!(2600), dec!(2601)));
        worker.ingest(quote("kraken", "BTC-ETH", dec!(20), dec!(20.01)));
        assert_eq!(worker.batches.len(), 1);
        assert_eq!(worker.deferred.len(), 1);

        while let Some(joined) = worker.batches.join_next().await {
            joined.unwrap();
            worker.batch_finished();
            assert!(worker.batches.len() <= 1);
        }
        assert!(worker.deferred.is_empty());

        let opportunity = sub.recv().await.unwrap();
        assert_eq!(opportunity.path, ["BTC", "ETH", "USD", "BTC"]);
        assert!(nothing_more(&mut sub).await);
    }
}
