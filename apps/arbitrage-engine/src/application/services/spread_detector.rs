//! Spread Detector Service
//!
//! Owns the [`SpreadBook`] and publishes every computed [`SpreadEvent`] to the
//! spreads topic, profitable or not.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::market_data::NormalizedQuote;
use crate::domain::spread::{SpreadBook, SpreadEvent};
use crate::error::ServiceError;
use crate::infrastructure::broadcast::{EventBus, Subscription};
use crate::infrastructure::metrics;

const SERVICE: &str = "spread_detector";

#[derive(Debug)]
enum Command {
    Ingest {
        quote: NormalizedQuote,
        reply: oneshot::Sender<Option<SpreadEvent>>,
    },
    ExchangeCount {
        symbol: String,
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the spread detector worker.
#[derive(Debug, Clone)]
pub struct SpreadDetectorService {
    tx: mpsc::Sender<Command>,
    spreads: EventBus<SpreadEvent>,
}

impl SpreadDetectorService {
    /// Spawn the worker publishing to `spreads`.
    #[must_use]
    pub fn spawn(
        book: SpreadBook,
        spreads: EventBus<SpreadEvent>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(book, spreads.clone(), rx, cancel));
        (Self { tx, spreads }, handle)
    }

    /// Record a quote and return the spread it produced, if any.
    ///
    /// The event has already been published when this returns.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn ingest(&self, quote: NormalizedQuote) -> Result<Option<SpreadEvent>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Ingest { quote, reply })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }

    /// Number of exchanges with a quote for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn exchange_count(&self, symbol: impl Into<String>) -> Result<usize, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ExchangeCount {
                symbol: symbol.into(),
                reply,
            })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }

    /// Subscribe to spread events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<SpreadEvent> {
        self.spreads.subscribe()
    }
}

async fn run(
    mut book: SpreadBook,
    spreads: EventBus<SpreadEvent>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    tracing::info!(
        threshold = %book.config().min_spread_threshold,
        max_latency_ms = book.config().max_latency_ms,
        "Spread detector started"
    );
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(Command::Ingest { quote, reply }) => {
                    let event = book.ingest(quote);
                    if let Some(event) = &event {
                        publish(&spreads, event.clone());
                    }
                    let _ = reply.send(event);
                }
                Some(Command::ExchangeCount { symbol, reply }) => {
                    let _ = reply.send(book.exchange_count(&symbol));
                }
                None => break,
            },
        }
    }
    tracing::info!(symbols = book.symbol_count(), "Spread detector stopped");
}

fn publish(spreads: &EventBus<SpreadEvent>, event: SpreadEvent) {
    metrics::record_spread(&event.symbol, event.is_profitable);
    if event.is_profitable {
        tracing::info!(
            symbol = %event.symbol,
            buy = %event.buy_exchange,
            sell = %event.sell_exchange,
            spread = %event.spread_percentage,
            latency_ms = event.latency_ms,
            "Profitable spread"
        );
    } else {
        tracing::debug!(
            symbol = %event.symbol,
            spread = %event.spread_percentage,
            "Spread computed"
        );
    }
    let _ = spreads.publish(event);
}
