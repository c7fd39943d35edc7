//! Ingestion Bridge
//!
//! Turns one (connector, symbol) pair into a stream of normalized quotes.
//! Three sub-tasks share a cancellation scope:
//!
//! - quotes: filter the raw feed by symbol, normalize, forward
//! - events: turn disconnects and failures into a terminal error
//! - subscribe: issue the one-shot subscription, failure is terminal
//!
//! The first terminal outcome ends the stream; dropping the stream cancels
//! all three. A raw feed that closes ends the stream without an error.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use super::normalizer::NormalizerService;
use crate::application::ports::ExchangeConnector;
use crate::domain::market_data::{
    ConnectionEvent, ConnectionStatus, NormalizedQuote, RawQuote, canonical_exchange,
    canonical_symbol,
};
use crate::error::IngestionError;
use crate::infrastructure::metrics;

/// Item yielded by a [`QuoteStream`].
pub type IngestionResult = Result<NormalizedQuote, IngestionError>;

/// Opens per-symbol quote streams feeding the shared normalizer.
#[derive(Debug, Clone)]
pub struct IngestionBridge {
    normalizer: NormalizerService,
    buffer: usize,
}

impl IngestionBridge {
    /// Create a bridge; `buffer` bounds each stream's undelivered quotes.
    #[must_use]
    pub fn new(normalizer: NormalizerService, buffer: usize) -> Self {
        Self {
            normalizer,
            buffer: buffer.max(1),
        }
    }

    /// Start streaming `symbol` from `connector`.
    ///
    /// Receivers are taken before the subscription call, so no quote published
    /// after it succeeds can be missed.
    #[must_use]
    pub fn open(&self, connector: Arc<dyn ExchangeConnector>, symbol: &str) -> QuoteStream {
        let exchange = canonical_exchange(&connector.exchange());
        let symbol = canonical_symbol(symbol);
        let scope = Scope {
            exchange: exchange.clone(),
            symbol: symbol.clone(),
        };

        let quotes = connector.raw_quotes();
        let events = connector.connection_events();
        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("ingestion", %exchange, %symbol);

        let mut tasks = JoinSet::new();
        tasks.spawn(
            forward_quotes(
                scope.clone(),
                quotes,
                self.normalizer.clone(),
                tx.clone(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );
        tasks.spawn(watch_events(scope.clone(), events, cancel.clone()).instrument(span.clone()));
        tasks.spawn(subscribe(scope.clone(), connector, cancel.clone()).instrument(span.clone()));

        tokio::spawn(drive(scope, tasks, tx, cancel.clone()).instrument(span));

        QuoteStream {
            rx,
            _guard: cancel.drop_guard(),
        }
    }
}

/// Stream of normalized quotes for one (exchange, symbol).
///
/// Yields at most one error, always as the last item.
#[derive(Debug)]
pub struct QuoteStream {
    rx: mpsc::Receiver<IngestionResult>,
    _guard: DropGuard,
}

impl Stream for QuoteStream {
    type Item = IngestionResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Sub-tasks
// =============================================================================

#[derive(Debug, Clone)]
struct Scope {
    exchange: String,
    symbol: String,
}

impl Scope {
    fn connection_failed(&self, reason: String) -> IngestionError {
        IngestionError::ConnectionFailed {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            reason,
        }
    }

    fn connection_lost(&self, reason: String) -> IngestionError {
        IngestionError::ConnectionLost {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            reason,
        }
    }
}

/// How a sub-task ended.
#[derive(Debug)]
enum SubTaskExit {
    /// Scope cancelled.
    Cancelled,
    /// Raw feed closed.
    SourceEnded,
    /// Subscription accepted.
    Subscribed,
    /// Event feed closed.
    EventsClosed,
    /// Stream consumer went away.
    OutputClosed,
    /// Terminal error.
    Failed(IngestionError),
}

async fn forward_quotes(
    scope: Scope,
    mut quotes: broadcast::Receiver<RawQuote>,
    normalizer: NormalizerService,
    tx: mpsc::Sender<IngestionResult>,
    cancel: CancellationToken,
) -> SubTaskExit {
    loop {
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return SubTaskExit::Cancelled,
            received = quotes.recv() => match received {
                Ok(raw) => raw,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Raw quote feed lagged");
                    metrics::record_dropped_events("raw_quotes", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return SubTaskExit::SourceEnded,
            },
        };

        if canonical_symbol(&raw.symbol) != scope.symbol {
            continue;
        }

        match normalizer.normalize(raw).await {
            Ok(Some(quote)) => {
                if tx.send(Ok(quote)).await.is_err() {
                    return SubTaskExit::OutputClosed;
                }
            }
            Ok(None) => {}
            Err(_) => {
                return SubTaskExit::Failed(IngestionError::PipelineUnavailable {
                    exchange: scope.exchange,
                    symbol: scope.symbol,
                });
            }
        }
    }
}

async fn watch_events(
    scope: Scope,
    mut events: broadcast::Receiver<ConnectionEvent>,
    cancel: CancellationToken,
) -> SubTaskExit {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return SubTaskExit::Cancelled,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Connection event feed lagged");
                    continue;
                }
                Err(RecvError::Closed) => return SubTaskExit::EventsClosed,
            },
        };

        match event {
            ConnectionEvent::Disconnected { reason } => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                return SubTaskExit::Failed(scope.connection_lost(reason));
            }
            ConnectionEvent::StatusChanged(ConnectionStatus::Failed(reason)) => {
                return SubTaskExit::Failed(scope.connection_failed(reason));
            }
            ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected) => {
                return SubTaskExit::Failed(scope.connection_lost("disconnected".to_string()));
            }
            ConnectionEvent::StatusChanged(status) => {
                tracing::debug!(?status, "Connection status changed");
            }
            ConnectionEvent::ReceivedHeartbeat => tracing::trace!("Heartbeat"),
        }
    }
}

async fn subscribe(
    scope: Scope,
    connector: Arc<dyn ExchangeConnector>,
    cancel: CancellationToken,
) -> SubTaskExit {
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return SubTaskExit::Cancelled,
        result = connector.subscribe(&scope.symbol) => result,
    };
    match result {
        Ok(()) => {
            tracing::debug!("Subscribed");
            SubTaskExit::Subscribed
        }
        Err(e) => SubTaskExit::Failed(IngestionError::SubscriptionFailed {
            exchange: scope.exchange,
            symbol: scope.symbol,
            reason: e.to_string(),
        }),
    }
}

/// Waits for the first terminal sub-task outcome, then tears the scope down.
///
/// The error, if any, is sent only after every sub-task has stopped, so it is
/// always the last item on the stream.
async fn drive(
    scope: Scope,
    mut tasks: JoinSet<SubTaskExit>,
    tx: mpsc::Sender<IngestionResult>,
    cancel: CancellationToken,
) {
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        let exit = joined.unwrap_or_else(|e| {
            SubTaskExit::Failed(scope.connection_failed(format!("ingestion task failed: {e}")))
        });
        match exit {
            SubTaskExit::Subscribed | SubTaskExit::EventsClosed => {}
            SubTaskExit::SourceEnded => {
                tracing::debug!("Raw quote feed ended");
                break;
            }
            SubTaskExit::Cancelled | SubTaskExit::OutputClosed => break,
            SubTaskExit::Failed(error) => {
                tracing::warn!(%error, "Ingestion stream failed");
                failure = Some(error);
                break;
            }
        }
    }
    cancel.cancel();
    tasks.shutdown().await;

    if let Some(error) = failure {
        let _ = tx.send(Err(error)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
