//! Normalizer Service
//!
//! Runs the [`Normalizer`] on its own task. The task is the only owner of the
//! per-key monotonic state, so quotes for one (exchange, symbol) are ordered
//! by the sequence in which they reach the command queue.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::market_data::{NormalizedQuote, RawQuote};
use crate::domain::normalization::{FilterReason, Normalizer};
use crate::error::ServiceError;
use crate::infrastructure::metrics;

const SERVICE: &str = "normalizer";

#[derive(Debug)]
enum Command {
    Evaluate {
        raw: RawQuote,
        reply: oneshot::Sender<Result<NormalizedQuote, FilterReason>>,
    },
    TrackedKeys {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the normalizer worker.
#[derive(Debug, Clone)]
pub struct NormalizerService {
    tx: mpsc::Sender<Command>,
}

impl NormalizerService {
    /// Spawn the worker.
    #[must_use]
    pub fn spawn(
        normalizer: Normalizer,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(normalizer, rx, cancel));
        (Self { tx }, handle)
    }

    /// Normalize a raw quote; `Ok(None)` when it was filtered.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn normalize(&self, raw: RawQuote) -> Result<Option<NormalizedQuote>, ServiceError> {
        Ok(self.evaluate(raw).await?.ok())
    }

    /// Normalize a raw quote, reporting why it was filtered.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn evaluate(
        &self,
        raw: RawQuote,
    ) -> Result<Result<NormalizedQuote, FilterReason>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Evaluate { raw, reply })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }

    /// Number of (exchange, symbol) keys with assigned times.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn tracked_keys(&self) -> Result<usize, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::TrackedKeys { reply })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }
}

async fn run(mut normalizer: Normalizer, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
    tracing::info!("Normalizer started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(Command::Evaluate { raw, reply }) => {
                    let _ = reply.send(evaluate(&mut normalizer, &raw));
                }
                Some(Command::TrackedKeys { reply }) => {
                    let _ = reply.send(normalizer.tracked_keys());
                }
                None => break,
            },
        }
    }
    tracing::info!(keys = normalizer.tracked_keys(), "Normalizer stopped");
}

fn evaluate(normalizer: &mut Normalizer, raw: &RawQuote) -> Result<NormalizedQuote, FilterReason> {
    metrics::record_quote_received(&raw.exchange);
    let result = normalizer.evaluate(raw);
    match &result {
        Ok(quote) => metrics::record_quote_normalized(&quote.exchange),
        Err(reason) => {
            tracing::trace!(
                exchange = %raw.exchange,
                symbol = %raw.symbol,
                %reason,
                "Quote filtered"
            );
            metrics::record_quote_filtered(reason.as_str());
        }
    }
    result
}
