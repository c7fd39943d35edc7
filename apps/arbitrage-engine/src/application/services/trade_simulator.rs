//! Trade Simulator Service
//!
//! Background consumer of the spreads topic that paper-trades every
//! profitable event. Cancellation is only observed between events.
//!
//! Spread events are drained ahead of queries, so a query issued after an
//! event was published sees its effect.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::simulation::{SimulatedTrade, SimulationStats, TradeSimulator};
use crate::domain::spread::SpreadEvent;
use crate::error::ServiceError;
use crate::infrastructure::broadcast::Subscription;
use crate::infrastructure::metrics::{self, TradeOutcome};

const SERVICE: &str = "trade_simulator";

#[derive(Debug)]
enum Command {
    Statistics {
        reply: oneshot::Sender<SimulationStats>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the trade simulator worker.
#[derive(Debug, Clone)]
pub struct TradeSimulatorService {
    tx: mpsc::Sender<Command>,
}

impl TradeSimulatorService {
    /// Spawn the worker consuming `spreads`.
    #[must_use]
    pub fn spawn(
        simulator: TradeSimulator,
        spreads: Subscription<SpreadEvent>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(simulator, spreads, rx, cancel));
        (Self { tx }, handle)
    }

    /// Snapshot of the simulation results.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn statistics(&self) -> Result<SimulationStats, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Statistics { reply })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }

    /// Restore the initial balance and clear the counters.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the worker is gone.
    pub async fn reset(&self) -> Result<(), ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reset { reply })
            .await
            .map_err(|_| ServiceError::stopped(SERVICE))?;
        rx.await.map_err(|_| ServiceError::stopped(SERVICE))
    }
}

async fn run(
    mut simulator: TradeSimulator,
    mut spreads: Subscription<SpreadEvent>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    tracing::info!(
        initial_balance = %simulator.config().initial_balance,
        allocation = %simulator.config().trade_allocation_percentage,
        "Trade simulator started"
    );
    let mut spreads_open = true;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = spreads.recv(), if spreads_open => match event {
                Some(event) => {
                    if let Some(trade) = simulator.simulate_trade(&event) {
                        record(&trade);
                    }
                }
                None => {
                    tracing::debug!("Spreads topic closed");
                    spreads_open = false;
                }
            },
            command = rx.recv() => match command {
                Some(Command::Statistics { reply }) => {
                    let _ = reply.send(simulator.statistics());
                }
                Some(Command::Reset { reply }) => {
                    simulator.reset();
                    tracing::info!("Trade simulator reset");
                    let _ = reply.send(());
                }
                None => break,
            },
        }
    }

    let stats = simulator.statistics();
    tracing::info!(
        trades = stats.total_trades,
        profit = %stats.total_profit,
        balance = %stats.current_balance,
        "Trade simulator stopped"
    );
}

fn record(trade: &SimulatedTrade) {
    let outcome = if trade.profit > Decimal::ZERO {
        TradeOutcome::Win
    } else {
        TradeOutcome::Loss
    };
    metrics::record_simulated_trade(outcome, trade.balance_after.to_f64().unwrap_or_default());
    tracing::info!(
        symbol = %trade.symbol,
        buy = %trade.buy_exchange,
        sell = %trade.sell_exchange,
        amount = %trade.trade_amount,
        profit = %trade.profit,
        balance = %trade.balance_after,
        "Simulated trade"
    );
}
