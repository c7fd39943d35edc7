//! Paper Trading
//!
//! Fee-aware simulation of buying on one exchange and selling on another for
//! every profitable spread. Balances are plain decimals; nothing is routed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::spread::SpreadEvent;

/// Simulator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Starting paper balance in USD.
    pub initial_balance: Decimal,
    /// Fee charged on each side of a trade (0.001 = 0.1%).
    pub fee_percentage_per_trade: Decimal,
    /// Fraction of the current balance committed per trade.
    pub trade_allocation_percentage: Decimal,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_percentage_per_trade: dec!(0.001),
            trade_allocation_percentage: dec!(0.10),
        }
    }
}

/// Record of one simulated round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    /// Pair symbol.
    pub symbol: String,
    /// Exchange bought on.
    pub buy_exchange: String,
    /// Exchange sold on.
    pub sell_exchange: String,
    /// USD committed.
    pub trade_amount: Decimal,
    /// Base units acquired after the buy fee.
    pub quantity: Decimal,
    /// USD returned after the sell fee.
    pub net_proceeds: Decimal,
    /// `net_proceeds - trade_amount`.
    pub profit: Decimal,
    /// Balance after settlement.
    pub balance_after: Decimal,
    /// Wall-clock time of the simulation.
    pub executed_at: DateTime<Utc>,
}

/// Snapshot of accumulated results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Trades simulated.
    pub total_trades: u64,
    /// Trades with positive profit.
    pub successful_trades: u64,
    /// Sum of profits (may be negative).
    pub total_profit: Decimal,
    /// Current paper balance.
    pub current_balance: Decimal,
    /// `successful_trades / total_trades`, zero before the first trade.
    pub success_rate: f64,
}

/// Priced round trip, before it is booked.
#[derive(Debug, Default)]
struct Fill {
    trade_amount: Decimal,
    quantity: Decimal,
    net_proceeds: Decimal,
    profit: Decimal,
    balance_after: Decimal,
}

/// Paper-trading ledger.
#[derive(Debug)]
pub struct TradeSimulator {
    config: SimulationConfig,
    balance: Decimal,
    total_trades: u64,
    successful_trades: u64,
    total_profit: Decimal,
}

impl TradeSimulator {
    /// Create a simulator holding the initial balance.
    #[must_use]
    pub const fn new(config: SimulationConfig) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            balance,
            total_trades: 0,
            successful_trades: 0,
            total_profit: Decimal::ZERO,
        }
    }

    /// Parameters in use.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulate a trade for a profitable spread.
    ///
    /// Unprofitable events leave the ledger untouched and return `None`.
    /// Every profitable event counts as one trade; when no round trip can be
    /// priced (exhausted balance, non-positive prices, overflow) it settles
    /// as a zero-profit trade.
    pub fn simulate_trade(&mut self, event: &SpreadEvent) -> Option<SimulatedTrade> {
        if !event.is_profitable {
            return None;
        }

        let fill = self.round_trip(event).unwrap_or(Fill {
            balance_after: self.balance,
            ..Fill::default()
        });

        self.balance = fill.balance_after;
        self.total_profit += fill.profit;
        self.total_trades += 1;
        if fill.profit > Decimal::ZERO {
            self.successful_trades += 1;
        }

        Some(SimulatedTrade {
            symbol: event.symbol.clone(),
            buy_exchange: event.buy_exchange.clone(),
            sell_exchange: event.sell_exchange.clone(),
            trade_amount: fill.trade_amount,
            quantity: fill.quantity,
            net_proceeds: fill.net_proceeds,
            profit: fill.profit,
            balance_after: fill.balance_after,
            executed_at: Utc::now(),
        })
    }

    fn round_trip(&self, event: &SpreadEvent) -> Option<Fill> {
        if event.buy_price <= Decimal::ZERO || event.sell_price <= Decimal::ZERO {
            return None;
        }

        let fee = self.config.fee_percentage_per_trade;
        let trade_amount = self
            .balance
            .checked_mul(self.config.trade_allocation_percentage)?;
        if trade_amount <= Decimal::ZERO {
            return None;
        }

        let after_buy_fee = trade_amount.checked_sub(trade_amount.checked_mul(fee)?)?;
        let quantity = after_buy_fee.checked_div(event.buy_price)?;
        let gross = quantity.checked_mul(event.sell_price)?;
        let net_proceeds = gross.checked_sub(gross.checked_mul(fee)?)?;
        let profit = net_proceeds.checked_sub(trade_amount)?;

        Some(Fill {
            trade_amount,
            quantity,
            net_proceeds,
            profit,
            balance_after: self.balance.checked_add(profit)?,
        })
    }

    /// Current results.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> SimulationStats {
        let success_rate = if self.total_trades == 0 {
            0.0
        } else {
            self.successful_trades as f64 / self.total_trades as f64
        };
        SimulationStats {
            total_trades: self.total_trades,
            successful_trades: self.successful_trades,
            total_profit: self.total_profit,
            current_balance: self.balance,
            success_rate,
        }
    }

    /// Restore the initial balance and clear all counters.
    pub fn reset(&mut self) {
        self.balance = self.config.initial_balance;
        self.total_trades = 0;
        self.successful_trades = 0;
        self.total_profit = Decimal::ZERO;
    }
}
