//! Core domain types shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of a candidate trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// A single open position, keyed by (strategy_id, symbol)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub notional_value: f64,
    pub entry_time: DateTime<Utc>,
}

/// Point-in-time view of the portfolio, produced by the external ledger.
///
/// Read-only to the engine: risk checks query it, nothing mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Total portfolio value in account currency
    pub total_value: f64,

    /// Total notional exposure across all open positions
    pub total_exposure: f64,

    /// Current drawdown from the equity peak, as a fraction (0.0 to 1.0)
    pub current_drawdown: f64,

    /// Realized + unrealized PnL for the current trading day
    pub daily_pnl: f64,

    /// Open positions, in the ledger's stable order
    pub positions: Vec<Position>,

    /// When the ledger produced this snapshot
    pub as_of: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// Empty snapshot with no value and no positions
    pub fn empty() -> Self {
        Self {
            total_value: 0.0,
            total_exposure: 0.0,
            current_drawdown: 0.0,
            daily_pnl: 0.0,
            positions: Vec::new(),
            as_of: Utc::now(),
        }
    }

    /// Aggregate notional exposure to a single symbol, across strategies
    pub fn symbol_exposure(&self, symbol: &str) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.notional_value)
            .sum()
    }

    /// Aggregate notional exposure of a single strategy, across symbols
    pub fn strategy_exposure(&self, strategy_id: &str) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.strategy_id == strategy_id)
            .map(|p| p.notional_value)
            .sum()
    }

    /// Distinct symbols currently held, in position order
    pub fn held_symbols(&self) -> Vec<String> {
        let mut symbols = Vec::new();
        for position in &self.positions {
            if !symbols.iter().any(|s| s == &position.symbol) {
                symbols.push(position.symbol.clone());
            }
        }
        symbols
    }
}

/// Live market statistics for one symbol, from the market data service
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketStats {
    /// Trailing 24h traded volume in account currency
    pub volume_24h: f64,

    /// Bid/ask spread as a fraction of mid price
    pub spread: f64,

    /// 24h price change as a signed fraction
    pub price_change_24h: f64,
}

/// A candidate trade submitted for risk evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
}

impl TradeOrder {
    /// Notional value of the trade at the requested size
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}
