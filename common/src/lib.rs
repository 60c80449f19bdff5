//! Shared types for the trade gating engine
//!
//! This crate holds the domain types every subsystem speaks (portfolio
//! snapshots, trade orders, market statistics), the engine-wide error
//! taxonomy, and the narrow async interfaces through which the engine
//! consumes its external collaborators.

mod error;
mod providers;
mod types;

pub use error::EngineError;
pub use providers::{InMemoryMarketData, InMemoryPortfolio, MarketDataProvider, PortfolioProvider};
pub use types::{MarketStats, OrderSide, PortfolioSnapshot, Position, TradeOrder};

// Re-exported so downstream crates share one uuid/chrono surface
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
