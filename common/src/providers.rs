//! Collaborator interfaces consumed by the engine
//!
//! The portfolio ledger and market data service live outside this system.
//! The engine only ever talks to them through these traits; the in-memory
//! implementations below back the examples and integration tests.

use crate::error::EngineError;
use crate::types::{MarketStats, PortfolioSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Source of portfolio snapshots (external ledger)
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, EngineError>;
}

/// Source of live market statistics and price history
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn market_stats(&self, symbol: &str) -> Result<MarketStats, EngineError>;

    /// Most recent closes for a symbol, oldest first, at most `periods` long
    async fn historical_closes(
        &self,
        symbol: &str,
        periods: usize,
    ) -> Result<Vec<f64>, EngineError>;
}

/// In-memory portfolio source for tests and examples
pub struct InMemoryPortfolio {
    snapshot: RwLock<PortfolioSnapshot>,
}

impl InMemoryPortfolio {
    pub fn new(snapshot: PortfolioSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub async fn set(&self, snapshot: PortfolioSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl PortfolioProvider for InMemoryPortfolio {
    async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, EngineError> {
        Ok(self.snapshot.read().await.clone())
    }
}

/// In-memory market data source for tests and examples
#[derive(Default)]
pub struct InMemoryMarketData {
    stats: RwLock<HashMap<String, MarketStats>>,
    closes: RwLock<HashMap<String, Vec<f64>>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_stats(&self, symbol: &str, stats: MarketStats) {
        self.stats.write().await.insert(symbol.to_string(), stats);
    }

    pub async fn set_closes(&self, symbol: &str, closes: Vec<f64>) {
        self.closes.write().await.insert(symbol.to_string(), closes);
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn market_stats(&self, symbol: &str) -> Result<MarketStats, EngineError> {
        self.stats
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::UpstreamUnavailable(format!("no stats for {symbol}")))
    }

    async fn historical_closes(
        &self,
        symbol: &str,
        periods: usize,
    ) -> Result<Vec<f64>, EngineError> {
        let closes = self.closes.read().await;
        let series = closes
            .get(symbol)
            .ok_or_else(|| EngineError::UpstreamUnavailable(format!("no history for {symbol}")))?;

        let start = series.len().saturating_sub(periods);
        Ok(series[start..].to_vec())
    }
}
