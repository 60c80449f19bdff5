//! Rolling per-symbol statistics
//!
//! The statistics store caches recent closes per symbol so that trade
//! evaluation never has to block on the market data service for more than
//! a bounded timeout: a fetch that fails or times out falls back to the
//! cached series, marked stale.

use chrono::{DateTime, Utc};
use common::{EngineError, MarketDataProvider};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Symbols tracked concurrently before the least-recently-used is evicted
const SYMBOL_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct SymbolHistory {
    closes: Vec<f64>,
    refreshed_at: DateTime<Utc>,
}

/// A close series plus whether it came from a stale cache entry
#[derive(Debug, Clone)]
pub struct CloseSeries {
    pub closes: Vec<f64>,
    pub stale: bool,
}

/// Rolling close-price cache backed by the market data service
pub struct StatisticsStore {
    provider: Arc<dyn MarketDataProvider>,
    cache: Mutex<LruCache<String, SymbolHistory>>,
    max_window: usize,
}

impl StatisticsStore {
    pub fn new(provider: Arc<dyn MarketDataProvider>, max_window: usize) -> Self {
        let capacity =
            NonZeroUsize::new(SYMBOL_CACHE_CAPACITY).expect("cache capacity is non-zero");
        Self {
            provider,
            cache: Mutex::new(LruCache::new(capacity)),
            max_window,
        }
    }

    /// Fetch up to `periods` recent closes with a bounded timeout.
    ///
    /// On provider failure or timeout the last cached series is returned
    /// with `stale = true`; with no cache to fall back on the upstream
    /// error propagates.
    pub async fn closes(
        &self,
        symbol: &str,
        periods: usize,
        timeout: Duration,
    ) -> Result<CloseSeries, EngineError> {
        let fetch = self.provider.historical_closes(symbol, periods);
        let outcome = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::UpstreamUnavailable(format!(
                "close fetch for {symbol} exceeded {}ms",
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(closes) => {
                let mut cache = lock(&self.cache);
                cache.put(
                    symbol.to_string(),
                    SymbolHistory {
                        closes: closes.clone(),
                        refreshed_at: Utc::now(),
                    },
                );
                Ok(CloseSeries {
                    closes,
                    stale: false,
                })
            }
            Err(err) => {
                let mut cache = lock(&self.cache);
                match cache.get(symbol) {
                    Some(history) => {
                        debug!(
                            symbol,
                            refreshed_at = %history.refreshed_at,
                            error = %err,
                            "close fetch failed, serving cached series"
                        );
                        Ok(CloseSeries {
                            closes: history.closes.clone(),
                            stale: true,
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Push one observed close onto the rolling cache for a symbol
    pub fn record_close(&self, symbol: &str, close: f64) {
        let mut cache = lock(&self.cache);
        if cache.get(symbol).is_none() {
            cache.put(
                symbol.to_string(),
                SymbolHistory {
                    closes: Vec::new(),
                    refreshed_at: Utc::now(),
                },
            );
        }

        if let Some(history) = cache.get_mut(symbol) {
            history.closes.push(close);
            history.refreshed_at = Utc::now();
            if history.closes.len() > self.max_window {
                let excess = history.closes.len() - self.max_window;
                history.closes.drain(..excess);
            }
        }
    }

    /// Number of symbols currently cached
    pub fn tracked_symbols(&self) -> usize {
        lock(&self.cache).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Log returns of a close series, one per consecutive pair
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Per-period volatility: population standard deviation of log returns.
///
/// Needs at least two returns; shorter series yield `None` and callers
/// fall back to a conservative default.
pub fn volatility(closes: &[f64]) -> Option<f64> {
    let returns = log_returns(closes);
    if returns.len() < 2 {
        return None;
    }

    let mean: f64 = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance: f64 =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

    Some(variance.sqrt())
}

/// Pearson correlation between two close series, on aligned log returns.
///
/// The most recent `min(len_a, len_b)` returns of each series are aligned;
/// overlaps shorter than `min_overlap` yield `None`.
pub fn pearson(closes_a: &[f64], closes_b: &[f64], min_overlap: usize) -> Option<f64> {
    let returns_a = log_returns(closes_a);
    let returns_b = log_returns(closes_b);

    let n = returns_a.len().min(returns_b.len());
    if n < min_overlap {
        return None;
    }

    let a = &returns_a[returns_a.len() - n..];
    let b = &returns_b[returns_b.len() - n..];

    let mean_a: f64 = a.iter().sum::<f64>() / n as f64;
    let mean_b: f64 = b.iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;

    for i in 0..n {
        let diff_a = a[i] - mean_a;
        let diff_b = b[i] - mean_b;

        covariance += diff_a * diff_b;
        variance_a += diff_a * diff_a;
        variance_b += diff_b * diff_b;
    }

    let denominator = (variance_a * variance_b).sqrt();
    if denominator == 0.0 {
        return None;
    }

    Some(covariance / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InMemoryMarketData;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn trending(start: f64, step: f64, len: usize) -> Vec<f64> {
        (0..len).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_volatility_of_constant_series_is_zero() {
        let closes = vec![100.0; 20];
        assert_eq!(volatility(&closes), Some(0.0));
    }

    #[test]
    fn test_volatility_needs_history() {
        assert_eq!(volatility(&[]), None);
        assert_eq!(volatility(&[100.0, 101.0]), None);

        let vol = volatility(&[100.0, 105.0, 98.0, 110.0]).unwrap();
        assert!(vol > 0.0);
    }

    #[test]
    fn test_pearson_detects_comovement() {
        let a = trending(100.0, 1.0, 40);
        let b = trending(50.0, 0.5, 40);
        let inverse: Vec<f64> = a.iter().map(|v| 300.0 - v).collect();

        let rho = pearson(&a, &b, 30).unwrap();
        assert!(rho > 0.95, "expected strong positive correlation, got {rho}");

        let rho = pearson(&a, &inverse, 30).unwrap();
        assert!(rho < -0.95, "expected strong negative correlation, got {rho}");
    }

    #[test]
    fn test_pearson_requires_overlap() {
        let a = trending(100.0, 1.0, 10);
        let b = trending(50.0, 0.5, 10);
        assert_eq!(pearson(&a, &b, 30), None);
    }

    struct FlakyMarketData {
        inner: InMemoryMarketData,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for FlakyMarketData {
        async fn market_stats(&self, symbol: &str) -> Result<common::MarketStats, EngineError> {
            self.inner.market_stats(symbol).await
        }

        async fn historical_closes(
            &self,
            symbol: &str,
            periods: usize,
        ) -> Result<Vec<f64>, EngineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::UpstreamUnavailable("feed down".to_string()));
            }
            self.inner.historical_closes(symbol, periods).await
        }
    }

    #[tokio::test]
    async fn test_fetch_populates_cache_then_serves_stale() {
        let provider = Arc::new(FlakyMarketData {
            inner: InMemoryMarketData::new(),
            fail: AtomicBool::new(false),
        });
        provider
            .inner
            .set_closes("BTC-USD", trending(100.0, 1.0, 40))
            .await;

        let store = StatisticsStore::new(provider.clone(), 64);
        let timeout = Duration::from_millis(200);

        let fresh = store.closes("BTC-USD", 30, timeout).await.unwrap();
        assert!(!fresh.stale);
        assert_eq!(fresh.closes.len(), 30);

        // Feed goes down: the cached series keeps evaluation going, marked stale.
        provider.fail.store(true, Ordering::SeqCst);
        let stale = store.closes("BTC-USD", 30, timeout).await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.closes.len(), 30);

        // No cache entry for an unknown symbol means the error propagates.
        assert!(store.closes("ETH-USD", 30, timeout).await.is_err());
    }

    #[tokio::test]
    async fn test_record_close_rolls_window() {
        let provider = Arc::new(InMemoryMarketData::new());
        let store = StatisticsStore::new(provider, 5);

        for i in 0..10 {
            store.record_close("BTC-USD", 100.0 + i as f64);
        }

        // A failing fetch now serves the recorded cache.
        let series = store
            .closes("BTC-USD", 5, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(series.stale);
        assert_eq!(series.closes, vec![105.0, 106.0, 107.0, 108.0, 109.0]);
        assert_eq!(store.tracked_symbols(), 1);
    }
}
