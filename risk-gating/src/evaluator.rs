//! Trade risk evaluation pipeline
//!
//! The evaluator gathers every input a checker may need (portfolio
//! snapshot, market stats, close histories), runs the fixed checker
//! sequence, and folds the partials into one assessment. It never returns
//! an error: any internal fault, upstream outage without a fallback, or
//! exceeded deadline degrades to a blocked assessment.

use crate::assessment::{AssessmentDraft, PartialAssessment, RiskAssessment};
use crate::audit::{AuditRecord, AuditTrail};
use crate::checks::{
    CheckContext, CircuitBreaker, CorrelationChecker, MarketConditionGate, PositionLimiter,
    RiskChecker, VolatilitySizer,
};
use crate::config::{RiskConfig, RiskConfigPatch};
use crate::stats::StatisticsStore;
use common::{EngineError, MarketDataProvider, PortfolioProvider, PortfolioSnapshot, TradeOrder};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Marker carried by every fail-closed blocker
pub const SYSTEM_ERROR_BLOCKER: &str = "Risk evaluation system error";

/// Orchestrates the ordered risk checks for candidate trades
pub struct RiskEvaluator {
    config: RwLock<RiskConfig>,
    portfolio: Arc<dyn PortfolioProvider>,
    market_data: Arc<dyn MarketDataProvider>,
    stats: StatisticsStore,
    breaker: Arc<CircuitBreaker>,
    checkers: Vec<Arc<dyn RiskChecker>>,
    cached_portfolio: RwLock<Option<PortfolioSnapshot>>,
    audit: AuditTrail,
}

impl RiskEvaluator {
    pub fn new(
        config: RiskConfig,
        portfolio: Arc<dyn PortfolioProvider>,
        market_data: Arc<dyn MarketDataProvider>,
    ) -> Self {
        let max_window = config.volatility.window.max(config.correlation.min_overlap + 1);
        let stats = StatisticsStore::new(market_data.clone(), max_window);
        let breaker = Arc::new(CircuitBreaker::new());

        // Fixed invocation order: limits/exposure, correlation, breaker,
        // volatility sizing, market conditions.
        let checkers: Vec<Arc<dyn RiskChecker>> = vec![
            Arc::new(PositionLimiter),
            Arc::new(CorrelationChecker),
            breaker.clone(),
            Arc::new(VolatilitySizer),
            Arc::new(MarketConditionGate),
        ];

        Self {
            config: RwLock::new(config),
            portfolio,
            market_data,
            stats,
            breaker,
            checkers,
            cached_portfolio: RwLock::new(None),
            audit: AuditTrail::new(),
        }
    }

    /// Evaluate a candidate trade.
    ///
    /// Never fails: faults become a blocked assessment carrying
    /// [`SYSTEM_ERROR_BLOCKER`]. A `deadline`, when given, bounds the whole
    /// evaluation; exceeding it takes the same fail-closed path.
    pub async fn evaluate(
        &self,
        order: &TradeOrder,
        model_confidence: Option<f64>,
        deadline: Option<Duration>,
    ) -> RiskAssessment {
        self.evaluate_annotated(order, model_confidence, deadline, PartialAssessment::new())
            .await
    }

    /// Evaluate with caller-supplied annotations merged ahead of all
    /// checker findings (used by the engine to surface model drift).
    pub async fn evaluate_annotated(
        &self,
        order: &TradeOrder,
        model_confidence: Option<f64>,
        deadline: Option<Duration>,
        annotations: PartialAssessment,
    ) -> RiskAssessment {
        let inner = self.evaluate_inner(order, model_confidence, annotations);
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, inner).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::SystemError(format!(
                    "evaluation deadline of {}ms exceeded",
                    limit.as_millis()
                ))),
            },
            None => inner.await,
        };

        let assessment = match result {
            Ok(assessment) => assessment,
            Err(err) => {
                error!(
                    strategy = %order.strategy_id,
                    symbol = %order.symbol,
                    error = %err,
                    "trade evaluation failed, rejecting fail-closed"
                );
                RiskAssessment::rejected(format!("{SYSTEM_ERROR_BLOCKER}: {err}"))
            }
        };

        self.audit.record(order, &assessment);
        assessment
    }

    async fn evaluate_inner(
        &self,
        order: &TradeOrder,
        model_confidence: Option<f64>,
        annotations: PartialAssessment,
    ) -> Result<RiskAssessment, EngineError> {
        validate_order(order)?;

        let config = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let fetch_timeout = Duration::from_millis(config.stats_timeout_ms);

        let mut ambient = annotations;

        // Portfolio snapshot, falling back to the last good one
        let portfolio = match self.portfolio.portfolio_snapshot().await {
            Ok(snapshot) => {
                *self
                    .cached_portfolio
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
                snapshot
            }
            Err(err) => {
                let cached = self
                    .cached_portfolio
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match cached {
                    Some(snapshot) => {
                        warn!(error = %err, as_of = %snapshot.as_of, "portfolio service unavailable, using cached snapshot");
                        ambient.warn(format!(
                            "Stale portfolio data: using snapshot from {}",
                            snapshot.as_of
                        ));
                        snapshot
                    }
                    None => return Err(err),
                }
            }
        };

        // Live market stats are optional; the gate warns when absent
        let market = match tokio::time::timeout(
            fetch_timeout,
            self.market_data.market_stats(&order.symbol),
        )
        .await
        {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(err)) => {
                debug!(symbol = %order.symbol, error = %err, "market stats unavailable");
                None
            }
            Err(_) => {
                debug!(symbol = %order.symbol, "market stats fetch timed out");
                None
            }
        };

        // Close history for the candidate symbol
        let periods = config.volatility.window.max(config.correlation.min_overlap + 1);
        let candidate_closes = match self.stats.closes(&order.symbol, periods, fetch_timeout).await
        {
            Ok(series) => {
                if series.stale {
                    ambient.warn(format!(
                        "Stale market data: using cached closes for {}",
                        order.symbol
                    ));
                }
                series.closes
            }
            Err(err) => {
                debug!(symbol = %order.symbol, error = %err, "no close history, volatility fallback in effect");
                ambient.warn(format!(
                    "No market history for {}: conservative volatility fallback in effect",
                    order.symbol
                ));
                Vec::new()
            }
        };

        // Close history for held symbols feeds the correlation checker;
        // missing series simply drop out of the analysis.
        let mut held_closes: HashMap<String, Vec<f64>> = HashMap::new();
        for symbol in portfolio.held_symbols() {
            if symbol == order.symbol {
                continue;
            }
            match self.stats.closes(&symbol, periods, fetch_timeout).await {
                Ok(series) => {
                    held_closes.insert(symbol, series.closes);
                }
                Err(err) => {
                    debug!(symbol = %symbol, error = %err, "skipping held symbol in correlation analysis");
                }
            }
        }

        let ctx = CheckContext {
            order,
            portfolio: &portfolio,
            market: market.as_ref(),
            candidate_closes: &candidate_closes,
            held_closes: &held_closes,
            model_confidence,
        };

        let mut draft = AssessmentDraft::new(order.quantity).merge(ambient);
        for checker in &self.checkers {
            let partial = checker.check(&ctx, &config)?;
            if !partial.is_clean() {
                debug!(
                    checker = checker.name(),
                    warnings = partial.warnings.len(),
                    blockers = partial.blockers.len(),
                    "checker findings"
                );
            }
            draft = draft.merge(partial);
        }

        Ok(draft.finalize())
    }

    /// Apply a partial configuration update, returning the new config
    pub fn update_config(&self, patch: &RiskConfigPatch) -> RiskConfig {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.apply(patch);
        info!(?patch, "risk configuration updated");
        config.clone()
    }

    /// Snapshot of the running configuration
    pub fn config(&self) -> RiskConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the circuit breaker is currently latched
    pub fn breaker_tripped(&self) -> bool {
        self.breaker.is_tripped()
    }

    /// Number of symbols with cached statistics
    pub fn tracked_symbols(&self) -> usize {
        self.stats.tracked_symbols()
    }

    /// Append-only decision log
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.records()
    }

    pub fn audit_len(&self) -> usize {
        self.audit.len()
    }
}

fn validate_order(order: &TradeOrder) -> Result<(), EngineError> {
    if order.strategy_id.is_empty() || order.symbol.is_empty() {
        return Err(EngineError::InvalidInput(
            "strategy id and symbol must be non-empty".to_string(),
        ));
    }
    if !order.quantity.is_finite() || order.quantity <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "quantity must be positive, got {}",
            order.quantity
        )));
    }
    if !order.price.is_finite() || order.price <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "price must be positive, got {}",
            order.price
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{InMemoryMarketData, InMemoryPortfolio, MarketStats, OrderSide};

    fn snapshot(total_value: f64, drawdown: f64, daily_pnl: f64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            total_value,
            total_exposure: 0.0,
            current_drawdown: drawdown,
            daily_pnl,
            positions: Vec::new(),
            as_of: chrono::Utc::now(),
        }
    }

    fn order(quantity: f64, price: f64) -> TradeOrder {
        TradeOrder {
            strategy_id: "momentum".to_string(),
            symbol: "BTC-USD".to_string(),
            side: OrderSide::Buy,
            quantity,
            price,
        }
    }

    fn evaluator(portfolio: PortfolioSnapshot) -> RiskEvaluator {
        RiskEvaluator::new(
            RiskConfig::default(),
            Arc::new(InMemoryPortfolio::new(portfolio)),
            Arc::new(InMemoryMarketData::new()),
        )
    }

    #[tokio::test]
    async fn test_clean_trade_is_approved_and_audited() {
        let eval = evaluator(snapshot(100_000.0, 0.02, -500.0));

        let assessment = eval.evaluate(&order(0.1, 50_000.0), None, None).await;

        assert!(assessment.approved);
        assert!(assessment.blockers.is_empty());
        assert_eq!(assessment.adjusted_quantity, 0.1);
        assert_eq!(eval.audit_len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_order_takes_fail_closed_path() {
        let eval = evaluator(snapshot(100_000.0, 0.0, 0.0));

        let assessment = eval.evaluate(&order(-1.0, 50_000.0), None, None).await;

        assert!(!assessment.approved);
        assert_eq!(assessment.risk_score, 1.0);
        assert!(assessment.blockers[0].contains(SYSTEM_ERROR_BLOCKER));
    }

    #[tokio::test]
    async fn test_portfolio_outage_without_cache_blocks() {
        struct DownPortfolio;
        #[async_trait::async_trait]
        impl PortfolioProvider for DownPortfolio {
            async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, EngineError> {
                Err(EngineError::UpstreamUnavailable("ledger down".to_string()))
            }
        }

        let eval = RiskEvaluator::new(
            RiskConfig::default(),
            Arc::new(DownPortfolio),
            Arc::new(InMemoryMarketData::new()),
        );

        let assessment = eval.evaluate(&order(0.1, 50_000.0), None, None).await;
        assert!(!assessment.approved);
        assert!(assessment.blockers[0].contains(SYSTEM_ERROR_BLOCKER));
    }

    #[tokio::test]
    async fn test_portfolio_outage_with_cache_degrades_to_warning() {
        struct FlakyPortfolio {
            snapshot: PortfolioSnapshot,
            fail: std::sync::atomic::AtomicBool,
        }
        #[async_trait::async_trait]
        impl PortfolioProvider for FlakyPortfolio {
            async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, EngineError> {
                if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                    Err(EngineError::UpstreamUnavailable("ledger down".to_string()))
                } else {
                    Ok(self.snapshot.clone())
                }
            }
        }

        let provider = Arc::new(FlakyPortfolio {
            snapshot: snapshot(100_000.0, 0.02, 0.0),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let eval = RiskEvaluator::new(
            RiskConfig::default(),
            provider.clone(),
            Arc::new(InMemoryMarketData::new()),
        );

        let first = eval.evaluate(&order(0.1, 50_000.0), None, None).await;
        assert!(first.approved);

        provider.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let degraded = eval.evaluate(&order(0.1, 50_000.0), None, None).await;
        assert!(degraded.approved);
        assert!(degraded
            .warnings
            .iter()
            .any(|w| w.contains("Stale portfolio data")));
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_fail_closed() {
        struct SlowPortfolio(PortfolioSnapshot);
        #[async_trait::async_trait]
        impl PortfolioProvider for SlowPortfolio {
            async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, EngineError> {
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(self.0.clone())
            }
        }

        let eval = RiskEvaluator::new(
            RiskConfig::default(),
            Arc::new(SlowPortfolio(snapshot(100_000.0, 0.0, 0.0))),
            Arc::new(InMemoryMarketData::new()),
        );

        let assessment = eval
            .evaluate(&order(0.1, 50_000.0), None, Some(Duration::from_millis(10)))
            .await;

        assert!(!assessment.approved);
        assert!(assessment.blockers[0].contains(SYSTEM_ERROR_BLOCKER));
        assert!(assessment.blockers[0].contains("deadline"));
    }

    #[tokio::test]
    async fn test_warning_order_is_deterministic() {
        let market_data = Arc::new(InMemoryMarketData::new());
        market_data
            .set_stats(
                "BTC-USD",
                MarketStats {
                    volume_24h: 100.0,
                    spread: 0.05,
                    price_change_24h: 0.0,
                },
            )
            .await;
        market_data
            .set_closes("BTC-USD", vec![100.0; 40])
            .await;

        let eval = RiskEvaluator::new(
            RiskConfig::default(),
            Arc::new(InMemoryPortfolio::new(snapshot(100_000.0, 0.0, 0.0))),
            market_data,
        );

        // Oversized trade: limiter warning first, then market gate warnings.
        let assessment = eval.evaluate(&order(1.0, 50_000.0), None, None).await;
        assert!(assessment.warnings.len() >= 3);
        assert!(assessment.warnings[0].contains("Position size"));
        assert!(assessment.warnings[1].contains("Symbol"));
        assert!(assessment.warnings[2].contains("Low 24h volume"));
        assert!(assessment.warnings[3].contains("Wide spread"));
        assert!(assessment.adjusted_quantity < 1.0);
    }

    #[tokio::test]
    async fn test_config_update_applies_immediately() {
        let eval = evaluator(snapshot(1_000_000.0, 0.0, 0.0));

        let patch = RiskConfigPatch {
            max_trade_notional: Some(1_000.0),
            ..Default::default()
        };
        let updated = eval.update_config(&patch);
        assert_eq!(updated.limits.max_trade_notional, 1_000.0);

        let assessment = eval.evaluate(&order(0.1, 50_000.0), None, None).await;
        assert!(assessment.approved);
        assert!(assessment.adjusted_quantity < 0.1);
    }
}
