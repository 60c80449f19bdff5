//! Trade risk checkers
//!
//! Each checker inspects one dimension of a candidate trade and returns a
//! `PartialAssessment`. The evaluator runs them in a fixed order; a checker
//! never sees another checker's findings.

use crate::assessment::PartialAssessment;
use crate::config::RiskConfig;
use crate::stats::{pearson, volatility};
use chrono::{NaiveDate, Utc};
use common::{EngineError, MarketStats, OrderSide, PortfolioSnapshot, TradeOrder};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Everything a checker may look at for one evaluation.
///
/// The evaluator gathers all inputs up front (with timeouts and fallbacks)
/// so checkers stay synchronous and free of I/O.
pub struct CheckContext<'a> {
    pub order: &'a TradeOrder,
    pub portfolio: &'a PortfolioSnapshot,

    /// Live market stats, absent when the upstream lookup failed
    pub market: Option<&'a MarketStats>,

    /// Recent closes for the traded symbol, oldest first (may be empty)
    pub candidate_closes: &'a [f64],

    /// Recent closes for currently held symbols
    pub held_closes: &'a HashMap<String, Vec<f64>>,

    /// Confidence of the model that proposed the trade, if known
    pub model_confidence: Option<f64>,
}

impl CheckContext<'_> {
    /// Exposure the trade would add (buys add, sells reduce)
    fn signed_notional(&self) -> f64 {
        match self.order.side {
            OrderSide::Buy => self.order.notional(),
            OrderSide::Sell => -self.order.notional(),
        }
    }
}

/// A single risk dimension evaluated against a candidate trade
pub trait RiskChecker: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError>;
}

/// Per-trade notional ceiling plus symbol- and strategy-level exposure limits
pub struct PositionLimiter;

impl RiskChecker for PositionLimiter {
    fn name(&self) -> &'static str {
        "position_limits"
    }

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError> {
        let mut partial = PartialAssessment::new();
        let limits = &config.limits;
        let order = ctx.order;
        let notional = order.notional();

        if notional > limits.max_trade_notional {
            let capped = limits.max_trade_notional / order.price;
            partial.warn(format!(
                "Position size {notional:.2} exceeds limit {:.2}",
                limits.max_trade_notional
            ));
            partial.adjust(capped);
            partial.recommend(format!(
                "Cap quantity at {capped:.6} to stay within the per-trade notional ceiling"
            ));
        }

        let total_value = ctx.portfolio.total_value;
        if total_value > 0.0 {
            let signed = ctx.signed_notional();

            let symbol_exposure = ctx.portfolio.symbol_exposure(&order.symbol) + signed;
            let symbol_limit = limits.max_symbol_exposure_pct * total_value;
            if symbol_exposure > symbol_limit {
                partial.warn(format!(
                    "Symbol {} exposure {symbol_exposure:.2} would exceed {:.0}% of portfolio value",
                    order.symbol,
                    limits.max_symbol_exposure_pct * 100.0
                ));
            }

            let strategy_exposure = ctx.portfolio.strategy_exposure(&order.strategy_id) + signed;
            let strategy_limit = limits.max_strategy_exposure_pct * total_value;
            if strategy_exposure > strategy_limit {
                partial.block(format!(
                    "Strategy {} exposure {strategy_exposure:.2} would exceed {:.0}% of portfolio value",
                    order.strategy_id,
                    limits.max_strategy_exposure_pct * 100.0
                ));
            }
        }

        Ok(partial)
    }
}

/// Correlation of the candidate symbol against existing holdings
pub struct CorrelationChecker;

impl RiskChecker for CorrelationChecker {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError> {
        let mut partial = PartialAssessment::new();
        let cfg = &config.correlation;

        if ctx.candidate_closes.is_empty() || ctx.portfolio.positions.is_empty() {
            return Ok(partial);
        }

        // Correlation per distinct held symbol, computed once
        let mut rho_by_symbol: HashMap<&str, f64> = HashMap::new();
        for (symbol, closes) in ctx.held_closes {
            if symbol == &ctx.order.symbol {
                continue;
            }
            if let Some(rho) = pearson(ctx.candidate_closes, closes, cfg.min_overlap) {
                rho_by_symbol.insert(symbol.as_str(), rho);
            }
        }

        // Correlated exposure scales each holding by |rho|; the candidate
        // trade itself counts in full.
        let mut correlated_exposure = ctx.order.notional();
        let mut warned: Vec<&str> = Vec::new();

        for position in &ctx.portfolio.positions {
            let Some(&rho) = rho_by_symbol.get(position.symbol.as_str()) else {
                continue;
            };
            if rho.abs() < cfg.threshold {
                continue;
            }

            correlated_exposure += rho.abs() * position.notional_value;
            if !warned.contains(&position.symbol.as_str()) {
                warned.push(position.symbol.as_str());
                partial.warn(format!(
                    "High correlation {rho:.2} between {} and held {}",
                    ctx.order.symbol, position.symbol
                ));
            }
        }

        if !warned.is_empty() {
            let limit = cfg.max_correlated_exposure_pct * ctx.portfolio.total_value;
            if ctx.portfolio.total_value > 0.0 && correlated_exposure > limit {
                partial.block(format!(
                    "Correlated exposure {correlated_exposure:.2} exceeds limit {limit:.2}"
                ));
            } else {
                partial.recommend(
                    "Consider reducing size given correlated holdings".to_string(),
                );
            }
        }

        Ok(partial)
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    drawdown_tripped: bool,
    daily_loss_tripped_on: Option<NaiveDate>,
}

/// Drawdown and daily-loss circuit breaker.
///
/// Latches once tripped: the drawdown side re-arms only when drawdown
/// recovers below the reset threshold, the daily-loss side only at the
/// next UTC trading day.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether either side of the breaker is currently latched
    pub fn is_tripped(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.drawdown_tripped || state.daily_loss_tripped_on.is_some()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskChecker for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError> {
        let mut partial = PartialAssessment::new();
        let cfg = &config.circuit_breaker;
        let portfolio = ctx.portfolio;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // Drawdown side
        if portfolio.current_drawdown >= cfg.max_drawdown {
            if !state.drawdown_tripped {
                info!(
                    drawdown = portfolio.current_drawdown,
                    limit = cfg.max_drawdown,
                    "drawdown circuit breaker tripped"
                );
            }
            state.drawdown_tripped = true;
        } else if state.drawdown_tripped && portfolio.current_drawdown < cfg.drawdown_reset {
            state.drawdown_tripped = false;
            info!(
                drawdown = portfolio.current_drawdown,
                reset = cfg.drawdown_reset,
                "drawdown circuit breaker re-armed"
            );
        }

        if state.drawdown_tripped {
            if portfolio.current_drawdown >= cfg.max_drawdown {
                partial.block(format!(
                    "Drawdown limit exceeded: {:.1}% >= {:.1}%",
                    portfolio.current_drawdown * 100.0,
                    cfg.max_drawdown * 100.0
                ));
            } else {
                partial.block(format!(
                    "Drawdown limit exceeded: trading halted until drawdown falls below {:.1}%",
                    cfg.drawdown_reset * 100.0
                ));
            }
        }

        // Daily-loss side, re-armed at the UTC day boundary
        let today = Utc::now().date_naive();
        if let Some(tripped_on) = state.daily_loss_tripped_on {
            if tripped_on != today {
                state.daily_loss_tripped_on = None;
                info!("daily loss circuit breaker re-armed at day boundary");
            }
        }

        let loss_limit = cfg.daily_loss_pct * portfolio.total_value;
        if loss_limit > 0.0 && portfolio.daily_pnl <= -loss_limit {
            if state.daily_loss_tripped_on.is_none() {
                info!(
                    daily_pnl = portfolio.daily_pnl,
                    limit = loss_limit,
                    "daily loss circuit breaker tripped"
                );
            }
            state.daily_loss_tripped_on = Some(today);
        }

        if state.daily_loss_tripped_on.is_some() {
            partial.block(format!(
                "Daily loss limit exceeded: {:.2} breaches -{loss_limit:.2}",
                portfolio.daily_pnl
            ));
        }

        Ok(partial)
    }
}

/// Volatility-aware size reduction; advisory only, never blocks
pub struct VolatilitySizer;

impl RiskChecker for VolatilitySizer {
    fn name(&self) -> &'static str {
        "volatility_sizing"
    }

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError> {
        let mut partial = PartialAssessment::new();
        let cfg = &config.volatility;

        let vol = volatility(ctx.candidate_closes).unwrap_or(cfg.fallback);
        debug!(symbol = %ctx.order.symbol, volatility = vol, "volatility estimate");

        if vol > cfg.high_threshold {
            let scaled = ctx.order.quantity * (cfg.high_threshold / vol);
            partial.warn(format!(
                "High volatility for {}: {vol:.4} per period",
                ctx.order.symbol
            ));
            partial.adjust(scaled);
            partial.recommend(format!(
                "Reduce size to ~{scaled:.6} while per-period volatility stays above {:.3}",
                cfg.high_threshold
            ));
        }

        Ok(partial)
    }
}

/// Market condition gate: liquidity, spread, 24h move, model confidence.
///
/// All findings are warnings; the caller stays free to proceed at reduced
/// size.
pub struct MarketConditionGate;

impl RiskChecker for MarketConditionGate {
    fn name(&self) -> &'static str {
        "market_conditions"
    }

    fn check(
        &self,
        ctx: &CheckContext<'_>,
        config: &RiskConfig,
    ) -> Result<PartialAssessment, EngineError> {
        let mut partial = PartialAssessment::new();
        let cfg = &config.market_gate;

        match ctx.market {
            Some(stats) => {
                if stats.volume_24h < cfg.min_volume_24h {
                    partial.warn(format!(
                        "Low 24h volume for {}: {:.0}",
                        ctx.order.symbol, stats.volume_24h
                    ));
                }
                if stats.spread > cfg.max_spread {
                    partial.warn(format!(
                        "Wide spread for {}: {:.3}%",
                        ctx.order.symbol,
                        stats.spread * 100.0
                    ));
                }
                if stats.price_change_24h.abs() > cfg.max_price_change_24h {
                    partial.warn(format!(
                        "High price volatility for {}: {:+.1}% over 24h",
                        ctx.order.symbol,
                        stats.price_change_24h * 100.0
                    ));
                }
            }
            None => {
                partial.warn(format!(
                    "Market stats unavailable for {}; condition checks skipped",
                    ctx.order.symbol
                ));
            }
        }

        if let Some(confidence) = ctx.model_confidence {
            if confidence < cfg.min_model_confidence {
                partial.warn(format!(
                    "Low ML model confidence: {confidence:.2} below floor {:.2}",
                    cfg.min_model_confidence
                ));
            }
        }

        Ok(partial)
    }
}
