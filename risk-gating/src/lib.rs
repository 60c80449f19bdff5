//! Trade risk gating
//!
//! This crate decides, per candidate trade, whether the trade may proceed
//! and at what size. A fixed, ordered set of checkers (position limits,
//! correlation, circuit breaker, volatility sizing, market conditions)
//! each contribute partial findings that a pure reducer folds into one
//! `RiskAssessment`. Internal faults never escape as errors: evaluation is
//! fail-closed.

mod assessment;
mod audit;
mod checks;
mod config;
mod evaluator;
mod stats;

pub use assessment::{AssessmentDraft, PartialAssessment, RiskAssessment};
pub use audit::{AuditRecord, AuditTrail};
pub use checks::{
    CheckContext, CircuitBreaker, CorrelationChecker, MarketConditionGate, PositionLimiter,
    RiskChecker, VolatilitySizer,
};
pub use config::{
    load_config, save_config, CircuitBreakerConfig, CorrelationConfig, MarketGateConfig,
    PositionLimits, RiskConfig, RiskConfigPatch, VolatilityConfig,
};
pub use evaluator::{RiskEvaluator, SYSTEM_ERROR_BLOCKER};
pub use stats::{log_returns, pearson, volatility, CloseSeries, StatisticsStore};
