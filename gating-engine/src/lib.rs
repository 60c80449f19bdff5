//! Trade Risk & Model-Quality Gating Engine
//!
//! For every candidate trade this engine answers, in real time, "is this
//! trade allowed, and if so at what size?" by combining portfolio risk
//! limits, per-symbol statistics, and the live quality state of the model
//! that produced the signal. See the member crates for the pieces:
//! `risk-gating` (checkers + evaluator), `model-quality` (tracker, drift,
//! retraining, A/B tests), `common` (shared types and collaborator
//! traits).

mod engine;

pub use engine::{EngineConfig, EvaluationOptions, GatingEngine, RiskStatus};

// Re-export the surface collaborators actually use, so depending on this
// crate alone is enough for most integrations.
pub use common::{
    EngineError, InMemoryMarketData, InMemoryPortfolio, MarketDataProvider, MarketStats,
    OrderSide, PortfolioProvider, PortfolioSnapshot, Position, TradeOrder,
};
pub use model_quality::{
    AbTest, AbTestConfig, AbTestStatus, DriftConfig, DriftMetrics, DriftSeverity,
    PerformanceReport, Registration, RetrainingRequest, RetrainingTrigger, TrackerConfig,
};
pub use risk_gating::{
    AuditRecord, RiskAssessment, RiskConfig, RiskConfigPatch, SYSTEM_ERROR_BLOCKER,
};
