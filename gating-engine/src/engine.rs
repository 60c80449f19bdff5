//! The gating engine
//!
//! One engine instance owns one of each subsystem: the risk evaluator, the
//! performance tracker, the drift detector, the retraining scheduler, and
//! the A/B coordinator. Nothing is global; constructing a second engine
//! yields a fully isolated instance.

use common::{EngineError, MarketDataProvider, PortfolioProvider, TradeOrder, Uuid};
use model_quality::{
    AbTest, AbTestConfig, AbTestCoordinator, DriftConfig, DriftDetector, DriftMetrics,
    DriftSeverity, PerformanceReport, PerformanceTracker, Registration, RetrainingRequest,
    RetrainingScheduler, RetrainingTrigger, TrackerConfig,
};
use risk_gating::{
    AuditRecord, PartialAssessment, RiskAssessment, RiskConfig, RiskConfigPatch, RiskEvaluator,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration for a whole engine instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub drift: DriftConfig,
}

/// Per-call options for trade evaluation
#[derive(Debug, Clone, Default)]
pub struct EvaluationOptions {
    /// Model that produced the signal; links model quality into gating
    pub model_id: Option<String>,

    /// Explicit confidence; when absent the tracker's rolling average for
    /// `model_id` is used
    pub model_confidence: Option<f64>,

    /// Caller deadline for the whole evaluation
    pub deadline: Option<Duration>,
}

/// Operational introspection snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStatus {
    pub breaker_tripped: bool,
    pub config: RiskConfig,
    pub tracked_symbols: usize,
    pub evaluations: usize,
    pub registered_models: usize,
    pub archived_models: usize,
    pub pending_retraining: usize,
    pub running_ab_tests: usize,
}

/// Decision core combining risk gating with model-quality monitoring
pub struct GatingEngine {
    evaluator: Arc<RiskEvaluator>,
    tracker: Arc<PerformanceTracker>,
    drift: Arc<DriftDetector>,
    retraining: Arc<RetrainingScheduler>,
    ab_tests: AbTestCoordinator,
}

impl GatingEngine {
    pub fn new(
        config: EngineConfig,
        portfolio: Arc<dyn PortfolioProvider>,
        market_data: Arc<dyn MarketDataProvider>,
    ) -> Self {
        let retraining = Arc::new(RetrainingScheduler::new());
        let tracker = Arc::new(PerformanceTracker::new(config.tracker, retraining.clone()));
        let drift = Arc::new(DriftDetector::new(
            config.drift,
            tracker.clone(),
            retraining.clone(),
        ));
        let evaluator = Arc::new(RiskEvaluator::new(config.risk, portfolio, market_data));

        Self {
            evaluator,
            tracker,
            drift,
            retraining,
            ab_tests: AbTestCoordinator::new(),
        }
    }

    // ----- trade gating -----

    /// Evaluate one candidate trade. Infallible: internal faults yield a
    /// blocked assessment, never an error.
    pub async fn evaluate_trade(
        &self,
        order: &TradeOrder,
        options: EvaluationOptions,
    ) -> RiskAssessment {
        let mut confidence = options.model_confidence;
        let mut annotations = PartialAssessment::new();

        if let Some(model_id) = &options.model_id {
            if confidence.is_none() {
                if let Ok(report) = self.tracker.performance_report(model_id) {
                    if report.total_predictions > 0 {
                        confidence = Some(report.avg_confidence);
                    }
                }
            }

            // Model drift feeds gating as an advisory signal
            if let Some(metrics) = self.drift.latest(model_id) {
                if metrics.severity >= DriftSeverity::High {
                    annotations.warn(format!(
                        "Model {model_id} drift severity {} ({:.3})",
                        metrics.severity, metrics.overall_drift
                    ));
                }
            }
        }

        self.evaluator
            .evaluate_annotated(order, confidence, options.deadline, annotations)
            .await
    }

    /// Apply a partial risk configuration update
    pub fn update_risk_config(&self, patch: &RiskConfigPatch) -> RiskConfig {
        self.evaluator.update_config(patch)
    }

    /// Operational snapshot for dashboards and ops tooling
    pub fn risk_status(&self) -> RiskStatus {
        RiskStatus {
            breaker_tripped: self.evaluator.breaker_tripped(),
            config: self.evaluator.config(),
            tracked_symbols: self.evaluator.tracked_symbols(),
            evaluations: self.evaluator.audit_len(),
            registered_models: self.tracker.model_count(),
            archived_models: self.tracker.archived_count(),
            pending_retraining: self.retraining.len(),
            running_ab_tests: self.ab_tests.running_count(),
        }
    }

    /// Append-only log of every gating decision
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.evaluator.audit_records()
    }

    // ----- model performance -----

    pub fn register_model(&self, model_id: &str, metadata: serde_json::Value) -> Registration {
        self.tracker.register_model(model_id, metadata)
    }

    pub fn record_prediction(
        &self,
        model_id: &str,
        predicted: f64,
        confidence: f64,
        features: HashMap<String, f64>,
        feature_importance: Option<HashMap<String, f64>>,
    ) -> Result<Uuid, EngineError> {
        self.tracker
            .record_prediction(model_id, predicted, confidence, features, feature_importance)
    }

    pub fn update_outcome(&self, prediction_id: Uuid, actual: f64) -> Result<f64, EngineError> {
        self.tracker.update_outcome(prediction_id, actual)
    }

    pub fn performance_report(&self, model_id: &str) -> Result<PerformanceReport, EngineError> {
        self.tracker.performance_report(model_id)
    }

    pub fn archive_model(&self, model_id: &str) -> Result<(), EngineError> {
        self.tracker.archive_model(model_id)
    }

    // ----- drift -----

    /// Latest drift metrics, computed on demand when none are retained
    pub fn drift_report(&self, model_id: &str) -> Result<DriftMetrics, EngineError> {
        self.drift.report(model_id)
    }

    /// Force a fresh drift computation
    pub fn compute_drift(&self, model_id: &str) -> Result<DriftMetrics, EngineError> {
        self.drift.compute(model_id)
    }

    /// Spawn the periodic drift recomputation task; abort the handle to
    /// stop it
    pub fn spawn_drift_loop(&self) -> tokio::task::JoinHandle<()> {
        let detector = self.drift.clone();
        info!("background drift loop started");
        tokio::spawn(detector.run())
    }

    // ----- retraining -----

    /// Manually queue a model for retraining
    pub fn trigger_retraining(&self, model_id: &str, reason: &str) -> Result<bool, EngineError> {
        if !self.tracker.is_registered(model_id) {
            return Err(EngineError::ModelNotFound(model_id.to_string()));
        }
        Ok(self
            .retraining
            .enqueue(model_id, reason, RetrainingTrigger::Manual))
    }

    pub fn retraining_queue(&self) -> Vec<RetrainingRequest> {
        self.retraining.queue()
    }

    /// Scheduler handle for the external training pipeline
    pub fn retraining_scheduler(&self) -> &Arc<RetrainingScheduler> {
        &self.retraining
    }

    // ----- A/B testing -----

    pub fn start_ab_test(
        &self,
        model_a: &str,
        model_b: &str,
        config: AbTestConfig,
    ) -> Result<Uuid, EngineError> {
        if !self.tracker.is_registered(model_a) {
            return Err(EngineError::ModelNotFound(model_a.to_string()));
        }
        if !self.tracker.is_registered(model_b) {
            return Err(EngineError::ModelNotFound(model_b.to_string()));
        }
        self.ab_tests.start_test(model_a, model_b, config)
    }

    /// Route the next request to one of the two arms
    pub fn ab_assign(&self, test_id: Uuid) -> Result<String, EngineError> {
        self.ab_tests.assign(test_id)
    }

    pub fn record_ab_outcome(
        &self,
        test_id: Uuid,
        model_id: &str,
        accurate: bool,
    ) -> Result<(), EngineError> {
        self.ab_tests.record_outcome(test_id, model_id, accurate)
    }

    pub fn ab_test_results(&self, test_id: Uuid) -> Result<AbTest, EngineError> {
        self.ab_tests.results(test_id)
    }

    pub fn stop_ab_test(&self, test_id: Uuid) -> Result<AbTest, EngineError> {
        self.ab_tests.stop_test(test_id)
    }

    // ----- subsystem handles -----

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn drift_detector(&self) -> &Arc<DriftDetector> {
        &self.drift
    }
}
