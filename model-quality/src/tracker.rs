//! Model performance tracking
//!
//! One state record per registered model: lifetime counters plus a bounded
//! rolling window of recent predictions. Each model's state sits behind its
//! own lock so unrelated models never contend.

use crate::retraining::{RetrainingScheduler, RetrainingTrigger};
use chrono::{DateTime, Utc};
use common::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tracker thresholds and window sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Rolling window capacity per model
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Per-prediction closeness score above which a prediction is accurate
    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f64,

    /// Resolved window samples required before the retraining flag can fire
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            accuracy_threshold: default_accuracy_threshold(),
            min_samples: default_min_samples(),
        }
    }
}

fn default_window_capacity() -> usize {
    100
}

fn default_accuracy_threshold() -> f64 {
    0.7
}

fn default_min_samples() -> usize {
    20
}

/// Guards the accuracy denominator against near-zero actual values
const ACCURACY_EPSILON: f64 = 1e-8;

/// Outcome of a registration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Updated,
}

/// One recorded prediction and, once resolved, its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub model_id: String,
    pub predicted: f64,
    pub confidence: f64,
    pub features: HashMap<String, f64>,
    pub feature_importance: Option<HashMap<String, f64>>,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Closeness score in [0, 1], set when the outcome arrives
    pub accuracy: Option<f64>,
    /// Whether the score cleared the accuracy threshold
    pub accurate: Option<bool>,
}

/// Mutable per-model state; never deleted, archived on retirement
#[derive(Debug)]
struct ModelState {
    model_id: String,
    metadata: serde_json::Value,
    registered_at: DateTime<Utc>,
    archived: bool,
    total_predictions: u64,
    resolved_predictions: u64,
    accurate_predictions: u64,
    window: VecDeque<PredictionRecord>,
    current_accuracy: f64,
    avg_confidence: f64,
}

impl ModelState {
    fn new(model_id: &str, metadata: serde_json::Value) -> Self {
        Self {
            model_id: model_id.to_string(),
            metadata,
            registered_at: Utc::now(),
            archived: false,
            total_predictions: 0,
            resolved_predictions: 0,
            accurate_predictions: 0,
            window: VecDeque::new(),
            current_accuracy: 0.0,
            avg_confidence: 0.0,
        }
    }

    /// Recompute window aggregates after any window mutation
    fn refresh_aggregates(&mut self, threshold: f64) {
        let resolved: Vec<&PredictionRecord> =
            self.window.iter().filter(|r| r.outcome.is_some()).collect();

        self.current_accuracy = if resolved.is_empty() {
            0.0
        } else {
            let accurate = resolved
                .iter()
                .filter(|r| r.accuracy.map_or(false, |a| a > threshold))
                .count();
            accurate as f64 / resolved.len() as f64
        };

        self.avg_confidence = if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().map(|r| r.confidence).sum::<f64>() / self.window.len() as f64
        };
    }

    fn resolved_in_window(&self) -> usize {
        self.window.iter().filter(|r| r.outcome.is_some()).count()
    }
}

/// Performance summary for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub model_id: String,
    pub total_predictions: u64,
    pub resolved_predictions: u64,
    pub accurate_predictions: u64,
    /// Accuracy over the resolved part of the rolling window
    pub current_accuracy: f64,
    /// Lifetime accuracy over all resolved predictions
    pub lifetime_accuracy: f64,
    /// Mean confidence over the rolling window
    pub avg_confidence: f64,
    pub needs_retraining: bool,
    pub archived: bool,
}

/// Tracks prediction quality per registered model
pub struct PerformanceTracker {
    config: TrackerConfig,
    models: RwLock<HashMap<String, Arc<RwLock<ModelState>>>>,
    /// Prediction id -> owning model, for outcome routing
    predictions: RwLock<HashMap<Uuid, String>>,
    scheduler: Arc<RetrainingScheduler>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig, scheduler: Arc<RetrainingScheduler>) -> Self {
        Self {
            config,
            models: RwLock::new(HashMap::new()),
            predictions: RwLock::new(HashMap::new()),
            scheduler,
        }
    }

    /// Register a model, or update its metadata when already known.
    ///
    /// Idempotent: re-registration never resets counters or the window.
    pub fn register_model(&self, model_id: &str, metadata: serde_json::Value) -> Registration {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        match models.get(model_id) {
            Some(state) => {
                let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                state.metadata = metadata;
                debug!(model_id, "model re-registered, metadata updated");
                Registration::Updated
            }
            None => {
                models.insert(
                    model_id.to_string(),
                    Arc::new(RwLock::new(ModelState::new(model_id, metadata))),
                );
                info!(model_id, "model registered");
                Registration::Registered
            }
        }
    }

    /// Record a prediction, evicting the oldest window entry on overflow
    pub fn record_prediction(
        &self,
        model_id: &str,
        predicted: f64,
        confidence: f64,
        features: HashMap<String, f64>,
        feature_importance: Option<HashMap<String, f64>>,
    ) -> Result<Uuid, EngineError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::InvalidInput(format!(
                "confidence must be in [0, 1], got {confidence}"
            )));
        }

        let state = self.model_state(model_id)?;
        let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
        if state.archived {
            return Err(EngineError::InvalidInput(format!(
                "model {model_id} is archived"
            )));
        }

        let record = PredictionRecord {
            id: Uuid::new_v4(),
            model_id: model_id.to_string(),
            predicted,
            confidence,
            features,
            feature_importance,
            created_at: Utc::now(),
            outcome: None,
            resolved_at: None,
            accuracy: None,
            accurate: None,
        };
        let id = record.id;

        state.window.push_back(record);
        state.total_predictions += 1;
        if state.window.len() > self.config.window_capacity {
            if let Some(evicted) = state.window.pop_front() {
                self.predictions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&evicted.id);
            }
        }
        state.refresh_aggregates(self.config.accuracy_threshold);

        self.predictions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, model_id.to_string());

        debug!(model_id, prediction_id = %id, predicted, confidence, "prediction recorded");
        Ok(id)
    }

    /// Resolve a prediction with its actual value, returning the closeness
    /// score in [0, 1].
    pub fn update_outcome(&self, prediction_id: Uuid, actual: f64) -> Result<f64, EngineError> {
        let model_id = self
            .predictions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&prediction_id)
            .cloned()
            .ok_or(EngineError::PredictionNotFound(prediction_id))?;

        let state = self.model_state(&model_id)?;
        let mut state = state.write().unwrap_or_else(PoisonError::into_inner);

        let threshold = self.config.accuracy_threshold;
        let score = {
            let record = state
                .window
                .iter_mut()
                .find(|r| r.id == prediction_id)
                .ok_or(EngineError::PredictionNotFound(prediction_id))?;
            if record.outcome.is_some() {
                return Err(EngineError::PredictionNotFound(prediction_id));
            }

            let score = prediction_accuracy(record.predicted, actual);
            record.outcome = Some(actual);
            record.resolved_at = Some(Utc::now());
            record.accuracy = Some(score);
            record.accurate = Some(score > threshold);
            score
        };

        state.resolved_predictions += 1;
        if score > threshold {
            state.accurate_predictions += 1;
        }
        state.refresh_aggregates(threshold);

        debug!(
            model_id = %model_id,
            prediction_id = %prediction_id,
            accuracy = score,
            rolling_accuracy = state.current_accuracy,
            "outcome recorded"
        );

        // Low rolling accuracy over a meaningful sample flags retraining
        if state.resolved_in_window() >= self.config.min_samples
            && state.current_accuracy < threshold
        {
            warn!(
                model_id = %model_id,
                accuracy = state.current_accuracy,
                threshold,
                "rolling accuracy below threshold"
            );
            self.scheduler
                .enqueue(&model_id, "low_accuracy", RetrainingTrigger::AccuracyMonitor);
        }

        Ok(score)
    }

    /// Performance summary for one model
    pub fn performance_report(&self, model_id: &str) -> Result<PerformanceReport, EngineError> {
        let state = self.model_state(model_id)?;
        let state = state.read().unwrap_or_else(PoisonError::into_inner);

        let lifetime_accuracy = if state.resolved_predictions > 0 {
            state.accurate_predictions as f64 / state.resolved_predictions as f64
        } else {
            0.0
        };

        Ok(PerformanceReport {
            model_id: state.model_id.clone(),
            total_predictions: state.total_predictions,
            resolved_predictions: state.resolved_predictions,
            accurate_predictions: state.accurate_predictions,
            current_accuracy: state.current_accuracy,
            lifetime_accuracy,
            avg_confidence: state.avg_confidence,
            needs_retraining: state.resolved_in_window() >= self.config.min_samples
                && state.current_accuracy < self.config.accuracy_threshold,
            archived: state.archived,
        })
    }

    /// Clone of a model's rolling window, for copy-then-compute consumers
    pub fn window_snapshot(&self, model_id: &str) -> Result<Vec<PredictionRecord>, EngineError> {
        let state = self.model_state(model_id)?;
        let state = state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.window.iter().cloned().collect())
    }

    /// Retire a model: state is kept, further predictions are refused
    pub fn archive_model(&self, model_id: &str) -> Result<(), EngineError> {
        let state = self.model_state(model_id)?;
        let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
        state.archived = true;
        info!(model_id, "model archived");
        Ok(())
    }

    /// Ids of all registered models, active first then archived
    pub fn model_ids(&self) -> Vec<String> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<(String, bool)> = models
            .iter()
            .map(|(id, state)| {
                let archived = state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .archived;
                (id.clone(), archived)
            })
            .collect();
        ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ids.into_iter().map(|(id, _)| id).collect()
    }

    /// Ids of models still active (not archived)
    pub fn active_model_ids(&self) -> Vec<String> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = models
            .iter()
            .filter(|(_, state)| {
                !state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .archived
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn model_count(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn archived_count(&self) -> usize {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models
            .values()
            .filter(|state| {
                state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .archived
            })
            .count()
    }

    pub fn is_registered(&self, model_id: &str) -> bool {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(model_id)
    }

    fn model_state(&self, model_id: &str) -> Result<Arc<RwLock<ModelState>>, EngineError> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))
    }
}

/// Closeness of a prediction to its outcome: `1 - |predicted - actual| /
/// max(|actual|, eps)`, clamped to [0, 1].
pub fn prediction_accuracy(predicted: f64, actual: f64) -> f64 {
    let denominator = actual.abs().max(ACCURACY_EPSILON);
    (1.0 - (predicted - actual).abs() / denominator).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> (PerformanceTracker, Arc<RetrainingScheduler>) {
        let scheduler = Arc::new(RetrainingScheduler::new());
        (
            PerformanceTracker::new(TrackerConfig::default(), scheduler.clone()),
            scheduler,
        )
    }

    #[test]
    fn test_registration_is_idempotent() {
        let (tracker, _) = tracker();

        assert_eq!(
            tracker.register_model("m1", json!({"version": 1})),
            Registration::Registered
        );
        let id = tracker
            .record_prediction("m1", 100.0, 0.9, HashMap::new(), None)
            .unwrap();
        tracker.update_outcome(id, 100.0).unwrap();

        assert_eq!(
            tracker.register_model("m1", json!({"version": 2})),
            Registration::Updated
        );

        let report = tracker.performance_report("m1").unwrap();
        assert_eq!(report.total_predictions, 1);
        assert_eq!(report.accurate_predictions, 1);
    }

    #[test]
    fn test_unregistered_model_is_rejected() {
        let (tracker, _) = tracker();
        let err = tracker
            .record_prediction("ghost", 1.0, 0.5, HashMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
    }

    #[test]
    fn test_accuracy_is_bounded() {
        assert_eq!(prediction_accuracy(100.0, 100.0), 1.0);
        assert_eq!(prediction_accuracy(150.0, 100.0), 0.5);
        assert_eq!(prediction_accuracy(500.0, 100.0), 0.0);
        assert_eq!(prediction_accuracy(-100.0, 100.0), 0.0);
        assert_eq!(prediction_accuracy(1.0, 0.0), 0.0); // epsilon denominator

        for (predicted, actual) in [(0.3, 0.7), (1e9, 1e-9), (-5.0, 5.0), (42.0, 41.0)] {
            let score = prediction_accuracy(predicted, actual);
            assert!((0.0..=1.0).contains(&score), "{score} out of bounds");
        }
    }

    #[test]
    fn test_outcome_routing_and_double_resolution() {
        let (tracker, _) = tracker();
        tracker.register_model("m1", json!({}));

        let id = tracker
            .record_prediction("m1", 100.0, 0.8, HashMap::new(), None)
            .unwrap();

        let score = tracker.update_outcome(id, 90.0).unwrap();
        assert!((score - (1.0 - 10.0 / 90.0)).abs() < 1e-12);

        let err = tracker.update_outcome(id, 90.0).unwrap_err();
        assert!(matches!(err, EngineError::PredictionNotFound(_)));

        let err = tracker.update_outcome(Uuid::new_v4(), 1.0).unwrap_err();
        assert!(matches!(err, EngineError::PredictionNotFound(_)));
    }

    #[test]
    fn test_window_eviction_drops_oldest() {
        let scheduler = Arc::new(RetrainingScheduler::new());
        let config = TrackerConfig {
            window_capacity: 3,
            ..Default::default()
        };
        let tracker = PerformanceTracker::new(config, scheduler);
        tracker.register_model("m1", json!({}));

        let first = tracker
            .record_prediction("m1", 1.0, 0.5, HashMap::new(), None)
            .unwrap();
        for _ in 0..3 {
            tracker
                .record_prediction("m1", 1.0, 0.5, HashMap::new(), None)
                .unwrap();
        }

        let window = tracker.window_snapshot("m1").unwrap();
        assert_eq!(window.len(), 3);
        assert!(window.iter().all(|r| r.id != first));

        // Evicted predictions can no longer be resolved
        let err = tracker.update_outcome(first, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::PredictionNotFound(_)));

        let report = tracker.performance_report("m1").unwrap();
        assert_eq!(report.total_predictions, 4);
    }

    #[test]
    fn test_low_accuracy_flags_retraining() {
        let (tracker, scheduler) = tracker();
        tracker.register_model("m1", json!({}));

        // Outcomes consistently 50% off: closeness 0.5, below the 0.7 bar
        for _ in 0..20 {
            let id = tracker
                .record_prediction("m1", 150.0, 0.9, HashMap::new(), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }

        let report = tracker.performance_report("m1").unwrap();
        assert_eq!(report.current_accuracy, 0.0);
        assert!(report.needs_retraining);
        assert!(scheduler.contains("m1"));
        assert_eq!(scheduler.queue()[0].reason, "low_accuracy");
    }

    #[test]
    fn test_accurate_model_is_not_flagged() {
        let (tracker, scheduler) = tracker();
        tracker.register_model("m1", json!({}));

        for _ in 0..25 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.9, HashMap::new(), None)
                .unwrap();
            tracker.update_outcome(id, 101.0).unwrap();
        }

        let report = tracker.performance_report("m1").unwrap();
        assert!(report.current_accuracy > 0.9);
        assert!(!report.needs_retraining);
        assert!(!scheduler.contains("m1"));
    }

    #[test]
    fn test_archived_model_refuses_predictions() {
        let (tracker, _) = tracker();
        tracker.register_model("m1", json!({}));
        tracker.archive_model("m1").unwrap();

        let err = tracker
            .record_prediction("m1", 1.0, 0.5, HashMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // State survives archiving
        let report = tracker.performance_report("m1").unwrap();
        assert!(report.archived);
        assert_eq!(tracker.archived_count(), 1);
        assert!(tracker.active_model_ids().is_empty());
    }

    #[test]
    fn test_confidence_validation() {
        let (tracker, _) = tracker();
        tracker.register_model("m1", json!({}));

        let err = tracker
            .record_prediction("m1", 1.0, 1.5, HashMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
