//! Model drift detection
//!
//! Drift is measured from a snapshot of the tracker's rolling window,
//! split into an older and a recent half. The window is cloned first so no
//! write lock is held while the metrics are computed.

use crate::retraining::{RetrainingScheduler, RetrainingTrigger};
use crate::tracker::{PerformanceTracker, PredictionRecord};
use chrono::{DateTime, Utc};
use common::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Guards normalized shifts against a degenerate historical spread
const SHIFT_EPSILON: f64 = 1e-6;

/// Drift detection thresholds and weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Seconds between background recomputations
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Overall drift below this is Low severity
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Overall drift below this (and at least `low_threshold`) is Medium
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,

    /// Overall drift below this (and at least `medium_threshold`) is High;
    /// anything at or above is Critical
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Weight of accuracy drift in the overall figure
    #[serde(default = "default_accuracy_weight")]
    pub accuracy_weight: f64,

    /// Weight of confidence drift in the overall figure
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,

    /// Weight of mean feature drift in the overall figure
    #[serde(default = "default_feature_weight")]
    pub feature_weight: f64,

    /// Window records required before drift is computed at all
    #[serde(default = "default_min_window")]
    pub min_window: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            low_threshold: default_low_threshold(),
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
            accuracy_weight: default_accuracy_weight(),
            confidence_weight: default_confidence_weight(),
            feature_weight: default_feature_weight(),
            min_window: default_min_window(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_low_threshold() -> f64 {
    0.05
}

fn default_medium_threshold() -> f64 {
    0.10
}

fn default_high_threshold() -> f64 {
    0.15
}

fn default_accuracy_weight() -> f64 {
    0.6
}

fn default_confidence_weight() -> f64 {
    0.25
}

fn default_feature_weight() -> f64 {
    0.15
}

fn default_min_window() -> usize {
    10
}

/// Severity band for an overall drift figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DriftSeverity {
    /// Map an overall drift value into its band. The bands are half-open
    /// and cover the whole line, so every value maps to exactly one band.
    pub fn classify(overall_drift: f64, config: &DriftConfig) -> Self {
        if overall_drift < config.low_threshold {
            DriftSeverity::Low
        } else if overall_drift < config.medium_threshold {
            DriftSeverity::Medium
        } else if overall_drift < config.high_threshold {
            DriftSeverity::High
        } else {
            DriftSeverity::Critical
        }
    }
}

impl std::fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftSeverity::Low => write!(f, "low"),
            DriftSeverity::Medium => write!(f, "medium"),
            DriftSeverity::High => write!(f, "high"),
            DriftSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Drift metrics for one model at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftMetrics {
    pub model_id: String,
    pub overall_drift: f64,
    pub accuracy_drift: f64,
    pub confidence_drift: f64,
    pub feature_drift: HashMap<String, f64>,
    pub severity: DriftSeverity,
    pub computed_at: DateTime<Utc>,
}

impl DriftMetrics {
    fn quiet(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            overall_drift: 0.0,
            accuracy_drift: 0.0,
            confidence_drift: 0.0,
            feature_drift: HashMap::new(),
            severity: DriftSeverity::Low,
            computed_at: Utc::now(),
        }
    }
}

/// Computes and retains per-model drift metrics
pub struct DriftDetector {
    config: DriftConfig,
    tracker: Arc<PerformanceTracker>,
    scheduler: Arc<RetrainingScheduler>,
    latest: RwLock<HashMap<String, DriftMetrics>>,
}

impl DriftDetector {
    pub fn new(
        config: DriftConfig,
        tracker: Arc<PerformanceTracker>,
        scheduler: Arc<RetrainingScheduler>,
    ) -> Self {
        Self {
            config,
            tracker,
            scheduler,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Compute fresh drift metrics for one model, superseding the previous
    /// ones. High or Critical severity queues the model for retraining.
    pub fn compute(&self, model_id: &str) -> Result<DriftMetrics, EngineError> {
        let report = self.tracker.performance_report(model_id)?;
        let window = self.tracker.window_snapshot(model_id)?;

        let metrics = if window.len() < self.config.min_window {
            debug!(
                model_id,
                window = window.len(),
                "window too short for drift analysis"
            );
            DriftMetrics::quiet(model_id)
        } else {
            let mid = window.len() / 2;
            let (older, recent) = window.split_at(mid);

            let accuracy_drift = accuracy_drift(report.lifetime_accuracy, recent);
            let confidence_drift = normalized_shift(
                &older.iter().map(|r| r.confidence).collect::<Vec<_>>(),
                &recent.iter().map(|r| r.confidence).collect::<Vec<_>>(),
            );
            let feature_drift = feature_drift(older, recent);

            let mean_feature_drift = if feature_drift.is_empty() {
                0.0
            } else {
                feature_drift.values().sum::<f64>() / feature_drift.len() as f64
            };

            let overall_drift = self.config.accuracy_weight * accuracy_drift
                + self.config.confidence_weight * confidence_drift
                + self.config.feature_weight * mean_feature_drift;

            DriftMetrics {
                model_id: model_id.to_string(),
                overall_drift,
                accuracy_drift,
                confidence_drift,
                feature_drift,
                severity: DriftSeverity::classify(overall_drift, &self.config),
                computed_at: Utc::now(),
            }
        };

        if metrics.severity >= DriftSeverity::High {
            warn!(
                model_id,
                overall_drift = metrics.overall_drift,
                severity = %metrics.severity,
                "model drift detected"
            );
            self.scheduler
                .enqueue(model_id, "drift_detected", RetrainingTrigger::DriftDetector);
        } else {
            debug!(
                model_id,
                overall_drift = metrics.overall_drift,
                severity = %metrics.severity,
                "drift recomputed"
            );
        }

        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_id.to_string(), metrics.clone());

        Ok(metrics)
    }

    /// Most recent metrics for a model, if any computation has run
    pub fn latest(&self, model_id: &str) -> Option<DriftMetrics> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .cloned()
    }

    /// Latest metrics, computing on demand when none are retained yet
    pub fn report(&self, model_id: &str) -> Result<DriftMetrics, EngineError> {
        match self.latest(model_id) {
            Some(metrics) => Ok(metrics),
            None => self.compute(model_id),
        }
    }

    /// Recompute drift for every active model on a fixed interval, forever.
    ///
    /// Run under `tokio::spawn`; abort the task to stop.
    pub async fn run(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            for model_id in self.tracker.active_model_ids() {
                if let Err(err) = self.compute(&model_id) {
                    warn!(model_id = %model_id, error = %err, "drift recomputation failed");
                }
            }
        }
    }
}

fn accuracy_drift(lifetime_accuracy: f64, recent: &[PredictionRecord]) -> f64 {
    let resolved: Vec<&PredictionRecord> =
        recent.iter().filter(|r| r.outcome.is_some()).collect();
    if resolved.is_empty() {
        return 0.0;
    }

    let accurate = resolved
        .iter()
        .filter(|r| r.accurate.unwrap_or(false))
        .count();
    let recent_accuracy = accurate as f64 / resolved.len() as f64;

    (lifetime_accuracy - recent_accuracy).abs()
}

/// Shift of the recent mean away from the older mean, normalized by the
/// older sample's standard deviation and capped at 1.0.
fn normalized_shift(older: &[f64], recent: &[f64]) -> f64 {
    if older.is_empty() || recent.is_empty() {
        return 0.0;
    }

    let mean_old: f64 = older.iter().sum::<f64>() / older.len() as f64;
    let mean_recent: f64 = recent.iter().sum::<f64>() / recent.len() as f64;

    let variance: f64 =
        older.iter().map(|v| (v - mean_old).powi(2)).sum::<f64>() / older.len() as f64;
    let std_dev = variance.sqrt().max(SHIFT_EPSILON);

    ((mean_recent - mean_old).abs() / std_dev).min(1.0)
}

fn feature_drift(older: &[PredictionRecord], recent: &[PredictionRecord]) -> HashMap<String, f64> {
    let mut names: Vec<&String> = older.iter().flat_map(|r| r.features.keys()).collect();
    names.sort();
    names.dedup();

    let mut drift = HashMap::new();
    for name in names {
        let old_values: Vec<f64> = older
            .iter()
            .filter_map(|r| r.features.get(name).copied())
            .collect();
        let recent_values: Vec<f64> = recent
            .iter()
            .filter_map(|r| r.features.get(name).copied())
            .collect();

        if old_values.is_empty() || recent_values.is_empty() {
            continue;
        }
        drift.insert(name.clone(), normalized_shift(&old_values, &recent_values));
    }
    drift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn setup() -> (Arc<PerformanceTracker>, Arc<RetrainingScheduler>, DriftDetector) {
        let scheduler = Arc::new(RetrainingScheduler::new());
        let tracker = Arc::new(PerformanceTracker::new(
            TrackerConfig::default(),
            scheduler.clone(),
        ));
        let detector = DriftDetector::new(DriftConfig::default(), tracker.clone(), scheduler.clone());
        (tracker, scheduler, detector)
    }

    fn features(value: f64) -> Map<String, f64> {
        let mut features = Map::new();
        features.insert("spread".to_string(), value);
        features
    }

    #[test]
    fn test_severity_bands_partition_the_line() {
        let config = DriftConfig::default();
        let cases = [
            (0.0, DriftSeverity::Low),
            (0.049, DriftSeverity::Low),
            (0.05, DriftSeverity::Medium),
            (0.099, DriftSeverity::Medium),
            (0.10, DriftSeverity::High),
            (0.149, DriftSeverity::High),
            (0.15, DriftSeverity::Critical),
            (0.9, DriftSeverity::Critical),
        ];
        for (value, expected) in cases {
            assert_eq!(DriftSeverity::classify(value, &config), expected, "{value}");
        }
    }

    #[test]
    fn test_stable_model_shows_low_drift() {
        let (tracker, scheduler, detector) = setup();
        tracker.register_model("m1", json!({}));

        for _ in 0..40 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.8, features(1.0), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }

        let metrics = detector.compute("m1").unwrap();
        assert_eq!(metrics.severity, DriftSeverity::Low);
        assert!(metrics.overall_drift < 0.05);
        assert!(!scheduler.contains("m1"));
    }

    #[test]
    fn test_accuracy_collapse_dominates_overall_drift() {
        let (tracker, scheduler, detector) = setup();
        tracker.register_model("m1", json!({}));

        // First half spot on, second half consistently far off
        for _ in 0..20 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.9, features(1.0), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }
        for _ in 0..20 {
            let id = tracker
                .record_prediction("m1", 200.0, 0.9, features(1.0), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }

        let metrics = detector.compute("m1").unwrap();
        // Lifetime accuracy 0.5 vs recent-half 0.0
        assert!((metrics.accuracy_drift - 0.5).abs() < 1e-9);
        assert!(metrics.severity >= DriftSeverity::High);
        assert!(scheduler.contains("m1"));
    }

    #[test]
    fn test_distribution_shift_queues_drift_retraining() {
        let (tracker, scheduler, detector) = setup();
        tracker.register_model("m1", json!({}));

        // Predictions stay accurate; confidence and features shift hard.
        for _ in 0..20 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.9, features(1.0), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }
        for _ in 0..20 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.4, features(5.0), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }

        let metrics = detector.compute("m1").unwrap();
        assert!(metrics.accuracy_drift < 1e-9);
        assert!(metrics.confidence_drift > 0.5);
        assert!(metrics.feature_drift["spread"] > 0.5);
        assert!(metrics.severity >= DriftSeverity::High);
        assert!(scheduler
            .queue()
            .iter()
            .any(|r| r.model_id == "m1" && r.reason == "drift_detected"));
    }

    #[test]
    fn test_short_window_is_quiet() {
        let (tracker, _, detector) = setup();
        tracker.register_model("m1", json!({}));

        for _ in 0..3 {
            tracker
                .record_prediction("m1", 100.0, 0.8, Map::new(), None)
                .unwrap();
        }

        let metrics = detector.compute("m1").unwrap();
        assert_eq!(metrics.overall_drift, 0.0);
        assert_eq!(metrics.severity, DriftSeverity::Low);
    }

    #[test]
    fn test_recomputation_supersedes() {
        let (tracker, _, detector) = setup();
        tracker.register_model("m1", json!({}));
        for _ in 0..12 {
            let id = tracker
                .record_prediction("m1", 100.0, 0.8, Map::new(), None)
                .unwrap();
            tracker.update_outcome(id, 100.0).unwrap();
        }

        let first = detector.report("m1").unwrap();
        let second = detector.compute("m1").unwrap();
        let latest = detector.latest("m1").unwrap();

        assert!(latest.computed_at >= first.computed_at);
        assert_eq!(latest.computed_at, second.computed_at);
    }

    #[test]
    fn test_unknown_model_errors() {
        let (_, _, detector) = setup();
        assert!(matches!(
            detector.compute("ghost"),
            Err(EngineError::ModelNotFound(_))
        ));
    }
}
