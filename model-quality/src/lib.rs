//! Model quality monitoring
//!
//! Tracks prediction performance per model, derives drift metrics from the
//! rolling windows, queues degraded models for retraining, and runs
//! paired-model A/B experiments. All state lives in owned collections so
//! several isolated instances can coexist (one per engine, one per test).

pub mod ab_testing;
pub mod drift;
pub mod retraining;
pub mod tracker;

pub use ab_testing::{AbTest, AbTestConfig, AbTestCoordinator, AbTestStatus, ArmStats};
pub use drift::{DriftConfig, DriftDetector, DriftMetrics, DriftSeverity};
pub use retraining::{RetrainingRequest, RetrainingScheduler, RetrainingTrigger};
pub use tracker::{
    prediction_accuracy, PerformanceReport, PerformanceTracker, PredictionRecord, Registration,
    TrackerConfig,
};
