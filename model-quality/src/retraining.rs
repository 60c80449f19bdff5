//! Retraining queue
//!
//! Models flagged by the accuracy monitor, the drift detector, or an
//! operator wait here for the external training pipeline. The queue has
//! set semantics: at most one pending entry per model, in trigger order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Who asked for the retraining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainingTrigger {
    AccuracyMonitor,
    DriftDetector,
    Manual,
}

impl std::fmt::Display for RetrainingTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrainingTrigger::AccuracyMonitor => write!(f, "accuracy_monitor"),
            RetrainingTrigger::DriftDetector => write!(f, "drift_detector"),
            RetrainingTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// One pending retraining request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingRequest {
    pub model_id: String,
    pub reason: String,
    pub triggered_by: RetrainingTrigger,
    pub queued_at: DateTime<Utc>,
}

/// FIFO queue with at-most-one pending entry per model
pub struct RetrainingScheduler {
    queue: Mutex<Vec<RetrainingRequest>>,
}

impl RetrainingScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a model unless it is already pending.
    ///
    /// Returns whether a new entry was added; a duplicate keeps the
    /// original entry (and its original reason) untouched.
    pub fn enqueue(
        &self,
        model_id: &str,
        reason: impl Into<String>,
        triggered_by: RetrainingTrigger,
    ) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.iter().any(|r| r.model_id == model_id) {
            debug!(model_id, "model already pending retraining");
            return false;
        }

        let request = RetrainingRequest {
            model_id: model_id.to_string(),
            reason: reason.into(),
            triggered_by,
            queued_at: Utc::now(),
        };
        info!(
            model_id,
            reason = %request.reason,
            triggered_by = %triggered_by,
            "model queued for retraining"
        );
        queue.push(request);
        true
    }

    /// Whether a model is pending retraining
    pub fn contains(&self, model_id: &str) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.model_id == model_id)
    }

    /// Snapshot of pending requests, oldest first
    pub fn queue(&self) -> Vec<RetrainingRequest> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the oldest pending request (training pipeline side)
    pub fn take_next(&self) -> Option<RetrainingRequest> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    /// Remove a specific model's pending request, if any
    pub fn take(&self, model_id: &str) -> Option<RetrainingRequest> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let index = queue.iter().position(|r| r.model_id == model_id)?;
        Some(queue.remove(index))
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetrainingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_semantics() {
        let scheduler = RetrainingScheduler::new();

        assert!(scheduler.enqueue("m1", "low_accuracy", RetrainingTrigger::AccuracyMonitor));
        assert!(!scheduler.enqueue("m1", "drift_detected", RetrainingTrigger::DriftDetector));
        assert!(scheduler.enqueue("m2", "manual request", RetrainingTrigger::Manual));

        assert_eq!(scheduler.len(), 2);
        let queue = scheduler.queue();
        assert_eq!(queue[0].model_id, "m1");
        assert_eq!(queue[0].reason, "low_accuracy");
        assert_eq!(queue[1].model_id, "m2");
    }

    #[test]
    fn test_take_releases_slot() {
        let scheduler = RetrainingScheduler::new();
        scheduler.enqueue("m1", "low_accuracy", RetrainingTrigger::AccuracyMonitor);

        let taken = scheduler.take_next().unwrap();
        assert_eq!(taken.model_id, "m1");
        assert!(scheduler.is_empty());

        // Slot freed: the model may be queued again
        assert!(scheduler.enqueue("m1", "drift_detected", RetrainingTrigger::DriftDetector));
        assert!(scheduler.take("m1").is_some());
        assert!(scheduler.take("m1").is_none());
    }
}
