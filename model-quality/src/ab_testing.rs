//! A/B testing of paired models
//!
//! A test splits traffic between two models and accumulates per-arm
//! accuracy counts. Once both arms reach the minimum sample size, or the
//! configured duration elapses, the test completes and a two-proportion
//! z-test decides whether the accuracy gap is statistically significant.

use chrono::{DateTime, Duration, Utc};
use common::EngineError;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::collections::HashMap;
use std::f64::consts::SQRT_2;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A/B test parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestConfig {
    /// Fraction of traffic routed to model A
    #[serde(default = "default_traffic_split")]
    pub traffic_split: f64,

    /// Maximum test duration in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Resolved samples required per arm before the test can complete
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// p-value below which the winner is reported as significant
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            traffic_split: default_traffic_split(),
            duration_secs: default_duration_secs(),
            min_sample_size: default_min_sample_size(),
            significance_level: default_significance_level(),
        }
    }
}

fn default_traffic_split() -> f64 {
    0.5
}

fn default_duration_secs() -> u64 {
    86_400
}

fn default_min_sample_size() -> u64 {
    50
}

fn default_significance_level() -> f64 {
    0.05
}

/// Lifecycle of a test; transitions only `Running -> Completed` and
/// `Running -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbTestStatus {
    Running,
    Completed,
    Stopped,
}

/// Accumulated results for one arm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmStats {
    pub model_id: String,
    pub assignments: u64,
    pub samples: u64,
    pub accurate: u64,
}

impl ArmStats {
    fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            assignments: 0,
            samples: 0,
            accurate: 0,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.accurate as f64 / self.samples as f64
        }
    }
}

/// One paired-model experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: Uuid,
    pub arm_a: ArmStats,
    pub arm_b: ArmStats,
    pub config: AbTestConfig,
    pub status: AbTestStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub concluded_at: Option<DateTime<Utc>>,
    /// Higher-accuracy arm's model id, set on completion
    pub winner: Option<String>,
    /// Two-sided p-value of the accuracy gap, set on completion
    pub p_value: Option<f64>,
}

impl AbTest {
    /// Whether the reported winner clears the significance level
    pub fn is_significant(&self) -> Option<bool> {
        self.p_value.map(|p| p < self.config.significance_level)
    }
}

/// Owns all active and concluded A/B tests
pub struct AbTestCoordinator {
    tests: RwLock<HashMap<Uuid, Arc<RwLock<AbTest>>>>,
}

impl AbTestCoordinator {
    pub fn new() -> Self {
        Self {
            tests: RwLock::new(HashMap::new()),
        }
    }

    /// Start a paired test. Fails without creating anything when the two
    /// model ids are identical or the config is malformed.
    pub fn start_test(
        &self,
        model_a: &str,
        model_b: &str,
        config: AbTestConfig,
    ) -> Result<Uuid, EngineError> {
        if model_a == model_b {
            return Err(EngineError::InvalidInput(format!(
                "A/B test requires two distinct models, got {model_a} twice"
            )));
        }
        if model_a.is_empty() || model_b.is_empty() {
            return Err(EngineError::InvalidInput(
                "model ids must be non-empty".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&config.traffic_split) || config.traffic_split == 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "traffic split must be in (0, 1), got {}",
                config.traffic_split
            )));
        }
        if config.min_sample_size == 0 {
            return Err(EngineError::InvalidInput(
                "minimum sample size must be positive".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let test = AbTest {
            id,
            arm_a: ArmStats::new(model_a),
            arm_b: ArmStats::new(model_b),
            ends_at: started_at + Duration::seconds(config.duration_secs as i64),
            config,
            status: AbTestStatus::Running,
            started_at,
            concluded_at: None,
            winner: None,
            p_value: None,
        };

        self.tests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(RwLock::new(test)));

        info!(test_id = %id, model_a, model_b, "A/B test started");
        Ok(id)
    }

    /// Pick the arm to serve the next request, per the traffic split
    pub fn assign(&self, test_id: Uuid) -> Result<String, EngineError> {
        let test = self.test(test_id)?;
        let mut test = test.write().unwrap_or_else(PoisonError::into_inner);

        if test.status != AbTestStatus::Running {
            return Err(EngineError::InvalidInput(format!(
                "test {test_id} is no longer running"
            )));
        }

        let arm = if fastrand::f64() < test.config.traffic_split {
            &mut test.arm_a
        } else {
            &mut test.arm_b
        };
        arm.assignments += 1;
        Ok(arm.model_id.clone())
    }

    /// Record one resolved outcome for the named model's arm.
    ///
    /// Outcomes arriving after conclusion are dropped with a warning so
    /// late resolutions cannot disturb a reported result.
    pub fn record_outcome(
        &self,
        test_id: Uuid,
        model_id: &str,
        accurate: bool,
    ) -> Result<(), EngineError> {
        let test = self.test(test_id)?;
        let mut test = test.write().unwrap_or_else(PoisonError::into_inner);

        if test.status != AbTestStatus::Running {
            warn!(test_id = %test_id, model_id, "outcome for concluded test dropped");
            return Ok(());
        }

        let arm = if test.arm_a.model_id == model_id {
            &mut test.arm_a
        } else if test.arm_b.model_id == model_id {
            &mut test.arm_b
        } else {
            return Err(EngineError::InvalidInput(format!(
                "model {model_id} is not part of test {test_id}"
            )));
        };

        arm.samples += 1;
        if accurate {
            arm.accurate += 1;
        }

        maybe_complete(&mut test);
        Ok(())
    }

    /// Current state of a test; completes it first when its end conditions
    /// are already met.
    pub fn results(&self, test_id: Uuid) -> Result<AbTest, EngineError> {
        let test = self.test(test_id)?;
        let mut test = test.write().unwrap_or_else(PoisonError::into_inner);
        maybe_complete(&mut test);
        Ok(test.clone())
    }

    /// Manually halt a running test; no winner is reported
    pub fn stop_test(&self, test_id: Uuid) -> Result<AbTest, EngineError> {
        let test = self.test(test_id)?;
        let mut test = test.write().unwrap_or_else(PoisonError::into_inner);

        if test.status != AbTestStatus::Running {
            return Err(EngineError::InvalidInput(format!(
                "test {test_id} already concluded"
            )));
        }

        test.status = AbTestStatus::Stopped;
        test.concluded_at = Some(Utc::now());
        info!(test_id = %test_id, "A/B test stopped");
        Ok(test.clone())
    }

    /// Snapshot of every test, running and concluded
    pub fn tests(&self) -> Vec<AbTest> {
        let tests = self.tests.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<AbTest> = tests
            .values()
            .map(|t| t.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        all.sort_by_key(|t| t.started_at);
        all
    }

    pub fn running_count(&self) -> usize {
        self.tests()
            .iter()
            .filter(|t| t.status == AbTestStatus::Running)
            .count()
    }

    fn test(&self, test_id: Uuid) -> Result<Arc<RwLock<AbTest>>, EngineError> {
        self.tests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&test_id)
            .cloned()
            .ok_or(EngineError::TestNotFound(test_id))
    }
}

impl Default for AbTestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete the test once both arms have enough samples or time is up
fn maybe_complete(test: &mut AbTest) {
    if test.status != AbTestStatus::Running {
        return;
    }

    let sampled_out = test.arm_a.samples >= test.config.min_sample_size
        && test.arm_b.samples >= test.config.min_sample_size;
    let timed_out = Utc::now() >= test.ends_at;

    if !sampled_out && !timed_out {
        return;
    }

    test.status = AbTestStatus::Completed;
    test.concluded_at = Some(Utc::now());

    let (winner, p_value) = compare_arms(&test.arm_a, &test.arm_b);
    test.winner = winner;
    test.p_value = p_value;

    info!(
        test_id = %test.id,
        winner = ?test.winner,
        p_value = ?test.p_value,
        accuracy_a = test.arm_a.accuracy(),
        accuracy_b = test.arm_b.accuracy(),
        "A/B test completed"
    );
}

/// Two-proportion z-test on arm accuracies.
///
/// Returns the higher-accuracy arm and the two-sided p-value; arms without
/// samples, or a degenerate pooled variance, yield no verdict.
fn compare_arms(arm_a: &ArmStats, arm_b: &ArmStats) -> (Option<String>, Option<f64>) {
    let n_a = arm_a.samples as f64;
    let n_b = arm_b.samples as f64;
    if n_a == 0.0 || n_b == 0.0 {
        return (None, None);
    }

    let p_a = arm_a.accuracy();
    let p_b = arm_b.accuracy();

    let winner = if p_a > p_b {
        Some(arm_a.model_id.clone())
    } else if p_b > p_a {
        Some(arm_b.model_id.clone())
    } else {
        None
    };

    let pooled = (arm_a.accurate + arm_b.accurate) as f64 / (n_a + n_b);
    let std_err = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();
    if std_err == 0.0 {
        // Identical degenerate proportions carry no evidence either way
        debug!("zero pooled variance in A/B comparison");
        return (winner, Some(1.0));
    }

    let z = (p_a - p_b) / std_err;
    let p_value = erfc(z.abs() / SQRT_2);

    (winner, Some(p_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> AbTestConfig {
        AbTestConfig {
            min_sample_size: 20,
            ..Default::default()
        }
    }

    fn fill_arm(coordinator: &AbTestCoordinator, test_id: Uuid, model: &str, hits: u64, total: u64) {
        for i in 0..total {
            coordinator
                .record_outcome(test_id, model, i < hits)
                .unwrap();
        }
    }

    #[test]
    fn test_self_test_is_rejected() {
        let coordinator = AbTestCoordinator::new();
        let err = coordinator
            .start_test("m1", "m1", AbTestConfig::default())
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(coordinator.tests().is_empty());
    }

    #[test]
    fn test_assignment_respects_running_state() {
        fastrand::seed(7);
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(coordinator.assign(id).unwrap());
        }
        assert!(seen.contains("m1") && seen.contains("m2"));

        coordinator.stop_test(id).unwrap();
        assert!(coordinator.assign(id).is_err());
    }

    #[test]
    fn test_live_results_while_running() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        fill_arm(&coordinator, id, "m1", 5, 10);
        let live = coordinator.results(id).unwrap();

        assert_eq!(live.status, AbTestStatus::Running);
        assert_eq!(live.arm_a.samples, 10);
        assert_eq!(live.arm_a.accuracy(), 0.5);
        assert!(live.winner.is_none());
    }

    #[test]
    fn test_clear_winner_is_significant() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        fill_arm(&coordinator, id, "m1", 19, 20);
        fill_arm(&coordinator, id, "m2", 6, 20);

        let result = coordinator.results(id).unwrap();
        assert_eq!(result.status, AbTestStatus::Completed);
        assert_eq!(result.winner.as_deref(), Some("m1"));
        let p = result.p_value.unwrap();
        assert!(p < 0.05, "expected significance, got p={p}");
        assert_eq!(result.is_significant(), Some(true));
    }

    #[test]
    fn test_close_race_is_not_significant() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        fill_arm(&coordinator, id, "m1", 11, 20);
        fill_arm(&coordinator, id, "m2", 10, 20);

        let result = coordinator.results(id).unwrap();
        assert_eq!(result.status, AbTestStatus::Completed);
        assert_eq!(result.winner.as_deref(), Some("m1"));
        assert_eq!(result.is_significant(), Some(false));
    }

    #[test]
    fn test_late_outcomes_do_not_disturb_result() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        fill_arm(&coordinator, id, "m1", 19, 20);
        fill_arm(&coordinator, id, "m2", 5, 20);
        let concluded = coordinator.results(id).unwrap();

        coordinator.record_outcome(id, "m2", true).unwrap();
        let after = coordinator.results(id).unwrap();

        assert_eq!(after.arm_b.samples, concluded.arm_b.samples);
        assert_eq!(after.p_value, concluded.p_value);
    }

    #[test]
    fn test_stop_blocks_further_transitions() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        let stopped = coordinator.stop_test(id).unwrap();
        assert_eq!(stopped.status, AbTestStatus::Stopped);
        assert!(stopped.winner.is_none());

        assert!(coordinator.stop_test(id).is_err());
        let results = coordinator.results(id).unwrap();
        assert_eq!(results.status, AbTestStatus::Stopped);
    }

    #[test]
    fn test_unknown_test_errors() {
        let coordinator = AbTestCoordinator::new();
        let err = coordinator.results(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, EngineError::TestNotFound(_)));

        let err = coordinator
            .record_outcome(Uuid::new_v4(), "m1", true)
            .unwrap_err();
        assert!(matches!(err, EngineError::TestNotFound(_)));
    }

    #[test]
    fn test_outcome_for_foreign_model_rejected() {
        let coordinator = AbTestCoordinator::new();
        let id = coordinator.start_test("m1", "m2", fast_config()).unwrap();

        let err = coordinator.record_outcome(id, "m3", true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
