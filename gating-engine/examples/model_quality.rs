//! Model lifecycle: tracking, drift, retraining, A/B testing

use anyhow::Result;
use gating_engine::{
    AbTestConfig, EngineConfig, GatingEngine, InMemoryMarketData, InMemoryPortfolio,
    PortfolioSnapshot,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_max_level(Level::INFO).init();

    let engine = GatingEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryPortfolio::new(PortfolioSnapshot::empty())),
        Arc::new(InMemoryMarketData::new()),
    );

    engine.register_model("price-forecast-v1", json!({"horizon_minutes": 15}));
    engine.register_model("price-forecast-v2", json!({"horizon_minutes": 15}));

    // v1 starts well, then degrades badly
    let mut features = HashMap::new();
    features.insert("spread".to_string(), 0.001);
    for i in 0..40 {
        let (predicted, confidence) = if i < 20 { (100.0, 0.9) } else { (160.0, 0.5) };
        let id = engine.record_prediction(
            "price-forecast-v1",
            predicted,
            confidence,
            features.clone(),
            None,
        )?;
        engine.update_outcome(id, 100.0)?;
    }

    let report = engine.performance_report("price-forecast-v1")?;
    info!(
        accuracy = report.current_accuracy,
        needs_retraining = report.needs_retraining,
        "v1 performance"
    );

    let drift = engine.compute_drift("price-forecast-v1")?;
    info!(
        overall = drift.overall_drift,
        severity = %drift.severity,
        "v1 drift"
    );

    for request in engine.retraining_queue() {
        info!(
            model = %request.model_id,
            reason = %request.reason,
            triggered_by = %request.triggered_by,
            "pending retraining"
        );
    }

    // Pit v1 against v2
    let test_id = engine.start_ab_test(
        "price-forecast-v1",
        "price-forecast-v2",
        AbTestConfig {
            min_sample_size: 30,
            ..Default::default()
        },
    )?;

    for i in 0..30 {
        let model = engine.ab_assign(test_id)?;
        info!(round = i, model = %model, "routing prediction request");

        engine.record_ab_outcome(test_id, "price-forecast-v1", i % 2 == 0)?;
        engine.record_ab_outcome(test_id, "price-forecast-v2", i % 5 != 0)?;
    }

    let result = engine.ab_test_results(test_id)?;
    info!(
        status = ?result.status,
        winner = ?result.winner,
        p_value = ?result.p_value,
        significant = ?result.is_significant(),
        accuracy_a = result.arm_a.accuracy(),
        accuracy_b = result.arm_b.accuracy(),
        "A/B verdict"
    );

    Ok(())
}
