//! Walk a few candidate trades through the gating engine

use anyhow::Result;
use chrono::Utc;
use gating_engine::{
    EngineConfig, EvaluationOptions, GatingEngine, InMemoryMarketData, InMemoryPortfolio,
    MarketStats, OrderSide, PortfolioSnapshot, Position, RiskConfigPatch, TradeOrder,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_max_level(Level::INFO).init();

    // A healthy 100k portfolio with one open ETH position
    let portfolio = Arc::new(InMemoryPortfolio::new(PortfolioSnapshot {
        total_value: 100_000.0,
        total_exposure: 8_000.0,
        current_drawdown: 0.02,
        daily_pnl: -500.0,
        positions: vec![Position {
            strategy_id: "momentum".to_string(),
            symbol: "ETH-USD".to_string(),
            quantity: 2.5,
            notional_value: 8_000.0,
            entry_time: Utc::now(),
        }],
        as_of: Utc::now(),
    }));

    let market_data = Arc::new(InMemoryMarketData::new());
    market_data
        .set_stats(
            "BTC-USD",
            MarketStats {
                volume_24h: 12_000_000.0,
                spread: 0.0008,
                price_change_24h: 0.015,
            },
        )
        .await;
    market_data
        .set_closes(
            "BTC-USD",
            (0..60).map(|i| 50_000.0 * (1.0 + 0.001 * i as f64)).collect(),
        )
        .await;

    let engine = GatingEngine::new(EngineConfig::default(), portfolio.clone(), market_data);

    let order = TradeOrder {
        strategy_id: "momentum".to_string(),
        symbol: "BTC-USD".to_string(),
        side: OrderSide::Buy,
        quantity: 0.1,
        price: 50_000.0,
    };

    let assessment = engine
        .evaluate_trade(&order, EvaluationOptions::default())
        .await;
    info!(
        approved = assessment.approved,
        risk_score = assessment.risk_score,
        quantity = assessment.adjusted_quantity,
        "baseline trade"
    );

    // Tighten the per-trade ceiling and watch the size shrink
    engine.update_risk_config(&RiskConfigPatch {
        max_trade_notional: Some(1_000.0),
        ..Default::default()
    });
    let shrunk = engine
        .evaluate_trade(&order, EvaluationOptions::default())
        .await;
    info!(
        approved = shrunk.approved,
        quantity = shrunk.adjusted_quantity,
        warnings = ?shrunk.warnings,
        "after tightening the notional ceiling"
    );

    // A drawdown shock trips the circuit breaker for every strategy
    portfolio
        .set(PortfolioSnapshot {
            total_value: 88_000.0,
            total_exposure: 8_000.0,
            current_drawdown: 0.12,
            daily_pnl: -4_000.0,
            positions: Vec::new(),
            as_of: Utc::now(),
        })
        .await;
    let halted = engine
        .evaluate_trade(&order, EvaluationOptions::default())
        .await;
    info!(
        approved = halted.approved,
        blockers = ?halted.blockers,
        "after the drawdown shock"
    );

    let status = engine.risk_status();
    info!(
        breaker_tripped = status.breaker_tripped,
        evaluations = status.evaluations,
        "engine status"
    );

    for record in engine.audit_trail() {
        info!(
            audit_id = %record.id,
            approved = record.approved,
            risk_score = record.risk_score,
            "audit record"
        );
    }

    Ok(())
}
