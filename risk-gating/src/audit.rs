//! Append-only audit trail for gating decisions
//!
//! Every evaluated trade lands here, approved or not, so operators can
//! reconstruct why a trade was allowed or refused. Records are never
//! mutated or removed; durable persistence is the external store's job.

use crate::assessment::RiskAssessment;
use chrono::{DateTime, Utc};
use common::{OrderSide, TradeOrder};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// One audited gating decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub requested_quantity: f64,
    pub adjusted_quantity: f64,
    pub approved: bool,
    pub risk_score: f64,
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
}

/// In-process append-only decision log
pub struct AuditTrail {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append one decision and mirror it to the structured log
    pub fn record(&self, order: &TradeOrder, assessment: &RiskAssessment) -> Uuid {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            strategy_id: order.strategy_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            requested_quantity: order.quantity,
            adjusted_quantity: assessment.adjusted_quantity,
            approved: assessment.approved,
            risk_score: assessment.risk_score,
            warnings: assessment.warnings.clone(),
            blockers: assessment.blockers.clone(),
        };
        let id = record.id;

        if assessment.approved {
            info!(
                audit_id = %id,
                strategy = %order.strategy_id,
                symbol = %order.symbol,
                side = %order.side,
                quantity = assessment.adjusted_quantity,
                risk_score = assessment.risk_score,
                warnings = assessment.warnings.len(),
                "trade approved"
            );
        } else {
            warn!(
                audit_id = %id,
                strategy = %order.strategy_id,
                symbol = %order.symbol,
                side = %order.side,
                blockers = ?assessment.blockers,
                "trade blocked"
            );
        }

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        id
    }

    /// Snapshot of all records, oldest first
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}
