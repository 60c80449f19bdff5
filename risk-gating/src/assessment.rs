//! Trade risk assessments and the merge reducer
//!
//! Each checker produces a `PartialAssessment`; the evaluator folds them
//! into one `RiskAssessment` through `AssessmentDraft::merge`, which is a
//! pure function so the ordering and sizing rules can be tested without
//! any checker present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weight of the quantity cut fraction in the risk score
const CUT_WEIGHT: f64 = 0.6;

/// Score contribution of each warning
const WARNING_WEIGHT: f64 = 0.08;

/// Ceiling for non-blocked scores; only blockers reach 1.0
const SCORE_CEILING: f64 = 0.99;

/// Final, immutable verdict on one candidate trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// False whenever any blocker is present
    pub approved: bool,

    /// Overall risk in [0, 1]; exactly 1.0 when blocked
    pub risk_score: f64,

    /// Permitted quantity; never above the requested quantity
    pub adjusted_quantity: f64,

    /// Advisory findings, in checker order
    pub warnings: Vec<String>,

    /// Conditions that force rejection, in checker order
    pub blockers: Vec<String>,

    /// Suggested follow-ups, in checker order
    pub recommendations: Vec<String>,

    pub evaluated_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Fail-closed verdict carrying a single blocker and zero permitted size
    pub fn rejected(blocker: impl Into<String>) -> Self {
        Self {
            approved: false,
            risk_score: 1.0,
            adjusted_quantity: 0.0,
            warnings: Vec::new(),
            blockers: vec![blocker.into()],
            recommendations: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }
}

/// One checker's contribution to an assessment
#[derive(Debug, Clone, Default)]
pub struct PartialAssessment {
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
    pub recommendations: Vec<String>,

    /// Proposed reduced quantity, if the checker wants the trade shrunk
    pub adjustment: Option<f64>,
}

impl PartialAssessment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn block(&mut self, message: impl Into<String>) {
        self.blockers.push(message.into());
    }

    pub fn recommend(&mut self, message: impl Into<String>) {
        self.recommendations.push(message.into());
    }

    /// Propose a reduced quantity; the smallest proposal wins
    pub fn adjust(&mut self, quantity: f64) {
        self.adjustment = Some(match self.adjustment {
            Some(current) => current.min(quantity),
            None => quantity,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.blockers.is_empty() && self.adjustment.is_none()
    }
}

/// Accumulator for an in-progress evaluation
#[derive(Debug, Clone)]
pub struct AssessmentDraft {
    original_quantity: f64,
    adjusted_quantity: f64,
    warnings: Vec<String>,
    blockers: Vec<String>,
    recommendations: Vec<String>,
}

impl AssessmentDraft {
    pub fn new(requested_quantity: f64) -> Self {
        Self {
            original_quantity: requested_quantity,
            adjusted_quantity: requested_quantity,
            warnings: Vec::new(),
            blockers: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Fold one partial into the draft.
    ///
    /// Findings are concatenated in call order; the adjusted quantity only
    /// ever moves down, to the minimum proposal seen so far.
    pub fn merge(mut self, partial: PartialAssessment) -> Self {
        self.warnings.extend(partial.warnings);
        self.blockers.extend(partial.blockers);
        self.recommendations.extend(partial.recommendations);

        if let Some(proposed) = partial.adjustment {
            let clamped = proposed.clamp(0.0, self.original_quantity);
            if clamped < self.adjusted_quantity {
                self.adjusted_quantity = clamped;
            }
        }

        self
    }

    /// Seal the draft into an immutable assessment.
    ///
    /// Blockers dominate: any blocker forces `approved = false` and a risk
    /// score of exactly 1.0. Otherwise the score grows with the fraction of
    /// quantity cut away and the number of warnings, capped below 1.0.
    pub fn finalize(self) -> RiskAssessment {
        let blocked = !self.blockers.is_empty();

        let risk_score = if blocked {
            1.0
        } else {
            let cut_fraction = if self.original_quantity > 0.0 {
                (self.original_quantity - self.adjusted_quantity) / self.original_quantity
            } else {
                0.0
            };
            (CUT_WEIGHT * cut_fraction + WARNING_WEIGHT * self.warnings.len() as f64)
                .min(SCORE_CEILING)
        };

        RiskAssessment {
            approved: !blocked,
            risk_score,
            adjusted_quantity: self.adjusted_quantity,
            warnings: self.warnings,
            blockers: self.blockers,
            recommendations: self.recommendations,
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(msg: &str) -> PartialAssessment {
        let mut partial = PartialAssessment::new();
        partial.warn(msg);
        partial
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut blocker = PartialAssessment::new();
        blocker.block("halted");

        let assessment = AssessmentDraft::new(1.0)
            .merge(warning("first"))
            .merge(warning("second"))
            .merge(blocker)
            .finalize();

        assert_eq!(assessment.warnings, vec!["first", "second"]);
        assert_eq!(assessment.blockers, vec!["halted"]);
    }

    #[test]
    fn test_adjustment_takes_minimum_and_never_increases() {
        let mut small = PartialAssessment::new();
        small.adjust(0.2);
        let mut large = PartialAssessment::new();
        large.adjust(5.0); // above the requested quantity

        let assessment = AssessmentDraft::new(1.0)
            .merge(large)
            .merge(small)
            .finalize();

        assert_eq!(assessment.adjusted_quantity, 0.2);

        let untouched = AssessmentDraft::new(1.0).finalize();
        assert_eq!(untouched.adjusted_quantity, 1.0);
    }

    #[test]
    fn test_blocker_forces_max_risk() {
        let mut partial = PartialAssessment::new();
        partial.block("drawdown");

        let assessment = AssessmentDraft::new(1.0).merge(partial).finalize();

        assert!(!assessment.approved);
        assert_eq!(assessment.risk_score, 1.0);
    }

    #[test]
    fn test_unblocked_score_stays_below_one() {
        let mut draft = AssessmentDraft::new(1.0);
        for i in 0..50 {
            draft = draft.merge(warning(&format!("w{i}")));
        }
        let mut cut = PartialAssessment::new();
        cut.adjust(0.0);
        let assessment = draft.merge(cut).finalize();

        assert!(assessment.approved);
        assert!(assessment.risk_score < 1.0);
        assert_eq!(assessment.risk_score, 0.99);
    }

    #[test]
    fn test_clean_evaluation_scores_zero() {
        let assessment = AssessmentDraft::new(2.5)
            .merge(PartialAssessment::new())
            .finalize();

        assert!(assessment.approved);
        assert_eq!(assessment.risk_score, 0.0);
        assert_eq!(assessment.adjusted_quantity, 2.5);
    }

    #[test]
    fn test_rejected_constructor_is_fail_closed() {
        let assessment = RiskAssessment::rejected("Risk evaluation system error: boom");
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.adjusted_quantity, 0.0);
        assert_eq!(assessment.blockers.len(), 1);
    }
}
