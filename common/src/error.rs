//! Engine-wide error taxonomy

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by engine operations.
///
/// `ModelNotFound`/`PredictionNotFound`/`TestNotFound` and `InvalidInput`
/// are returned to callers as-is. `UpstreamUnavailable` is absorbed inside
/// trade evaluation with a fallback and a warning annotation. `SystemError`
/// never escapes `evaluate_trade` as an error: it degrades to a blocked
/// assessment instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("prediction not found: {0}")]
    PredictionNotFound(Uuid),

    #[error("A/B test not found: {0}")]
    TestNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    SystemError(String),
}
