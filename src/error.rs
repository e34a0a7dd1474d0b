// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Lower layers surface these typed errors; engines catch per-slot calculation
// failures (emitting nil values) while terminal failures propagate to the
// caller. Transient store errors are the only retryable kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A parameter failed its type / range / enum check.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// `base_indicator_type` is not registered.
    #[error("unknown indicator type '{indicator_type}'; available: {available:?}")]
    UnknownAlgorithm {
        indicator_type: String,
        available: Vec<String>,
    },

    #[error("variant not found: {0}")]
    VariantNotFound(String),

    #[error("backtest session not found: {0}")]
    SessionNotFound(String),

    #[error("indicator not found: {0}")]
    IndicatorNotFound(String),

    /// Every value in a series was nil / all windows were empty.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// An algorithm failed unexpectedly for one slot.
    #[error("calculation error: {0}")]
    Calculation(String),

    /// WAL-visibility lag or a connection blip; retryable.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// Constraint or schema violation; not retryable.
    #[error("store error: {0}")]
    FatalStore(String),

    /// A cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether a store read hitting this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientStore(_))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_detection() {
        assert!(EngineError::TransientStore("lag".into()).is_transient());
        assert!(!EngineError::FatalStore("schema".into()).is_transient());
        assert!(!EngineError::Cancelled.is_transient());
    }

    #[test]
    fn unknown_algorithm_lists_available() {
        let err = EngineError::UnknownAlgorithm {
            indicator_type: "NOPE".into(),
            available: vec!["TWPA".into(), "RSI".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("NOPE"));
        assert!(msg.contains("TWPA"));
    }
}
