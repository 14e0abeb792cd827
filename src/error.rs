//! Error types for Stellar Screen

use thiserror::Error;

/// Errors that can occur while scoring, encoding, or predicting
#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("Age {0} is outside the supported range 4-17")]
    AgeOutOfRange(i64),

    #[error("Record age {got} does not match screening age {expected}")]
    AgeMismatch { expected: u8, got: u8 },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed feature payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported payload encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Empty payload body")]
    EmptyBody,

    #[error("Prediction request failed: {0}")]
    PredictionTransport(String),

    #[error("Prediction endpoint returned HTTP {status}: {body}")]
    PredictionStatus { status: u16, body: String },

    #[error("Invalid prediction response: {0}")]
    InvalidPrediction(String),

    #[error("Session has not finished: {0}")]
    SessionNotFinished(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ScreeningError {
    /// Whether a retry by the user could succeed (transport-level failures)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScreeningError::PredictionTransport(_)
                | ScreeningError::PredictionStatus { .. }
                | ScreeningError::InvalidPrediction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ScreeningError::PredictionTransport("timeout".into()).is_retryable());
        assert!(ScreeningError::PredictionStatus {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ScreeningError::EmptyBody.is_retryable());
        assert!(!ScreeningError::AgeOutOfRange(3).is_retryable());
        assert!(!ScreeningError::AgeMismatch { expected: 8, got: 12 }.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ScreeningError::PredictionStatus {
            status: 500,
            body: "Error running prediction".into(),
        };
        assert_eq!(
            err.to_string(),
            "Prediction endpoint returned HTTP 500: Error running prediction"
        );
        let err = ScreeningError::AgeMismatch { expected: 8, got: 12 };
        assert_eq!(err.to_string(), "Record age 12 does not match screening age 8");
    }
}
