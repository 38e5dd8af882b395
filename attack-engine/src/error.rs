//! Error types for the attack engine

use thiserror::Error;

/// Main error type for attack engine operations
#[derive(Debug, Error, Clone, serde::Serialize, serde::Deserialize)]
pub enum AttackError {
    #[error("Request execution failed: {error}")]
    ExecutionFailed { error: String },

    #[error("Network error: {details}")]
    NetworkError { details: String },

    #[error("Race plan invalid: {reason}")]
    InvalidPlan { reason: String },

    #[error("Serialization error: {error}")]
    SerializationError { error: String },

    #[error("Input validation failed: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Timeout occurred: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("I/O error: {details}")]
    Io { details: String },
}

impl AttackError {
    /// Create a validation error with field and reason
    pub fn validation(field: &str, reason: &str) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: &str, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            duration_ms,
        }
    }

    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AttackError::NetworkError { .. } | AttackError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for AttackError {
    fn from(error: serde_json::Error) -> Self {
        AttackError::SerializationError {
            error: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for AttackError {
    fn from(error: toml::de::Error) -> Self {
        AttackError::SerializationError {
            error: error.to_string(),
        }
    }
}

impl From<std::io::Error> for AttackError {
    fn from(error: std::io::Error) -> Self {
        AttackError::Io {
            details: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for AttackError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AttackError::timeout("http request", 0)
        } else {
            AttackError::NetworkError {
                details: error.to_string(),
            }
        }
    }
}

/// Result type alias for attack engine operations
pub type AttackResult<T> = Result<T, AttackError>;
