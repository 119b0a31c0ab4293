//! Invocation error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::providers::ProviderError;

/// Coarse error family, used for exit codes and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Connection,
    RateLimit,
    Validation,
    Security,
    Configuration,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Connection => write!(f, "connection"),
            ErrorClass::RateLimit => write!(f, "rate_limit"),
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Security => write!(f, "security"),
            ErrorClass::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors from an invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Validation failed: {}", failed.join(", "))]
    Validation { failed: Vec<String> },

    #[error("Security check blocked {stage}: {}", patterns.join(", "))]
    Security { stage: String, patterns: Vec<String> },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RuntimeError::Connection(_) | RuntimeError::Timeout(_) => ErrorClass::Connection,
            RuntimeError::RateLimited { .. } => ErrorClass::RateLimit,
            RuntimeError::Validation { .. } => ErrorClass::Validation,
            RuntimeError::Security { .. } => ErrorClass::Security,
            RuntimeError::Configuration(_) => ErrorClass::Configuration,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Connection(_) => "CONNECTION_ERROR",
            RuntimeError::Timeout(_) => "TIMEOUT",
            RuntimeError::RateLimited { .. } => "RATE_LIMITED",
            RuntimeError::Validation { .. } => "VALIDATION_FAILED",
            RuntimeError::Security { .. } => "SECURITY_BLOCKED",
            RuntimeError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether the same call may succeed if tried again later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Connection | ErrorClass::RateLimit
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RuntimeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<ProviderError> for RuntimeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::HttpError(msg) => RuntimeError::Connection(msg),
            ProviderError::ApiError { status, message } => {
                RuntimeError::Connection(format!("API returned {}: {}", status, message))
            }
            ProviderError::ParseError(msg) => {
                RuntimeError::Connection(format!("unreadable provider response: {}", msg))
            }
            ProviderError::Timeout(after) => RuntimeError::Timeout(after),
            ProviderError::RateLimited { retry_after } => RuntimeError::RateLimited { retry_after },
            ProviderError::AuthError => {
                RuntimeError::Configuration("provider rejected the API credential".to_string())
            }
            ProviderError::NotConfigured(msg) => RuntimeError::Configuration(msg),
        }
    }
}
