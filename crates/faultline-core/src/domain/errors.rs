//! Domain error types

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown severity level string
    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    /// Unknown process status string
    #[error("Invalid process status: {0}")]
    InvalidStatus(String),

    /// Collector endpoint is missing or malformed
    #[error("Invalid collector endpoint: {0}")]
    InvalidCollector(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
