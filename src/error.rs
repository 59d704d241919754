//! Error types for Synheart Coach

use thiserror::Error;

/// Errors that can occur anywhere in the coaching pipeline
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unsupported device type: {0}")]
    UnsupportedDevice(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Coach orchestrator is not initialized")]
    NotInitialized,

    #[error("Intervention plan not found for user: {0}")]
    PlanNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),
}

pub type Result<T> = std::result::Result<T, CoachError>;
