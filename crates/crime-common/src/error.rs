//! Error types for the crime ETL pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the pipeline
///
/// Every variant aborts the current run. The orchestrator hands these back
/// to its caller as-is, so the variant is the root cause.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Bad or missing parameters detected at construction / config load.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fetch failure or a payload that is not a JSON array of objects.
    #[error("Network error: {0}")]
    Network(String),

    /// An expected column or table schema is absent.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A field value could not be converted.
    #[error("Data error: {0}")]
    Data(String),

    /// Operation on a table that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Warehouse backend failure.
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EtlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn warehouse(msg: impl Into<String>) -> Self {
        Self::Warehouse(msg.into())
    }

    /// Short, stable label for the variant, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Configuration(_) => "configuration",
            EtlError::Network(_) => "network",
            EtlError::Schema(_) => "schema",
            EtlError::Data(_) => "data",
            EtlError::NotFound(_) => "not_found",
            EtlError::Storage(_) => "storage",
            EtlError::Warehouse(_) => "warehouse",
            EtlError::Io(_) => "io",
            EtlError::Serialization(_) => "serialization",
            EtlError::Csv(_) => "csv",
        }
    }
}
