use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Rejected raw record: {0}")]
    RejectedRawRecord(String),

    #[error("Invalid record for company '{company_code}' year '{year}': {reason}")]
    InvalidRecord {
        company_code: String,
        year: String,
        reason: String,
    },

    #[error("Merge unavailable: {0}")]
    MergeUnavailable(#[from] MergeUnavailable),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Why the LLM merge path could not produce a usable record.
///
/// Every variant is non-fatal: the pipeline answers it with the priority
/// resolver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeUnavailable {
    #[error("LLM merge is disabled")]
    Disabled,

    #[error("merge request timed out after {0:?}")]
    Timeout(Duration),

    #[error("merge service rate limited or out of quota: {0}")]
    RateLimited(String),

    #[error("merge service transport failure: {0}")]
    Transport(String),

    #[error("malformed merge response: {0}")]
    Malformed(String),

    #[error("merge response violates the canonical schema: {0}")]
    SchemaViolation(#[from] SchemaViolation),
}

impl MergeUnavailable {
    /// Stable label used as a metrics key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::SchemaViolation(_) => "schema_violation",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' has unsupported value type {found}")]
    WrongType { field: String, found: String },

    #[error("value {value} for field '{field}' is not reported by any candidate")]
    Untraceable { field: String, value: String },
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
