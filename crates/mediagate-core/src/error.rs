//! Error types for inbound event parsing.
//!
//! Parse failures are never retried: a message that cannot be decoded today will not
//! decode after redelivery either, so handlers log it and acknowledge it.

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unknown event format")]
    UnknownFormat,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
