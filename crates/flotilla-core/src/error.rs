//! Error types for parsing core values.

use thiserror::Error;

/// Result type alias for core parsing operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while parsing filters, states, and actions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown filter key: {0}")]
    UnknownFilterKey(String),

    #[error("invalid slot state: {0}")]
    InvalidSlotState(String),

    #[error("invalid agent state: {0}")]
    InvalidAgentState(String),

    #[error("invalid slot action: {0}")]
    InvalidSlotAction(String),

    #[error("invalid instance role: {0}")]
    InvalidRole(String),
}
