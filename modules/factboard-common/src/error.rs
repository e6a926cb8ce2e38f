use thiserror::Error;

use crate::resilience::Transient;

#[derive(Error, Debug)]
pub enum FactboardError {
    /// Reset, timeout, refused connection or gateway failure on any I/O
    /// boundary. Retried by the resilience layer.
    #[error("Transient connection error: {0}")]
    TransientConnection(String),

    /// Model output was not a JSON object or lacked a required field. The
    /// record is skipped; retrying the same request rarely helps.
    #[error("LLM response parse error: {0}")]
    LlmResponseParse(String),

    /// Terminal model-side failure (auth, protocol).
    #[error("LLM error: {0}")]
    Llm(String),

    /// The sink's uniqueness constraint does not match the intended
    /// conflict key.
    #[error("Upsert conflict: {0}")]
    UpsertConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Transient for FactboardError {
    fn is_transient(&self) -> bool {
        matches!(self, FactboardError::TransientConnection(_))
    }
}

/// Keyword check for driver errors that only surface as text.
pub fn looks_like_connection_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "server disconnected",
        "connection",
        "timeout",
        "timed out",
        "network",
        "reset",
        "broken pipe",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}
