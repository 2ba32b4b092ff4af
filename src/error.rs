//! Error types for the selection engine.

use thiserror::Error;

/// Errors surfaced by the store, index, ranker, selectors and benchmark.
#[derive(Debug, Error)]
pub enum Error {
    /// Query text was empty or blank, or `k` was zero.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No registered agent is selectable.
    #[error("Agent pool is empty")]
    EmptyPool,

    /// An operation referenced an unknown agent id.
    #[error("Agent '{0}' not found")]
    NotFound(String),

    /// The embedding provider kept failing for one agent.
    #[error("Embedding unavailable for '{agent_id}' after {attempts} attempts: {reason}")]
    EmbeddingUnavailable {
        agent_id: String,
        attempts: u32,
        reason: String,
    },

    /// An operation exceeded its deadline.
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Agent record violates a data model invariant.
    #[error("Invalid agent '{id}': {reason}")]
    InvalidAgent { id: String, reason: String },

    /// Provider returned a vector the index cannot store.
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// Provider with this name already registered.
    #[error("Provider '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raw provider failure, retried by the index before it becomes
    /// [`Error::EmbeddingUnavailable`].
    #[error("Provider '{provider}' failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the index should retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider { .. } | Error::Timeout { .. })
    }

    pub(crate) fn invalid_agent(id: &str, reason: impl Into<String>) -> Self {
        Error::InvalidAgent {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for selection engine operations.
pub type Result<T> = std::result::Result<T, Error>;
