//! Crate-wide error type.
//!
//! DESIGN DECISION: machinery errors (inside a pipeline layer) and policy
//! errors (a message was denied) are different regimes. `Error` here only
//! ever represents the former plus construction-time failures; a BLOCKED
//! verdict is carried by [`crate::orchestrator::SecurityViolation`], a
//! distinct type that callers cannot accidentally swallow with a generic
//! `match Error { ... }`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Construction-time configuration problem (bad thresholds, bad paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedder used for a query does not match the dimension or
    /// identity the index was created with.
    #[error("embedder mismatch: index expects {expected}, got {actual}")]
    EmbedderMismatch { expected: String, actual: String },

    /// HNSW / persistence write failure. Reads fail open and never
    /// surface this variant (see `hnsw_index.rs`).
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// Underlying SQLite error, wrapped for the persisted metadata store.
    #[error("storage error: {0}")]
    Storage(String),

    /// A layer-internal failure that could not be classified more
    /// specifically. Callers see this only via `LayerVerdict.error`,
    /// never propagated out of `dispatch`.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Serialization failure (witness entries, audit payloads).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Agent registry violations: duplicate id, capacity exceeded.
    #[error("agent registry error: {0}")]
    AgentRegistry(String),

    /// Generic I/O failure (model artifact load, backup rotation).
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("flag_score >= block_score".to_string());
        assert_eq!(err.to_string(), "configuration error: flag_score >= block_score");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing artifact");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("missing artifact")),
            _ => panic!("expected Io error"),
        }
    }
}
