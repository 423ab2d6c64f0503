use std::path::PathBuf;
use thiserror::Error;

/// Problems with the user-supplied location codes. Always fatal, and always
/// reported before any request is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("Invalid location code format: {0}")]
    InvalidFormat(String),

    #[error("Location codes must have same prefix: {start} vs {end}")]
    PrefixMismatch { start: String, end: String },

    #[error("Start code must be <= end code: {start} vs {end}")]
    ReversedRange { start: u64, end: u64 },

    #[error("No valid location codes found")]
    Empty,
}

/// Outcome of a single failed request against a provider endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The endpoint said the entity does not exist. Permanent.
    #[error("not found")]
    NotFound,

    /// Anything else; retried on the next pass.
    #[error("{0}")]
    Transient(String),
}

impl FetchError {
    pub fn transient(cause: impl ToString) -> Self {
        Self::Transient(cause.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that escape the per-request isolation of a phase. These end the
/// pipeline.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Request task failed outside its isolation boundary: {0}")]
    Join(#[from] tokio::task::JoinError),
}
