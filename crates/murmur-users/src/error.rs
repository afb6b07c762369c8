use std::path::PathBuf;

use thiserror::Error;

/// Errors from the durable policy store.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
