//! Error types for wacast.

use thiserror::Error;

/// All errors produced by wacast crates.
#[derive(Debug, Error)]
pub enum WacastError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Campaign error: {0}")]
    Campaign(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, WacastError>;
