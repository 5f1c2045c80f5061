//! Error types for blockrepo

use thiserror::Error;

/// Result type alias for blockrepo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blockrepo operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Importer is already running")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Repository is locked")]
    Locked,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        match err.into_io_error() {
            Some(io) => Error::Io(io),
            // Loop detection is the only walk failure without an io::Error
            None => Error::Io(std::io::Error::other(message)),
        }
    }
}
