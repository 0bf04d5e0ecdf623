//! Common error types for RIMP

use thiserror::Error;

/// Common result type for RIMP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across RIMP services
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed identity input (rut/dv/name)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Evidence rejected by the territorial catalog
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
