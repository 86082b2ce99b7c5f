//! Error types for the Linna host process.
//!
//! These cover startup and infrastructure failures. Errors returned to RPC
//! callers live in [`crate::runtime::error`].

use thiserror::Error;

/// Common error type for the Linna host.
#[derive(Error, Debug)]
pub enum LinnaError {
    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for configuration or input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Script loading or execution error.
    #[error("script error: {0}")]
    Script(String),

    /// Function registration error.
    ///
    /// Raised during the startup initialization pass and always fatal.
    #[error("registration error: {0}")]
    Registration(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for LinnaError {
    fn from(e: sqlx::Error) -> Self {
        LinnaError::Database(e.to_string())
    }
}

impl From<mlua::Error> for LinnaError {
    fn from(e: mlua::Error) -> Self {
        LinnaError::Script(e.to_string())
    }
}

/// Result type alias for Linna host operations.
pub type Result<T> = std::result::Result<T, LinnaError>;
