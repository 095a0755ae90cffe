//! # Error Types
//!
//! Custom error types for Soil Link using `thiserror`.

use thiserror::Error;

use crate::formula::FormulaError;
use crate::radio::RadioError;
use crate::session::Permission;

/// Main error type for Soil Link
#[derive(Debug, Error)]
pub enum SoilLinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Radio collaborator errors
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// The operator has not granted the radio permission an operation needs
    #[error("Permission denied: {0}")]
    PermissionDenied(Permission),

    /// Commands can only be sent over a ready link
    #[error("No ready link to send commands on")]
    NotReady,

    /// Command text was blank after trimming
    #[error("Command is empty")]
    EmptyCommand,

    /// Command text is not part of the device vocabulary
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Formula parse or evaluation errors
    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    /// Equation bookkeeping errors
    #[error("Equation error: {0}")]
    Equation(String),
}

/// Result type alias for Soil Link
pub type Result<T> = std::result::Result<T, SoilLinkError>;
