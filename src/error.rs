//! Error types for Lantern
//!
//! Each subsystem has its own error enum; `LanternError` wraps them at the
//! runtime and IPC boundary.

use thiserror::Error;

use crate::actions::ExecuteError;
use crate::config::ConfigError;
use crate::plugins::PluginError;
use crate::windows::ViewError;

/// Errors that can occur in Lantern
#[derive(Debug, Error)]
pub enum LanternError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed IPC request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Lantern operations
pub type LanternResult<T> = Result<T, LanternError>;
