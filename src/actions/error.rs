//! Error types for action execution.

use thiserror::Error;

/// Errors surfaced to the caller of [`ExecutionEngine::execute`](super::ExecutionEngine::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
    #[error("Invalid action id '{0}': expected 'pluginId:actionId'")]
    InvalidActionId(String),

    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Module for plugin '{plugin}' is unavailable: {reason}")]
    ModuleUnavailable { plugin: String, reason: String },

    #[error("Action '{0}' not found")]
    ActionNotFound(String),

    #[error("Action '{0}' is currently executing")]
    AlreadyExecuting(String),

    #[error("Action '{global_id}' failed: {message}")]
    Failed { global_id: String, message: String },
}

/// Result type for action execution.
pub type ExecuteResult<T> = Result<T, ExecuteError>;
