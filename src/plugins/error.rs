//! Error types for the plugin system.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering, loading or managing plugins.
///
/// Most of these are soft at the service boundary: the registry and loader log
/// them and skip the offending plugin rather than failing the whole operation.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Manifest not found in plugin directory: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Not a plugin package (no \"lantern\" declaration): {0}")]
    NotAPlugin(PathBuf),

    #[error("Invalid manifest in {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Entry module for plugin '{plugin}' not found at {path}")]
    EntryNotFound { plugin: String, path: PathBuf },

    #[error("Failed to load plugin '{plugin}': {message}")]
    LoadFailed { plugin: String, message: String },

    #[error("Plugin '{plugin}' does not export {export}")]
    MissingExport {
        plugin: String,
        export: &'static str,
    },

    #[error("Plugin '{0}' is not user-installed and cannot be removed")]
    NotRemovable(String),

    #[error("Plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("No plugin root configured for {0} plugins")]
    NoRoot(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Error raised by a plugin module while servicing a call.
///
/// Carries the plugin-reported stack when one is available so discovery
/// failures can be logged with full detail.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModuleError {
    pub message: String,
    pub stack: Option<String>,
}

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        if !stack.trim().is_empty() {
            self.stack = Some(stack);
        }
        self
    }
}

/// Result type for calls into a plugin module.
pub type ModuleResult<T> = Result<T, ModuleError>;
