//! Error types for view surfaces.

use thiserror::Error;

/// Errors from view surface operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("No parent window to attach view '{0}' to")]
    NoParentWindow(String),

    #[error("View '{0}' not found")]
    NotFound(String),

    #[error("Failed to create surface for view '{view_id}': {message}")]
    SurfaceCreation { view_id: String, message: String },

    #[error("Surface for view '{view_id}' failed to load content: {message}")]
    ContentLoad { view_id: String, message: String },

    #[error("Failed to deliver message to view '{view_id}': {message}")]
    Delivery { view_id: String, message: String },
}

/// Result type for view operations.
pub type ViewResult<T> = Result<T, ViewError>;
