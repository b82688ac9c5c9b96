//! Capabilities a loaded plugin module may expose.
//!
//! A plugin module is a set of independently optional capabilities. Callers
//! check for a capability before invoking it instead of assuming the module
//! implements everything:
//!
//! | Export           | Trait                   | Required |
//! |------------------|-------------------------|----------|
//! | `getActions`     | [`ActionProvider`]      | yes      |
//! | `executeAction`  | [`ActionExecutor`]      | no       |
//! | `getViewContent` | [`ViewContentProvider`] | no       |

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ModuleResult;

pub const EXPORT_GET_ACTIONS: &str = "getActions";
pub const EXPORT_EXECUTE_ACTION: &str = "executeAction";
pub const EXPORT_GET_VIEW_CONTENT: &str = "getViewContent";

/// Arguments passed to a plugin's action listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionQuery {
    pub keyword: String,
    /// Name of the application the launcher is overlaid on.
    pub overlaid_app: String,
}

/// Action descriptor exactly as a plugin returned it, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub view_path: Option<String>,

    /// Plugin-specific fields, passed back untouched on execution.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawAction {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_view(mut self, view_path: impl Into<String>) -> Self {
        self.view_path = Some(view_path.into());
        self
    }
}

/// Lists the actions a plugin offers for a query (`getActions`).
pub trait ActionProvider: Send + Sync {
    fn get_actions(&self, query: &ActionQuery) -> ModuleResult<Vec<RawAction>>;
}

/// Runs one of the plugin's actions (`executeAction`).
pub trait ActionExecutor: Send + Sync {
    fn execute_action(&self, action: &RawAction, keyword: &str) -> ModuleResult<Value>;
}

/// Renders a plugin view to HTML (`getViewContent`).
pub trait ViewContentProvider: Send + Sync {
    fn get_view_content(&self, view_path: &str) -> ModuleResult<String>;
}

/// A loaded plugin module: each capability is present or absent.
#[derive(Clone, Default)]
pub struct PluginModule {
    pub provider: Option<Arc<dyn ActionProvider>>,
    pub executor: Option<Arc<dyn ActionExecutor>>,
    pub views: Option<Arc<dyn ViewContentProvider>>,
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginModule")
            .field("exports", &self.exports())
            .finish()
    }
}

impl PluginModule {
    /// Module with only the required listing capability.
    pub fn with_provider(provider: Arc<dyn ActionProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Default::default()
        }
    }

    /// Module backed by one value implementing every capability.
    pub fn full<T>(module: Arc<T>) -> Self
    where
        T: ActionProvider + ActionExecutor + ViewContentProvider + 'static,
    {
        Self {
            provider: Some(module.clone()),
            executor: Some(module.clone()),
            views: Some(module),
        }
    }

    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn views(mut self, views: Arc<dyn ViewContentProvider>) -> Self {
        self.views = Some(views);
        self
    }

    /// Names of the exports this module provides.
    pub fn exports(&self) -> Vec<&'static str> {
        let mut exports = Vec::new();
        if self.provider.is_some() {
            exports.push(EXPORT_GET_ACTIONS);
        }
        if self.executor.is_some() {
            exports.push(EXPORT_EXECUTE_ACTION);
        }
        if self.views.is_some() {
            exports.push(EXPORT_GET_VIEW_CONTENT);
        }
        exports
    }
}
