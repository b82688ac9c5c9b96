//! JSON request/response surface for the UI layer.
//!
//! Requests are `{"method": "...", "params": {...}}`; responses are
//! `{"ok": true, "data": ...}` or `{"ok": false, "error": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::actions::DiscoveryContext;
use crate::error::{LanternError, LanternResult};
use crate::runtime::Runtime;
use crate::windows::{Bounds, ViewSource};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum IpcRequest {
    #[serde(rename_all = "camelCase")]
    GetActions {
        #[serde(default)]
        keyword: String,
        #[serde(default)]
        overlaid_app: String,
    },
    #[serde(rename_all = "camelCase")]
    ExecuteAction {
        global_id: String,
        #[serde(default)]
        keyword: String,
    },
    #[serde(rename_all = "camelCase")]
    OpenActionView {
        global_id: String,
        #[serde(default)]
        bounds: Option<Bounds>,
    },
    #[serde(rename_all = "camelCase")]
    CreateView {
        view_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        plugin_id: Option<String>,
        #[serde(default)]
        view_path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ShowView {
        view_id: String,
        #[serde(default)]
        bounds: Option<Bounds>,
    },
    #[serde(rename_all = "camelCase")]
    HideView { view_id: String },
    #[serde(rename_all = "camelCase")]
    DestroyView { view_id: String },
    #[serde(rename_all = "camelCase")]
    ToggleDevTools { view_id: String },
    ListPlugins,
    UninstallPlugin { id: String },
    ToggleWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<LanternResult<Value>> for IpcResponse {
    fn from(result: LanternResult<Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::failure(e),
        }
    }
}

/// Run one request against the runtime.
pub async fn dispatch(runtime: &Runtime, request: IpcRequest) -> LanternResult<Value> {
    let data = match request {
        IpcRequest::GetActions {
            keyword,
            overlaid_app,
        } => {
            let context = DiscoveryContext {
                overlaid_app_name: overlaid_app,
            };
            serde_json::to_value(runtime.get_actions(&keyword, &context).await)?
        }
        IpcRequest::ExecuteAction { global_id, keyword } => {
            runtime.execute_action(&global_id, &keyword).await?
        }
        IpcRequest::OpenActionView { global_id, bounds } => {
            serde_json::to_value(runtime.open_action_view(&global_id, bounds).await?)?
        }
        IpcRequest::CreateView {
            view_id,
            content,
            plugin_id,
            view_path,
        } => {
            let source = ViewSource {
                content,
                plugin_id,
                view_path,
            };
            serde_json::to_value(runtime.create_view(&view_id, source).await?)?
        }
        IpcRequest::ShowView { view_id, bounds } => {
            serde_json::to_value(runtime.show_view(&view_id, bounds)?)?
        }
        IpcRequest::HideView { view_id } => json!(runtime.hide_view(&view_id)),
        IpcRequest::DestroyView { view_id } => json!(runtime.destroy_view(&view_id)),
        IpcRequest::ToggleDevTools { view_id } => {
            runtime.toggle_dev_tools(&view_id)?;
            Value::Null
        }
        IpcRequest::ListPlugins => serde_json::to_value(&*runtime.list_plugins())?,
        IpcRequest::UninstallPlugin { id } => {
            serde_json::to_value(&*runtime.uninstall_plugin(&id)?)?
        }
        IpcRequest::ToggleWindow => json!(runtime.toggle_window()),
    };
    Ok(data)
}

/// Decode, dispatch and encode a request. Never fails: errors become
/// `{"ok": false}` responses.
pub async fn handle_json(runtime: &Runtime, request: &str) -> String {
    let response: IpcResponse = match serde_json::from_str::<IpcRequest>(request) {
        Ok(request) => dispatch(runtime, request).await.into(),
        Err(e) => {
            warn!(error = %e, "malformed ipc request");
            IpcResponse::failure(LanternError::InvalidRequest(e.to_string()))
        }
    };

    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"ok":false,"error":{}}}"#,
            Value::String(format!("Failed to encode response: {}", e))
        )
    })
}
