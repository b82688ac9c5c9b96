//! Script-backed plugin modules.
//!
//! A script plugin's entry file is run as a child process per call. The host
//! writes a single JSON request to stdin and reads a JSON response from the
//! last non-empty line of stdout:
//!
//! ```text
//! -> {"method": "getActions", "params": {"keyword": "git", "overlaidApp": ""}}
//! <- {"result": [{"id": "status", "title": "Git Status"}]}
//! <- {"error": {"message": "boom", "stack": "..."}}
//! ```
//!
//! Loading performs an `exports` handshake whose result lists the functions
//! the script implements.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::{ModuleError, ModuleResult, PluginError, PluginResult};
use super::module::{
    ActionExecutor, ActionProvider, ActionQuery, PluginModule, RawAction, ViewContentProvider,
    EXPORT_EXECUTE_ACTION, EXPORT_GET_ACTIONS, EXPORT_GET_VIEW_CONTENT,
};
use super::registry::PluginEntity;

/// Environment variable carrying the calling plugin's id.
const PLUGIN_ID_ENV: &str = "LANTERN_PLUGIN_ID";

/// Default limit for a single call into a script.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A plugin implemented as an external script.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    plugin_id: String,
    entry: PathBuf,
    working_dir: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Message(String),
    Detailed {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

impl ScriptModule {
    pub fn new(plugin: &PluginEntity) -> Self {
        Self {
            plugin_id: plugin.id.clone(),
            entry: plugin.entry_path.clone(),
            working_dir: plugin.path.clone(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Kill calls that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the `exports` handshake and build a module with matching capabilities.
    pub fn load(plugin: &PluginEntity) -> PluginResult<PluginModule> {
        Self::load_with_timeout(plugin, DEFAULT_CALL_TIMEOUT)
    }

    pub fn load_with_timeout(plugin: &PluginEntity, timeout: Duration) -> PluginResult<PluginModule> {
        let script = Arc::new(Self::new(plugin).with_timeout(timeout));

        let exports = script
            .call("exports", Value::Null)
            .map_err(|e| PluginError::LoadFailed {
                plugin: plugin.id.clone(),
                message: e.message,
            })?;

        let exports: Vec<String> =
            serde_json::from_value(exports).map_err(|e| PluginError::LoadFailed {
                plugin: plugin.id.clone(),
                message: format!("exports handshake returned an invalid list: {}", e),
            })?;

        debug!(plugin = %plugin.id, ?exports, "script module loaded");

        let has = |name: &str| exports.iter().any(|e| e == name);
        let mut module = PluginModule::default();
        if has(EXPORT_GET_ACTIONS) {
            module.provider = Some(script.clone());
        }
        if has(EXPORT_EXECUTE_ACTION) {
            module.executor = Some(script.clone());
        }
        if has(EXPORT_GET_VIEW_CONTENT) {
            module.views = Some(script);
        }
        Ok(module)
    }

    fn command(&self) -> Command {
        let mut command = match interpreter_for(&self.entry) {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.entry);
                command
            }
            None => Command::new(&self.entry),
        };
        command
            .current_dir(&self.working_dir)
            .env(PLUGIN_ID_ENV, &self.plugin_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Invoke one exported function and wait for its response.
    fn call(&self, method: &str, params: Value) -> ModuleResult<Value> {
        let mut child = self.command().spawn().map_err(|e| {
            ModuleError::new(format!(
                "failed to start {}: {}",
                self.entry.display(),
                e
            ))
        })?;

        let request = json!({ "method": method, "params": params });
        if let Some(mut stdin) = child.stdin.take() {
            // A script may exit without reading its input; that surfaces below
            // as a missing response rather than a write error.
            if let Err(e) = writeln!(stdin, "{}", request) {
                debug!(plugin = %self.plugin_id, method, error = %e, "script closed stdin early");
            }
        }

        // Drain the pipes on their own threads so a chatty script cannot
        // fill a pipe buffer and stall before the deadline.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(e) = child.kill() {
                        debug!(plugin = %self.plugin_id, error = %e, "failed to kill script");
                    }
                    let _ = child.wait();
                    warn!(
                        plugin = %self.plugin_id,
                        method,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "script call timed out, killed"
                    );
                    return Err(ModuleError::new(format!(
                        "{} timed out after {}ms",
                        method,
                        self.timeout.as_millis()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ModuleError::new(format!(
                        "failed to wait for script: {}",
                        e
                    )))
                }
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default()).into_owned();
        if !status.success() {
            return Err(ModuleError::new(format!(
                "{} exited with {}",
                method, status
            ))
            .with_stack(stderr));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| {
                ModuleError::new(format!("{} produced no response", method)).with_stack(&*stderr)
            })?;

        let response: Response = serde_json::from_str(line).map_err(|e| {
            ModuleError::new(format!("{} returned malformed JSON: {}", method, e))
        })?;

        match (response.error, response.result) {
            (Some(ErrorPayload::Message(message)), _) => Err(ModuleError::new(message)),
            (Some(ErrorPayload::Detailed { message, stack }), _) => {
                Err(ModuleError::new(message).with_stack(stack.unwrap_or_default()))
            }
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

impl ActionProvider for ScriptModule {
    fn get_actions(&self, query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
        let params = serde_json::to_value(query).map_err(|e| ModuleError::new(e.to_string()))?;
        let result = self.call(EXPORT_GET_ACTIONS, params)?;

        let Value::Array(items) = result else {
            return Err(ModuleError::new(format!(
                "getActions returned a non-array value: {}",
                type_name(&result)
            )));
        };

        Ok(items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).unwrap_or_else(|e| {
                    warn!(plugin = %self.plugin_id, error = %e, "unreadable action descriptor");
                    RawAction::default()
                })
            })
            .collect())
    }
}

impl ActionExecutor for ScriptModule {
    fn execute_action(&self, action: &RawAction, keyword: &str) -> ModuleResult<Value> {
        self.call(
            EXPORT_EXECUTE_ACTION,
            json!({ "action": action, "keyword": keyword }),
        )
    }
}

impl ViewContentProvider for ScriptModule {
    fn get_view_content(&self, view_path: &str) -> ModuleResult<String> {
        match self.call(EXPORT_GET_VIEW_CONTENT, json!({ "viewPath": view_path }))? {
            Value::String(html) => Ok(html),
            other => Err(ModuleError::new(format!(
                "getViewContent returned {} instead of a string",
                type_name(&other)
            ))),
        }
    }
}

fn drain<R>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Interpreter to run an entry file with, chosen by extension.
fn interpreter_for(entry: &Path) -> Option<&'static str> {
    match entry.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") | Some("cjs") => Some("node"),
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::SourceKind;
    use std::fs;

    fn entity(dir: &Path, entry: &str) -> PluginEntity {
        PluginEntity {
            id: "script".into(),
            name: "script".into(),
            title: "Script".into(),
            version: "1.0.0".into(),
            author: String::new(),
            description: String::new(),
            source_kind: SourceKind::User,
            path: dir.to_path_buf(),
            entry_path: dir.join(entry),
        }
    }

    #[test]
    fn test_interpreter_selection() {
        assert_eq!(interpreter_for(Path::new("a/index.js")), Some("node"));
        assert_eq!(interpreter_for(Path::new("plugin.py")), Some("python3"));
        assert_eq!(interpreter_for(Path::new("run.sh")), Some("sh"));
        assert_eq!(interpreter_for(Path::new("bin/plugin")), None);
    }

    #[test]
    fn test_error_payload_shapes() {
        let r: Response = serde_json::from_str(r#"{"error":"plain"}"#).unwrap();
        assert!(matches!(r.error, Some(ErrorPayload::Message(_))));

        let r: Response =
            serde_json::from_str(r#"{"error":{"message":"m","stack":"at x"}}"#).unwrap();
        assert!(matches!(r.error, Some(ErrorPayload::Detailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_script_module() {
        let temp = tempfile::tempdir().unwrap();
        let script = r#"read line
case "$line" in
  *'"exports"'*) echo '{"result":["getActions","getViewContent"]}' ;;
  *'"getActions"'*) echo 'noise'; echo '{"result":[{"id":"hello","title":"Hello"}]}' ;;
  *'"getViewContent"'*) echo '{"result":"<h1>view</h1>"}' ;;
  *) echo '{"error":{"message":"unknown","stack":"at main"}}' ;;
esac
"#;
        fs::write(temp.path().join("plugin.sh"), script).unwrap();

        let plugin = entity(temp.path(), "plugin.sh");
        let module = ScriptModule::load(&plugin).unwrap();
        assert!(module.provider.is_some());
        assert!(module.executor.is_none());
        assert!(module.views.is_some());

        let actions = module
            .provider
            .as_ref()
            .unwrap()
            .get_actions(&ActionQuery::default())
            .unwrap();
        assert_eq!(actions, vec![RawAction::new("hello", "Hello")]);

        let html = module.views.as_ref().unwrap().get_view_content("x").unwrap();
        assert_eq!(html, "<h1>view</h1>");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_array_actions_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("plugin.sh"),
            "read line\necho '{\"result\":{\"id\":\"x\"}}'\n",
        )
        .unwrap();

        let script = ScriptModule::new(&entity(temp.path(), "plugin.sh"));
        let err = script.get_actions(&ActionQuery::default()).unwrap_err();
        assert!(err.message.contains("non-array"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("plugin.sh"),
            "read line\necho 'TypeError: undefined' >&2\nexit 3\n",
        )
        .unwrap();

        let err = ScriptModule::load(&entity(temp.path(), "plugin.sh")).unwrap_err();
        assert!(matches!(err, PluginError::LoadFailed { .. }));

        let script = ScriptModule::new(&entity(temp.path(), "plugin.sh"));
        let err = script.get_actions(&ActionQuery::default()).unwrap_err();
        assert!(err.stack.unwrap().contains("TypeError"));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_script_is_killed_at_deadline() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("plugin.sh"),
            "read line\nsleep 5\necho '{\"result\":[]}'\n",
        )
        .unwrap();

        let script = ScriptModule::new(&entity(temp.path(), "plugin.sh"))
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = script.get_actions(&ActionQuery::default()).unwrap_err();

        assert!(err.message.contains("timed out after 200ms"), "{}", err.message);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
