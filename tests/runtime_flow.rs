//! End-to-end flows through the runtime with headless host bindings.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lantern::plugins::{
    ActionExecutor, ActionProvider, ActionQuery, BuiltinModules, ModuleResult, PluginModule,
    PluginRoot, RawAction,
};
use lantern::windows::headless::{HeadlessScreen, HeadlessSurfaceBackend, HeadlessWindow};
use lantern::windows::NativeWindow;
use lantern::{
    Bounds, Config, DiscoveryContext, ExecuteError, HostBindings, Runtime, SourceKind, ViewSource,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn write_package(root: &Path, id: &str, manifest: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("package.json"), manifest).unwrap();
    fs::write(dir.join("index.js"), "").unwrap();
}

fn write_plugin(root: &Path, id: &str) {
    write_package(
        root,
        id,
        &format!(r#"{{ "name": "{id}", "version": "0.1.0", "main": "index.js", "lantern": {{ "id": "{id}" }} }}"#),
    );
}

/// Three well-formed actions and one without a title.
struct Mixed;

impl ActionProvider for Mixed {
    fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
        Ok(vec![
            RawAction::new("one", "One"),
            RawAction::new("two", "Two"),
            RawAction::new("three", "Three").with_view("three.html"),
            RawAction {
                id: Some("untitled".into()),
                ..Default::default()
            },
        ])
    }
}

impl ActionExecutor for Mixed {
    fn execute_action(&self, action: &RawAction, _keyword: &str) -> ModuleResult<Value> {
        Ok(json!({ "done": action.id }))
    }
}

/// Shared sink for formatted log lines.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _temp: TempDir,
    surfaces: Arc<HeadlessSurfaceBackend>,
    runtime: Runtime,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("plugins");
    write_plugin(&root, "A");
    // Declaration without an id: skipped, scan continues.
    write_package(
        &root,
        "broken",
        r#"{ "name": "broken", "main": "index.js", "lantern": { "title": "Broken" } }"#,
    );
    write_plugin(&root, "B");

    let mut builtin = BuiltinModules::new();
    builtin.register("A", || {
        let mixed = Arc::new(Mixed);
        PluginModule::with_provider(mixed.clone()).executor(mixed)
    });
    builtin.register("B", || {
        PluginModule::with_provider(Arc::new(Mixed)).executor(Arc::new(Mixed))
    });

    let surfaces = Arc::new(HeadlessSurfaceBackend::new());
    let host = HostBindings {
        surfaces: surfaces.clone(),
        screen: Arc::new(HeadlessScreen::default()),
    };
    let runtime = Runtime::with_roots(
        &Config::default(),
        vec![PluginRoot::new(SourceKind::Builtin, &root)],
        builtin,
        host,
    );
    runtime.scan();

    Fixture {
        _temp: temp,
        surfaces,
        runtime,
    }
}

#[tokio::test]
async fn invalid_manifest_is_skipped_and_scan_continues() {
    let f = fixture();

    let ids: Vec<_> = f.runtime.list_plugins().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec!["A", "B"]);
}

#[tokio::test]
async fn discovery_filters_invalid_actions() {
    let f = fixture();
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    // Current-thread runtime: the warning is emitted on this thread.
    let _guard = tracing::subscriber::set_default(subscriber);

    let actions = f.runtime.get_actions("", &DiscoveryContext::default()).await;
    let from_a: Vec<_> = actions.iter().filter(|a| a.plugin_id == "A").collect();

    assert_eq!(from_a.len(), 3);
    assert!(from_a.iter().all(|a| a.global_id.starts_with("A:")));
    assert!(from_a.iter().all(|a| a.validation.is_valid));

    let rejected: Vec<_> = logs
        .lines()
        .into_iter()
        .filter(|line| line.contains("invalid action descriptor"))
        .collect();
    let from_a: Vec<_> = rejected.iter().filter(|line| line.contains("plugin=A ")).collect();
    assert_eq!(from_a.len(), 1, "{:?}", rejected);
    assert!(from_a[0].contains("A:untitled"));
}

#[tokio::test]
async fn executing_unknown_plugin_fails() {
    let f = fixture();

    let err = f.runtime.execute_action("pluginX:doThing", "").await.unwrap_err();
    assert_eq!(err, ExecuteError::PluginNotFound("pluginX".into()));
    assert!(err.to_string().contains("pluginX"));
}

#[tokio::test]
async fn execution_emits_lifecycle_events() {
    let f = fixture();
    let mut events = f.runtime.subscribe();

    let result = f.runtime.execute_action("A:two", "").await.unwrap();
    assert_eq!(result, json!({ "done": "two" }));

    let before = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    let after = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(before["event"], "before-execute");
    assert_eq!(after["event"], "after-execute");
    assert_eq!(after["globalId"], "A:two");
}

#[tokio::test]
async fn recreated_view_keeps_single_surface_with_latest_bounds() {
    let f = fixture();
    f.runtime.attach_main_window(Arc::new(HeadlessWindow::new(1)));

    f.runtime
        .create_view("v1", ViewSource::inline("<p>one</p>"))
        .await
        .unwrap();
    f.runtime
        .create_view("v1", ViewSource::inline("<p>two</p>"))
        .await
        .unwrap();
    f.runtime
        .show_view("v1", Some(Bounds::new(0, 0, 100, 100)))
        .unwrap();
    let bounds = Bounds::new(0, 56, 700, 444);
    f.runtime.show_view("v1", Some(bounds)).unwrap();

    assert_eq!(f.surfaces.live_count(), 1);
    assert_eq!(f.surfaces.destroyed_count(), 1);
    assert_eq!(f.surfaces.bounds("v1"), Some(bounds));
    assert_eq!(f.surfaces.html("v1").as_deref(), Some("<p>two</p>"));
    assert!(f.surfaces.is_visible("v1"));
}

#[tokio::test]
async fn destroy_all_with_no_surfaces() {
    let f = fixture();

    assert_eq!(f.runtime.views().destroy_all(), 0);
    assert_eq!(f.runtime.views().destroy_all(), 0);
}

#[tokio::test]
async fn views_are_sandboxed() {
    let f = fixture();
    f.runtime.attach_main_window(Arc::new(HeadlessWindow::new(1)));

    f.runtime.show_view("v", None).unwrap();
    let preferences = f.surfaces.preferences("v").unwrap();
    assert!(preferences.context_isolation);
    assert!(preferences.sandbox);
    assert!(!preferences.host_integration);
}

#[tokio::test]
async fn missing_view_content_renders_error_page() {
    let f = fixture();
    f.runtime.attach_main_window(Arc::new(HeadlessWindow::new(1)));

    // A exports no getViewContent.
    let info = f.runtime.open_action_view("A:three", None).await.unwrap();
    assert_eq!(info.content, lantern::windows::ContentKind::ErrorPage);
    assert!(f.surfaces.html("A:three").unwrap().contains("getViewContent"));
}

#[tokio::test(start_paused = true)]
async fn blur_is_ignored_only_inside_guard_window() {
    let f = fixture();
    let window = Arc::new(HeadlessWindow::new(1));
    f.runtime.attach_main_window(window.clone());

    assert!(f.runtime.toggle_window());
    assert!(!f.runtime.main_window().handle_blur());
    assert!(window.is_visible());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(f.runtime.main_window().handle_blur());
    assert!(!window.is_visible());
}

#[cfg(unix)]
#[tokio::test]
async fn script_plugin_end_to_end() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("greeter");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("package.json"),
        r#"{ "name": "greeter", "main": "main.sh", "lantern": { "id": "greeter" } }"#,
    )
    .unwrap();
    fs::write(
        dir.join("main.sh"),
        r#"read line
case "$line" in
  *'"exports"'*) echo '{"result":["getActions","executeAction"]}' ;;
  *'"getActions"'*) echo '{"result":[{"id":"hello","title":"Say hello"}]}' ;;
  *'"executeAction"'*) echo '{"result":"hi from '"$LANTERN_PLUGIN_ID"'"}' ;;
esac
"#,
    )
    .unwrap();

    let runtime = Runtime::with_roots(
        &Config::default(),
        vec![PluginRoot::new(SourceKind::User, temp.path())],
        BuiltinModules::new(),
        HostBindings::headless(),
    );
    runtime.scan();

    let actions = runtime.get_actions("", &DiscoveryContext::default()).await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].global_id, "greeter:hello");

    let result = runtime.execute_action("greeter:hello", "").await.unwrap();
    assert_eq!(result, json!("hi from greeter"));
}

#[cfg(unix)]
#[tokio::test]
async fn hung_script_plugin_does_not_stall_discovery() {
    let temp = TempDir::new().unwrap();
    for (id, body) in [
        ("a-hang", "sleep 30"),
        ("b-good", r#"echo '{"result":[{"id":"ok","title":"Ok"}]}'"#),
    ] {
        let dir = temp.path().join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{ "name": "{id}", "main": "main.sh", "lantern": {{ "id": "{id}" }} }}"#),
        )
        .unwrap();
        fs::write(
            dir.join("main.sh"),
            format!(
                r#"read line
case "$line" in
  *'"exports"'*) echo '{{"result":["getActions"]}}' ;;
  *) {body} ;;
esac
"#
            ),
        )
        .unwrap();
    }

    let mut config = Config::default();
    config.plugins.call_timeout_ms = 300;
    let runtime = Runtime::with_roots(
        &config,
        vec![PluginRoot::new(SourceKind::User, temp.path())],
        BuiltinModules::new(),
        HostBindings::headless(),
    );
    runtime.scan();

    let actions = tokio::time::timeout(
        Duration::from_secs(5),
        runtime.get_actions("", &DiscoveryContext::default()),
    )
    .await
    .expect("discovery finished");

    let ids: Vec<_> = actions.iter().map(|a| a.global_id.as_str()).collect();
    assert_eq!(ids, vec!["b-good:ok"]);
}
