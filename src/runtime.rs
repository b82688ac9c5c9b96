//! Service assembly.
//!
//! [`Runtime`] wires the registry, loader, discovery, execution engine and
//! both window orchestrators together, and is what the IPC layer and the CLI
//! talk to. It owns no state of its own beyond those services.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::actions::{
    split_global_id, ActionEntity, DiscoveryContext, DiscoveryService, ExecuteError,
    ExecuteResult, ExecutionEngine, ExecutionEvent,
};
use crate::config::Config;
use crate::error::{LanternError, LanternResult};
use crate::plugins::{
    ActionQuery, BuiltinModules, Catalog, ModuleLoader, PluginEntity, PluginRegistry, PluginRoot,
    SourceKind,
};
use crate::windows::headless::{HeadlessScreen, HeadlessSurfaceBackend};
use crate::windows::{
    Bounds, MainWindowOrchestrator, NativeWindow, ScreenInfo, SurfaceBackend, SurfaceInfo,
    ViewOrchestrator, ViewResult, ViewSource,
};

/// Host toolkit implementations the runtime drives.
#[derive(Clone)]
pub struct HostBindings {
    pub surfaces: Arc<dyn SurfaceBackend>,
    pub screen: Arc<dyn ScreenInfo>,
}

impl HostBindings {
    /// In-memory bindings for running without a windowing toolkit.
    pub fn headless() -> Self {
        Self {
            surfaces: Arc::new(HeadlessSurfaceBackend::new()),
            screen: Arc::new(HeadlessScreen::default()),
        }
    }
}

pub struct Runtime {
    registry: Arc<PluginRegistry>,
    loader: Arc<ModuleLoader>,
    discovery: Arc<DiscoveryService>,
    engine: ExecutionEngine,
    views: ViewOrchestrator,
    main_window: MainWindowOrchestrator,
    lookup_order: Vec<SourceKind>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("plugins", &self.registry.len())
            .field("views", &self.views.len())
            .field("main_window", &self.main_window)
            .finish()
    }
}

impl Runtime {
    /// Build the runtime over the plugin roots named in the config.
    pub fn new(config: &Config, builtin: BuiltinModules, host: HostBindings) -> Self {
        Self::with_roots(config, config.plugin_roots(), builtin, host)
    }

    pub fn with_roots(
        config: &Config,
        roots: Vec<PluginRoot>,
        builtin: BuiltinModules,
        host: HostBindings,
    ) -> Self {
        let registry = Arc::new(PluginRegistry::new(roots));
        let loader = Arc::new(
            ModuleLoader::new(builtin).with_call_timeout(config.plugins.call_timeout()),
        );

        let mut discovery = DiscoveryService::new(Arc::clone(&registry), Arc::clone(&loader));
        if config.plugins.cache_actions {
            discovery = discovery.with_cache();
        }
        let discovery = Arc::new(discovery);

        let lookup_order = config.plugins.lookup_order.clone();
        let engine = ExecutionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&loader),
            Arc::clone(&discovery),
        )
        .with_lookup_order(lookup_order.clone());

        let views = ViewOrchestrator::new(host.surfaces, Arc::clone(&registry), Arc::clone(&loader));
        let main_window = MainWindowOrchestrator::new(config.window_behavior(), host.screen);

        Self {
            registry,
            loader,
            discovery,
            engine,
            views,
            main_window,
            lookup_order,
        }
    }

    /// Rescan all plugin roots. Cached modules and actions are dropped.
    pub fn scan(&self) -> Catalog {
        let catalog = self.registry.scan();
        self.loader.clear();
        self.discovery.clear_cache();
        self.engine.prune(&catalog);
        info!(count = catalog.len(), "plugin catalog refreshed");
        catalog
    }

    pub async fn get_actions(&self, keyword: &str, context: &DiscoveryContext) -> Vec<ActionEntity> {
        let mut actions = self.discovery.get_actions(keyword, context).await;
        self.engine.annotate(&mut actions);
        actions
    }

    pub async fn execute_action(&self, global_id: &str, keyword: &str) -> ExecuteResult<Value> {
        self.engine.execute(global_id, keyword).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.engine.subscribe()
    }

    /// Open the view an action contributes, keyed by the action's global id.
    pub async fn open_action_view(
        &self,
        global_id: &str,
        bounds: Option<Bounds>,
    ) -> LanternResult<SurfaceInfo> {
        let (plugin_id, _) = split_global_id(global_id)
            .ok_or_else(|| ExecuteError::InvalidActionId(global_id.to_string()))?;

        let plugin = self
            .registry
            .find_tiered(plugin_id, &self.lookup_order)
            .ok_or_else(|| ExecuteError::PluginNotFound(plugin_id.to_string()))?;

        let action = self
            .discovery
            .plugin_actions(&plugin, &ActionQuery::default(), true)
            .await
            .into_iter()
            .find(|a| a.global_id == global_id)
            .ok_or_else(|| ExecuteError::ActionNotFound(global_id.to_string()))?;

        let view_path = action.view_path.ok_or_else(|| {
            LanternError::InvalidRequest(format!("Action '{}' has no view", global_id))
        })?;

        debug!(action = global_id, view_path = %view_path, "opening action view");
        self.views
            .create_view(global_id, ViewSource::plugin(&plugin.id, view_path))
            .await?;
        Ok(self.views.show(global_id, bounds)?)
    }

    pub async fn create_view(&self, view_id: &str, source: ViewSource) -> ViewResult<SurfaceInfo> {
        self.views.create_view(view_id, source).await
    }

    pub fn show_view(&self, view_id: &str, bounds: Option<Bounds>) -> ViewResult<SurfaceInfo> {
        self.views.show(view_id, bounds)
    }

    pub fn hide_view(&self, view_id: &str) -> bool {
        self.views.hide(view_id)
    }

    pub fn destroy_view(&self, view_id: &str) -> bool {
        self.views.destroy_view(view_id)
    }

    pub fn toggle_dev_tools(&self, view_id: &str) -> ViewResult<()> {
        self.views.toggle_dev_tools(view_id)
    }

    pub fn views(&self) -> &ViewOrchestrator {
        &self.views
    }

    pub fn list_plugins(&self) -> Catalog {
        self.registry.plugins()
    }

    /// Remove a user plugin and forget everything cached about it.
    pub fn uninstall_plugin(&self, id: &str) -> LanternResult<Arc<PluginEntity>> {
        let plugin = self.registry.uninstall(id)?;
        self.loader.evict(id);
        self.discovery.clear_cache();
        self.engine.forget_plugin(id);

        // Action views are keyed by the action's global id.
        let prefix = format!("{}:", id);
        let mut closed = 0;
        for view_id in self.views.view_ids() {
            if view_id.starts_with(&prefix) && self.views.destroy_view(&view_id) {
                closed += 1;
            }
        }
        info!(plugin = %id, views = closed, "plugin uninstalled");
        Ok(plugin)
    }

    pub fn install_plugin(&self, source: &Path) -> LanternResult<Arc<PluginEntity>> {
        let plugin = self.registry.install_local(source)?;
        self.loader.evict(&plugin.id);
        self.discovery.clear_cache();
        Ok(plugin)
    }

    /// Attach the host's main window; new views are parented to it.
    pub fn attach_main_window(&self, window: Arc<dyn NativeWindow>) {
        self.views.set_parent(Some(window.id()));
        self.main_window.attach_window(window);
    }

    /// The main window closed: tear down its views and pending timers.
    pub fn on_main_window_closed(&self) -> usize {
        let destroyed = match self.views.parent() {
            Some(parent) => self.views.on_parent_closed(parent),
            None => 0,
        };
        self.main_window.detach_window();
        destroyed
    }

    pub fn toggle_window(&self) -> bool {
        self.main_window.toggle()
    }

    pub fn main_window(&self) -> &MainWindowOrchestrator {
        &self.main_window
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Decode a JSON request, dispatch it, and encode the response.
    pub async fn handle_ipc(&self, request: &str) -> String {
        crate::ipc::handle_json(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{
        write_plugin, ActionExecutor, ActionProvider, ModuleResult, PluginModule, RawAction,
        ViewContentProvider,
    };
    use crate::windows::headless::HeadlessWindow;
    use crate::windows::ContentKind;
    use serde_json::json;
    use tempfile::TempDir;

    struct Notes;

    impl ActionProvider for Notes {
        fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            Ok(vec![
                RawAction::new("new", "New Note"),
                RawAction::new("browse", "Browse Notes").with_view("browse.html"),
            ])
        }
    }

    impl ActionExecutor for Notes {
        fn execute_action(&self, action: &RawAction, keyword: &str) -> ModuleResult<Value> {
            Ok(json!({ "ran": action.id, "keyword": keyword }))
        }
    }

    impl ViewContentProvider for Notes {
        fn get_view_content(&self, view_path: &str) -> ModuleResult<String> {
            Ok(format!("<ul data-view=\"{}\"></ul>", view_path))
        }
    }

    fn runtime(temp: &TempDir) -> Runtime {
        let builtin_root = temp.path().join("builtin");
        let user_root = temp.path().join("user");
        std::fs::create_dir_all(&user_root).unwrap();
        write_plugin(&builtin_root, "notes", "notes");

        let mut builtin = BuiltinModules::new();
        builtin.register("notes", || PluginModule::full(Arc::new(Notes)));
        builtin.register("todo", || PluginModule::full(Arc::new(Notes)));

        let runtime = Runtime::with_roots(
            &Config::default(),
            vec![
                PluginRoot::new(SourceKind::User, &user_root),
                PluginRoot::new(SourceKind::Builtin, &builtin_root),
            ],
            builtin,
            HostBindings::headless(),
        );
        runtime.scan();
        runtime
    }

    #[tokio::test]
    async fn test_actions_carry_ledger_status() {
        let temp = TempDir::new().unwrap();
        let runtime = runtime(&temp);

        let result = runtime.execute_action("notes:new", "groceries").await.unwrap();
        assert_eq!(result, json!({ "ran": "new", "keyword": "groceries" }));

        let actions = runtime.get_actions("", &DiscoveryContext::default()).await;
        let new = actions.iter().find(|a| a.global_id == "notes:new").unwrap();
        assert_eq!(new.status, crate::actions::ActionStatus::Completed);
    }

    #[tokio::test]
    async fn test_open_action_view() {
        let temp = TempDir::new().unwrap();
        let runtime = runtime(&temp);
        runtime.attach_main_window(Arc::new(HeadlessWindow::new(3)));

        let bounds = Bounds::new(0, 60, 700, 440);
        let info = runtime
            .open_action_view("notes:browse", Some(bounds))
            .await
            .unwrap();
        assert_eq!(info.view_id, "notes:browse");
        assert_eq!(info.content, ContentKind::Plugin);
        assert_eq!(info.bounds, bounds);
        assert!(info.visible);

        assert!(matches!(
            runtime.open_action_view("notes:new", None).await,
            Err(LanternError::InvalidRequest(_))
        ));
        assert!(matches!(
            runtime.open_action_view("ghost:x", None).await,
            Err(LanternError::Execute(ExecuteError::PluginNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_main_window_close_cascades_to_views() {
        let temp = TempDir::new().unwrap();
        let runtime = runtime(&temp);
        runtime.attach_main_window(Arc::new(HeadlessWindow::new(3)));

        runtime.show_view("a", None).unwrap();
        runtime.show_view("b", None).unwrap();
        assert_eq!(runtime.on_main_window_closed(), 2);
        assert!(runtime.views().is_empty());
        assert!(!runtime.main_window().is_attached());
        assert!(!runtime.toggle_window());
    }

    #[test]
    fn test_install_and_uninstall() {
        let temp = TempDir::new().unwrap();
        let runtime = runtime(&temp);

        let package = temp.path().join("download");
        write_plugin(&package, "todo", "todo");
        let installed = runtime.install_plugin(&package.join("todo")).unwrap();
        assert_eq!(installed.id, "todo");
        assert_eq!(installed.source_kind, SourceKind::User);
        assert_eq!(runtime.list_plugins().len(), 2);

        assert!(matches!(
            runtime.uninstall_plugin("notes"),
            Err(LanternError::Plugin(_))
        ));
        runtime.uninstall_plugin("todo").unwrap();
        assert_eq!(runtime.list_plugins().len(), 1);
    }

    #[tokio::test]
    async fn test_uninstall_closes_views_and_forgets_runs() {
        let temp = TempDir::new().unwrap();
        let runtime = runtime(&temp);
        runtime.attach_main_window(Arc::new(HeadlessWindow::new(3)));

        let package = temp.path().join("download");
        write_plugin(&package, "todo", "todo");
        runtime.install_plugin(&package.join("todo")).unwrap();

        runtime.execute_action("todo:new", "").await.unwrap();
        runtime.open_action_view("todo:browse", None).await.unwrap();
        runtime.open_action_view("notes:browse", None).await.unwrap();
        runtime
            .create_view("todo-archive:main", crate::windows::ViewSource::inline("<p/>"))
            .await
            .unwrap();
        assert!(runtime.engine.record("todo:new").is_some());

        runtime.uninstall_plugin("todo").unwrap();

        assert_eq!(
            runtime.views().view_ids(),
            vec!["notes:browse".to_string(), "todo-archive:main".to_string()]
        );
        assert!(runtime.engine.record("todo:new").is_none());
    }
}
