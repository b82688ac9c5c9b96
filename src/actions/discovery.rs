//! Action discovery - fans a query out to every plugin.
//!
//! Plugins are queried one after another in catalog order so the aggregate
//! order is deterministic: plugin discovery order first, then each plugin's
//! own order. A plugin that fails to load, errors, panics or returns garbage
//! contributes zero actions and never aborts the query for the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::entity::ActionEntity;
use crate::plugins::{ActionQuery, ModuleLoader, PluginEntity, PluginId, PluginRegistry};

/// Invocation context supplied alongside the keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryContext {
    #[serde(default)]
    pub overlaid_app_name: String,
}

impl DiscoveryContext {
    pub fn overlaid(app: impl Into<String>) -> Self {
        Self {
            overlaid_app_name: app.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    plugin_id: PluginId,
    keyword: String,
    overlaid_app: String,
}

/// Per-plugin result cache. Only successful queries are stored.
#[derive(Debug, Default)]
struct ActionCache {
    entries: Mutex<HashMap<CacheKey, Vec<ActionEntity>>>,
}

impl ActionCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<ActionEntity>> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: CacheKey, actions: Vec<ActionEntity>) {
        self.entries.lock().insert(key, actions);
    }

    fn invalidate(&self, plugin_id: &str) {
        self.entries.lock().retain(|key, _| key.plugin_id != plugin_id);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Queries loaded plugins for actions.
#[derive(Debug)]
pub struct DiscoveryService {
    registry: Arc<PluginRegistry>,
    loader: Arc<ModuleLoader>,
    cache: Option<ActionCache>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<PluginRegistry>, loader: Arc<ModuleLoader>) -> Self {
        Self {
            registry,
            loader,
            cache: None,
        }
    }

    /// Enable caching of per-plugin results keyed by plugin, keyword and context.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(ActionCache::default());
        self
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Collect the valid actions of every plugin for a keyword.
    pub async fn get_actions(&self, keyword: &str, context: &DiscoveryContext) -> Vec<ActionEntity> {
        let query = ActionQuery {
            keyword: keyword.to_string(),
            overlaid_app: context.overlaid_app_name.clone(),
        };

        let mut seen = HashSet::new();
        let mut aggregate = Vec::new();

        for plugin in self.registry.plugins().iter() {
            for action in self.plugin_actions(plugin, &query, true).await {
                if !seen.insert(action.global_id.clone()) {
                    warn!(
                        plugin = %plugin.id,
                        action = %action.global_id,
                        "duplicate action id in aggregate, dropping"
                    );
                    continue;
                }
                aggregate.push(action);
            }
        }

        debug!(keyword, count = aggregate.len(), "discovery complete");
        aggregate
    }

    /// Query a single plugin. Never fails: problems are logged and yield no
    /// actions. `use_cache` is ignored when caching is disabled.
    pub async fn plugin_actions(
        &self,
        plugin: &Arc<PluginEntity>,
        query: &ActionQuery,
        use_cache: bool,
    ) -> Vec<ActionEntity> {
        let key = CacheKey {
            plugin_id: plugin.id.clone(),
            keyword: query.keyword.clone(),
            overlaid_app: query.overlaid_app.clone(),
        };

        if use_cache {
            if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
                return cached;
            }
        }

        let loader = Arc::clone(&self.loader);
        let owned_plugin = Arc::clone(plugin);
        let owned_query = query.clone();

        // Module loading and plugin calls may block on a child process.
        let limit = self.loader.call_timeout();
        let call = tokio::task::spawn_blocking(move || {
            let module = loader.load(&owned_plugin)?;
            let provider = module.provider.clone()?;
            Some(provider.get_actions(&owned_query))
        });
        let joined = match tokio::time::timeout(limit, call).await {
            Ok(joined) => joined,
            Err(_) => {
                error!(
                    plugin = %plugin.id,
                    path = %plugin.path.display(),
                    timeout_ms = limit.as_millis() as u64,
                    "getActions timed out"
                );
                return Vec::new();
            }
        };

        let raw_actions = match joined {
            Ok(Some(Ok(raw))) => raw,
            Ok(Some(Err(e))) => {
                error!(
                    plugin = %plugin.id,
                    path = %plugin.path.display(),
                    message = %e.message,
                    stack = e.stack.as_deref().unwrap_or(""),
                    "getActions failed"
                );
                return Vec::new();
            }
            // Load failure already logged by the loader
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!(
                    plugin = %plugin.id,
                    path = %plugin.path.display(),
                    error = ?e,
                    "getActions panicked"
                );
                return Vec::new();
            }
        };

        let mut actions = Vec::with_capacity(raw_actions.len());
        for raw in raw_actions {
            let entity = ActionEntity::from_raw(&plugin.id, raw);
            if !entity.is_valid() {
                warn!(
                    plugin = %plugin.id,
                    action = %entity.global_id,
                    errors = ?entity.validation.errors,
                    "invalid action descriptor"
                );
                continue;
            }
            actions.push(entity);
        }

        if let Some(cache) = &self.cache {
            cache.put(key, actions.clone());
        }
        actions
    }

    /// Forget cached results for one plugin.
    pub fn invalidate(&self, plugin_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(plugin_id);
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{
        write_plugin, ActionProvider, BuiltinModules, ModuleError, ModuleResult, PluginModule,
        PluginRoot, RawAction, SourceKind,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Fixed(Vec<RawAction>);

    impl ActionProvider for Fixed {
        fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl ActionProvider for Failing {
        fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            Err(ModuleError::new("Cannot read properties of undefined").with_stack("at getActions"))
        }
    }

    struct Panicking;

    impl ActionProvider for Panicking {
        fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            panic!("plugin bug")
        }
    }

    struct Stalled(Duration);

    impl ActionProvider for Stalled {
        fn get_actions(&self, _query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            std::thread::sleep(self.0);
            Ok(vec![RawAction::new("late", "Late")])
        }
    }

    struct Echo(Arc<AtomicUsize>);

    impl ActionProvider for Echo {
        fn get_actions(&self, query: &ActionQuery) -> ModuleResult<Vec<RawAction>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawAction::new(
                format!("echo-{}", query.keyword),
                format!("Echo {} in {}", query.keyword, query.overlaid_app),
            )])
        }
    }

    fn service(temp: &TempDir, ids: &[&str], builtin: BuiltinModules) -> DiscoveryService {
        service_with_loader(temp, ids, ModuleLoader::new(builtin))
    }

    fn service_with_loader(temp: &TempDir, ids: &[&str], loader: ModuleLoader) -> DiscoveryService {
        for id in ids {
            write_plugin(temp.path(), id, id);
        }
        let registry = Arc::new(PluginRegistry::new(vec![PluginRoot::new(
            SourceKind::Builtin,
            temp.path(),
        )]));
        registry.scan();
        DiscoveryService::new(registry, Arc::new(loader))
    }

    #[tokio::test]
    async fn test_failing_plugins_are_isolated() {
        let temp = TempDir::new().unwrap();
        let mut builtin = BuiltinModules::new();
        builtin.register("a-good", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![
                RawAction::new("one", "One"),
                RawAction::new("two", "Two"),
            ])))
        });
        builtin.register("b-failing", || PluginModule::with_provider(Arc::new(Failing)));
        builtin.register("c-panicking", || {
            PluginModule::with_provider(Arc::new(Panicking))
        });
        builtin.register("d-good", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![RawAction::new("three", "Three")])))
        });

        // "e-missing" has no builtin module and an empty index.js entry
        let discovery = service(
            &temp,
            &["a-good", "b-failing", "c-panicking", "d-good", "e-missing"],
            builtin,
        );

        let actions = discovery.get_actions("", &DiscoveryContext::default()).await;
        let ids: Vec<_> = actions.iter().map(|a| a.global_id.as_str()).collect();
        assert_eq!(ids, vec!["a-good:one", "a-good:two", "d-good:three"]);
    }

    #[tokio::test]
    async fn test_stalled_plugin_does_not_block_the_rest() {
        let temp = TempDir::new().unwrap();
        let mut builtin = BuiltinModules::new();
        builtin.register("a-stalled", || {
            PluginModule::with_provider(Arc::new(Stalled(Duration::from_secs(2))))
        });
        builtin.register("b-good", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![RawAction::new("ok", "Ok")])))
        });
        let loader = ModuleLoader::new(builtin).with_call_timeout(Duration::from_millis(100));
        let discovery = service_with_loader(&temp, &["a-stalled", "b-good"], loader).with_cache();

        let started = Instant::now();
        let actions = discovery.get_actions("", &DiscoveryContext::default()).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        let ids: Vec<_> = actions.iter().map(|a| a.global_id.as_str()).collect();
        assert_eq!(ids, vec!["b-good:ok"]);
        let cache = discovery.cache.as_ref().unwrap().entries.lock();
        assert!(cache.keys().all(|key| key.plugin_id != "a-stalled"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_script_plugin_does_not_block_the_rest() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a-hang");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.json"),
            r#"{ "name": "a-hang", "main": "main.sh", "lantern": { "id": "a-hang" } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("main.sh"),
            r#"read line
case "$line" in
  *'"exports"'*) echo '{"result":["getActions"]}' ;;
  *) sleep 30 ;;
esac
"#,
        )
        .unwrap();

        let mut builtin = BuiltinModules::new();
        builtin.register("b-good", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![RawAction::new("ok", "Ok")])))
        });
        let loader = ModuleLoader::new(builtin).with_call_timeout(Duration::from_millis(300));
        let discovery = service_with_loader(&temp, &["b-good"], loader);

        let actions = tokio::time::timeout(
            Duration::from_secs(5),
            discovery.get_actions("", &DiscoveryContext::default()),
        )
        .await
        .expect("discovery finished");

        let ids: Vec<_> = actions.iter().map(|a| a.global_id.as_str()).collect();
        assert_eq!(ids, vec!["b-good:ok"]);
    }

    #[tokio::test]
    async fn test_invalid_actions_filtered() {
        let temp = TempDir::new().unwrap();
        let mut builtin = BuiltinModules::new();
        builtin.register("A", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![
                RawAction::new("one", "One"),
                RawAction::new("A:two", "Two"),
                RawAction {
                    id: Some("broken".into()),
                    ..Default::default()
                },
                RawAction::new("three", "Three"),
            ])))
        });

        let discovery = service(&temp, &["A"], builtin);
        let actions = discovery.get_actions("", &DiscoveryContext::default()).await;

        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a.global_id.starts_with("A:")));
    }

    #[tokio::test]
    async fn test_duplicate_global_ids_dropped() {
        let temp = TempDir::new().unwrap();
        let mut builtin = BuiltinModules::new();
        builtin.register("dup", || {
            PluginModule::with_provider(Arc::new(Fixed(vec![
                RawAction::new("x", "First"),
                RawAction::new("dup:x", "Second"),
            ])))
        });

        let discovery = service(&temp, &["dup"], builtin);
        let actions = discovery.get_actions("", &DiscoveryContext::default()).await;

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].title, "First");
    }

    #[tokio::test]
    async fn test_query_reaches_plugin() {
        let temp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut builtin = BuiltinModules::new();
        builtin.register("echo", move || {
            PluginModule::with_provider(Arc::new(Echo(Arc::clone(&counter))))
        });

        let discovery = service(&temp, &["echo"], builtin);
        let actions = discovery
            .get_actions("push", &DiscoveryContext::overlaid("Xcode"))
            .await;

        assert_eq!(actions[0].global_id, "echo:echo-push");
        assert_eq!(actions[0].title, "Echo push in Xcode");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_keyed_by_keyword() {
        let temp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut builtin = BuiltinModules::new();
        builtin.register("echo", move || {
            PluginModule::with_provider(Arc::new(Echo(Arc::clone(&counter))))
        });

        let discovery = service(&temp, &["echo"], builtin).with_cache();
        let ctx = DiscoveryContext::default();

        discovery.get_actions("a", &ctx).await;
        discovery.get_actions("a", &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        discovery.get_actions("b", &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        discovery.invalidate("echo");
        discovery.get_actions("a", &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let temp = TempDir::new().unwrap();
        let discovery = service(&temp, &["nothing"], BuiltinModules::new()).with_cache();

        assert!(discovery
            .get_actions("", &DiscoveryContext::default())
            .await
            .is_empty());
        assert!(discovery.cache.as_ref().unwrap().entries.lock().is_empty());
    }
}
