//! Plugin module loader.
//!
//! Loads a plugin's entry module on demand and caches the handle by plugin id
//! for the life of the process. Failed loads are not cached: the next call
//! retries, since the user may have fixed the file in the meantime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{PluginError, PluginResult};
use super::module::{PluginModule, EXPORT_GET_ACTIONS};
use super::registry::PluginEntity;
use super::script::{ScriptModule, DEFAULT_CALL_TIMEOUT};
use super::PluginId;

/// Factory producing an in-process module.
pub type ModuleFactory = Arc<dyn Fn() -> PluginModule + Send + Sync>;

/// Modules compiled into the host, keyed by plugin id.
///
/// A registered id takes precedence over the plugin's on-disk entry file.
#[derive(Clone, Default)]
pub struct BuiltinModules {
    factories: HashMap<PluginId, ModuleFactory>,
}

impl fmt::Debug for BuiltinModules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl BuiltinModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, plugin_id: impl Into<PluginId>, factory: F)
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.factories.insert(plugin_id.into(), Arc::new(factory));
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.contains_key(plugin_id)
    }

    fn instantiate(&self, plugin_id: &str) -> Option<PluginModule> {
        self.factories.get(plugin_id).map(|factory| factory())
    }
}

/// Loads and caches plugin modules.
#[derive(Debug)]
pub struct ModuleLoader {
    builtin: BuiltinModules,
    cache: Mutex<HashMap<PluginId, Arc<PluginModule>>>,
    call_timeout: Duration,
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new(BuiltinModules::new())
    }
}

impl ModuleLoader {
    pub fn new(builtin: BuiltinModules) -> Self {
        Self {
            builtin,
            cache: Mutex::new(HashMap::new()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Limit for any single call into a plugin module.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Load a plugin's module, failing soft.
    ///
    /// Returns `None` (and logs why) when the entry is missing, the module
    /// fails to evaluate, or it lacks `getActions`.
    pub fn load(&self, plugin: &PluginEntity) -> Option<Arc<PluginModule>> {
        match self.try_load(plugin) {
            Ok(module) => Some(module),
            Err(e) => {
                warn!(
                    plugin = %plugin.id,
                    path = %plugin.path.display(),
                    error = %e,
                    "plugin module unavailable"
                );
                None
            }
        }
    }

    /// Load a plugin's module, reporting why it is unavailable.
    pub fn try_load(&self, plugin: &PluginEntity) -> PluginResult<Arc<PluginModule>> {
        if let Some(module) = self.cache.lock().get(&plugin.id) {
            return Ok(Arc::clone(module));
        }

        let module = match self.builtin.instantiate(&plugin.id) {
            Some(module) => module,
            None => {
                if !plugin.entry_path.is_file() {
                    return Err(PluginError::EntryNotFound {
                        plugin: plugin.id.clone(),
                        path: plugin.entry_path.clone(),
                    });
                }
                ScriptModule::load_with_timeout(plugin, self.call_timeout)?
            }
        };

        if module.provider.is_none() {
            return Err(PluginError::MissingExport {
                plugin: plugin.id.clone(),
                export: EXPORT_GET_ACTIONS,
            });
        }

        debug!(plugin = %plugin.id, exports = ?module.exports(), "plugin module loaded");

        // Concurrent loads of the same plugin keep whichever finished first.
        let mut cache = self.cache.lock();
        let cached = cache
            .entry(plugin.id.clone())
            .or_insert_with(|| Arc::new(module));
        Ok(Arc::clone(cached))
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.cache.lock().contains_key(plugin_id)
    }

    /// Drop a cached module so the next load re-imports it.
    pub fn evict(&self, plugin_id: &str) -> bool {
        self.cache.lock().remove(plugin_id).is_some()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
