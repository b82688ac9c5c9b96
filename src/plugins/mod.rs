//! Plugin system for Lantern.
//!
//! This module discovers plugin packages on disk and loads their modules.
//!
//! # Architecture
//!
//! ```text
//! PluginRegistry
//! ├── roots: [user, developer, builtin]
//! └── catalog: Arc<Vec<Arc<PluginEntity>>>   (swapped on every scan)
//!
//! ModuleLoader
//! ├── builtin: plugin id -> in-process module factory
//! └── cache: plugin id -> Arc<PluginModule>  (successful loads only)
//! ```
//!
//! Modules are loaded lazily, the first time discovery or execution needs
//! them. A module is either compiled into the host ([`BuiltinModules`]) or a
//! script speaking the JSON protocol in [`script`].

pub mod error;
mod loader;
mod manifest;
pub mod module;
mod registry;
pub mod script;

pub use error::{ModuleError, ModuleResult, PluginError, PluginResult};
pub use loader::{BuiltinModules, ModuleFactory, ModuleLoader};
pub use manifest::{Author, PackageManifest, PluginDeclaration, MANIFEST_FILE};
pub use module::{
    ActionExecutor, ActionProvider, ActionQuery, PluginModule, RawAction, ViewContentProvider,
};
pub use registry::{Catalog, PluginEntity, PluginRegistry, PluginRoot, SourceKind};

/// Unique identifier for a plugin.
pub type PluginId = String;

#[cfg(test)]
pub(crate) use registry::tests::write_plugin;
