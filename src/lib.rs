//! Lantern - plugin action runtime for a keyboard launcher.
//!
//! Lantern discovers plugin packages, exposes the actions they contribute
//! through a uniform query/execute protocol, and manages the isolated view
//! surfaces plugins render into, alongside the launcher's main window.
//!
//! # Architecture
//!
//! The library is organized into these main modules:
//!
//! - [`plugins`] - Package discovery, manifests and module loading
//! - [`actions`] - Action discovery and the execution engine
//! - [`windows`] - View surfaces and the main window state machine
//! - [`runtime`] - Assembly of the services above
//! - [`ipc`] - JSON request surface for the UI layer
//! - [`config`] - Configuration loading and management
//!
//! Control flows registry -> loader -> discovery -> execution -> views; the
//! main window orchestrator sits beside them and reacts to hotkeys.
//!
//! # Example
//!
//! ```ignore
//! use lantern::{Config, Runtime, HostBindings};
//! use lantern::plugins::BuiltinModules;
//!
//! let config = Config::load();
//! let runtime = Runtime::new(&config, BuiltinModules::new(), HostBindings::headless());
//! runtime.scan();
//!
//! let actions = runtime.get_actions("", &Default::default()).await;
//! let result = runtime.execute_action(&actions[0].global_id, "").await?;
//! ```

// Public modules
pub mod actions;
pub mod cli;
pub mod config;
pub mod hotkey;
pub mod ipc;
pub mod logging;
pub mod plugins;
pub mod runtime;
pub mod windows;

// Internal modules
mod error;

// Re-export commonly used types for convenience
pub use actions::{ActionEntity, ActionStatus, DiscoveryContext, ExecuteError, ExecutionEvent};
pub use config::Config;
pub use error::{LanternError, LanternResult};
pub use plugins::{PluginEntity, PluginError, SourceKind};
pub use runtime::{HostBindings, Runtime};
pub use windows::{Bounds, ViewError, ViewSource};
