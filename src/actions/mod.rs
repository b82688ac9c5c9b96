//! Action discovery and execution.
//!
//! ```text
//! DiscoveryService::get_actions(keyword, context)
//!   for plugin in registry (discovery order):
//!     loader.load(plugin) -> provider.get_actions({keyword, overlaidApp})
//!     validate + qualify ids -> ActionEntity
//!
//! ExecutionEngine::execute("plugin:action", keyword)
//!   split id -> registry lookup -> loader -> rediscover -> run executor
//!   events: before-execute -> after-execute | execute-error
//! ```

mod discovery;
mod engine;
mod entity;
mod error;

pub use discovery::{DiscoveryContext, DiscoveryService};
pub use engine::{ActionRecord, ExecutionEngine, ExecutionEvent};
pub use entity::{qualify, split_global_id, ActionEntity, ActionStatus, ValidationResult};
pub use error::{ExecuteError, ExecuteResult};
