//! Action execution engine.
//!
//! Resolves a global action id to its plugin and action, then drives the
//! action through `idle -> executing -> {completed | errored}`. The engine
//! keeps a ledger of the last run per global id; an action whose ledger entry
//! is `executing` cannot be started again until that run finishes.
//!
//! Observers subscribe to [`ExecutionEvent`]s. Each run emits `BeforeExecute`
//! followed by exactly one of `AfterExecute` or `ExecuteError`. Subscribers
//! only see events sent after they subscribed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::discovery::DiscoveryService;
use super::entity::{split_global_id, ActionEntity, ActionStatus};
use super::error::{ExecuteError, ExecuteResult};
use crate::plugins::{ActionQuery, ModuleError, ModuleLoader, PluginEntity, PluginRegistry, SourceKind};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notification for a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ExecutionEvent {
    BeforeExecute {
        #[serde(rename = "globalId")]
        global_id: String,
    },
    AfterExecute {
        #[serde(rename = "globalId")]
        global_id: String,
        result: Value,
    },
    ExecuteError {
        #[serde(rename = "globalId")]
        global_id: String,
        message: String,
    },
}

/// Last known run of an action.
#[derive(Debug, Clone, Default)]
pub struct ActionRecord {
    pub status: ActionStatus,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub last_error: Option<String>,
}

type Ledger = Arc<Mutex<HashMap<String, ActionRecord>>>;

/// Marks a run finished. If the run future is dropped before completing,
/// the record is moved to `errored` instead of staying `executing` forever.
struct RunGuard {
    ledger: Ledger,
    global_id: String,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self, outcome: Result<(), &str>) {
        self.record(outcome);
        self.finished = true;
    }

    fn record(&self, outcome: Result<(), &str>) {
        let mut ledger = self.ledger.lock();
        let record = ledger.entry(self.global_id.clone()).or_default();
        record.finished_at = Some(Instant::now());
        match outcome {
            Ok(()) => {
                record.status = ActionStatus::Completed;
                record.last_error = None;
            }
            Err(message) => {
                record.status = ActionStatus::Errored;
                record.last_error = Some(message.to_string());
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.record(Err("execution abandoned"));
        }
    }
}

/// Executes plugin actions by global id.
pub struct ExecutionEngine {
    registry: Arc<PluginRegistry>,
    loader: Arc<ModuleLoader>,
    discovery: Arc<DiscoveryService>,
    lookup_order: Vec<SourceKind>,
    ledger: Ledger,
    events: broadcast::Sender<ExecutionEvent>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("lookup_order", &self.lookup_order)
            .field("tracked", &self.ledger.lock().len())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<PluginRegistry>,
        loader: Arc<ModuleLoader>,
        discovery: Arc<DiscoveryService>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            loader,
            discovery,
            lookup_order: Vec::new(),
            ledger: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Restrict and order plugin lookup by source kind.
    pub fn with_lookup_order(mut self, order: Vec<SourceKind>) -> Self {
        self.lookup_order = order;
        self
    }

    /// Subscribe to lifecycle events of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Current status of an action; `Idle` if it never ran.
    pub fn status(&self, global_id: &str) -> ActionStatus {
        self.ledger
            .lock()
            .get(global_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn record(&self, global_id: &str) -> Option<ActionRecord> {
        self.ledger.lock().get(global_id).cloned()
    }

    /// Drop ledger entries of one plugin. Runs still executing are kept.
    pub fn forget_plugin(&self, plugin_id: &str) -> usize {
        let prefix = format!("{}:", plugin_id);
        self.retain_records(|global_id| !global_id.starts_with(&prefix))
    }

    /// Drop ledger entries of plugins no longer in the catalog.
    pub fn prune(&self, catalog: &[Arc<PluginEntity>]) -> usize {
        self.retain_records(|global_id| {
            split_global_id(global_id)
                .map(|(plugin_id, _)| catalog.iter().any(|p| p.id == plugin_id))
                .unwrap_or(false)
        })
    }

    fn retain_records(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut ledger = self.ledger.lock();
        let before = ledger.len();
        ledger.retain(|global_id, record| {
            record.status == ActionStatus::Executing || keep(global_id)
        });
        let dropped = before - ledger.len();
        if dropped > 0 {
            debug!(dropped, "pruned action ledger");
        }
        dropped
    }

    /// Copy ledger state onto freshly discovered entities.
    pub fn annotate(&self, actions: &mut [ActionEntity]) {
        let ledger = self.ledger.lock();
        for action in actions.iter_mut() {
            if let Some(record) = ledger.get(&action.global_id) {
                action.status = record.status;
                action.started_at = record.started_at;
                action.last_error = record.last_error.clone();
            }
        }
    }

    /// Execute an action by its `pluginId:actionId`.
    pub async fn execute(&self, global_id: &str, keyword: &str) -> ExecuteResult<Value> {
        let (plugin_id, _) = split_global_id(global_id)
            .ok_or_else(|| ExecuteError::InvalidActionId(global_id.to_string()))?;

        let plugin = self
            .registry
            .find_tiered(plugin_id, &self.lookup_order)
            .ok_or_else(|| ExecuteError::PluginNotFound(plugin_id.to_string()))?;

        let limit = self.loader.call_timeout();
        let loader = Arc::clone(&self.loader);
        let load_target = Arc::clone(&plugin);
        let load = tokio::task::spawn_blocking(move || loader.try_load(&load_target));
        let module = tokio::time::timeout(limit, load)
            .await
            .map_err(|_| ExecuteError::ModuleUnavailable {
                plugin: plugin.id.clone(),
                reason: format!("load timed out after {}ms", limit.as_millis()),
            })?
            .map_err(|e| ExecuteError::ModuleUnavailable {
                plugin: plugin.id.clone(),
                reason: format!("loader panicked: {}", e),
            })?
            .map_err(|e| ExecuteError::ModuleUnavailable {
                plugin: plugin.id.clone(),
                reason: e.to_string(),
            })?;

        let executor = module
            .executor
            .clone()
            .ok_or_else(|| ExecuteError::ModuleUnavailable {
                plugin: plugin.id.clone(),
                reason: "module does not export executeAction".to_string(),
            })?;

        // Never trust an earlier snapshot: ask the plugin again.
        let query = ActionQuery {
            keyword: keyword.to_string(),
            overlaid_app: String::new(),
        };
        let mut action = self
            .discovery
            .plugin_actions(&plugin, &query, false)
            .await
            .into_iter()
            .find(|a| a.global_id == global_id)
            .ok_or_else(|| ExecuteError::ActionNotFound(global_id.to_string()))?;

        let guard = self.begin(&mut action)?;
        let _ = self.events.send(ExecutionEvent::BeforeExecute {
            global_id: action.global_id.clone(),
        });
        info!(action = %action.global_id, "executing action");

        let raw = action.raw.clone();
        let keyword = keyword.to_string();
        let call = tokio::task::spawn_blocking(move || executor.execute_action(&raw, &keyword));
        let outcome = match tokio::time::timeout(limit, call).await {
            Ok(joined) => joined.unwrap_or_else(|e| {
                Err(ModuleError::new(format!("executeAction panicked: {}", e)))
            }),
            Err(_) => Err(ModuleError::new(format!(
                "executeAction timed out after {}ms",
                limit.as_millis()
            ))),
        };

        match outcome {
            Ok(result) => {
                action.complete_execute();
                guard.finish(Ok(()));
                debug!(action = %action.global_id, "action completed");
                let _ = self.events.send(ExecutionEvent::AfterExecute {
                    global_id: action.global_id.clone(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                action.execute_error(e.message.clone());
                guard.finish(Err(e.message.as_str()));
                warn!(
                    action = %action.global_id,
                    message = %e.message,
                    stack = e.stack.as_deref().unwrap_or(""),
                    "action failed"
                );
                let _ = self.events.send(ExecutionEvent::ExecuteError {
                    global_id: action.global_id.clone(),
                    message: e.message.clone(),
                });
                Err(ExecuteError::Failed {
                    global_id: action.global_id,
                    message: e.message,
                })
            }
        }
    }

    /// Atomically check and claim the `executing` slot for an action.
    fn begin(&self, action: &mut ActionEntity) -> ExecuteResult<RunGuard> {
        let mut ledger = self.ledger.lock();
        let record = ledger.entry(action.global_id.clone()).or_default();

        action.status = record.status;
        if !action.can_execute() {
            return Err(ExecuteError::AlreadyExecuting(action.global_id.clone()));
        }

        action.begin_execute();
        *record = ActionRecord {
            status: ActionStatus::Executing,
            started_at: action.started_at,
            finished_at: None,
            last_error: None,
        };

        Ok(RunGuard {
            ledger: Arc::clone(&self.ledger),
            global_id: action.global_id.clone(),
            finished: false,
        })
    }
}
