//! Action entities produced by discovery.

use serde::Serialize;
use tokio::time::Instant;

use crate::plugins::RawAction;

/// Execution state of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    #[default]
    Idle,
    Executing,
    Completed,
    Errored,
}

/// Outcome of validating a raw descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// A validated, globally addressable action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntity {
    /// `pluginId:actionId`
    pub global_id: String,
    pub plugin_id: String,
    pub action_id: String,
    pub title: String,
    pub description: String,
    pub icon: Option<String>,
    pub view_path: Option<String>,
    pub status: ActionStatus,
    pub validation: ValidationResult,
    pub last_error: Option<String>,

    #[serde(skip)]
    pub started_at: Option<Instant>,

    /// Descriptor as the plugin returned it; handed back on execution.
    #[serde(skip)]
    pub raw: RawAction,
}

impl ActionEntity {
    /// Build an entity from a plugin's descriptor, prefixing its id with the
    /// plugin id when the plugin did not already do so.
    pub fn from_raw(plugin_id: &str, raw: RawAction) -> Self {
        let validation = validate(&raw);

        let local_id = raw.id.as_deref().map(str::trim).unwrap_or_default();
        let global_id = qualify(plugin_id, local_id);
        let action_id = global_id[plugin_id.len() + 1..].to_string();

        Self {
            global_id,
            plugin_id: plugin_id.to_string(),
            action_id,
            title: raw.title.clone().unwrap_or_default(),
            description: raw.description.clone().unwrap_or_default(),
            icon: raw.icon.clone(),
            view_path: raw.view_path.clone(),
            status: ActionStatus::Idle,
            validation,
            last_error: None,
            started_at: None,
            raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation.is_valid
    }

    /// False only while this action is already executing.
    pub fn can_execute(&self) -> bool {
        self.status != ActionStatus::Executing
    }

    pub fn begin_execute(&mut self) {
        self.status = ActionStatus::Executing;
        self.started_at = Some(Instant::now());
        self.last_error = None;
    }

    pub fn complete_execute(&mut self) {
        self.status = ActionStatus::Completed;
    }

    pub fn execute_error(&mut self, message: impl Into<String>) {
        self.status = ActionStatus::Errored;
        self.last_error = Some(message.into());
    }
}

fn validate(raw: &RawAction) -> ValidationResult {
    let mut errors = Vec::new();

    if raw.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        errors.push("action id is required".to_string());
    }
    if raw.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
        errors.push("action title is required".to_string());
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Prefix an action id with its plugin id unless already prefixed.
pub fn qualify(plugin_id: &str, action_id: &str) -> String {
    match action_id.strip_prefix(plugin_id) {
        Some(rest) if rest.starts_with(':') => action_id.to_string(),
        _ => format!("{}:{}", plugin_id, action_id),
    }
}

/// Split a global id on its first `:` into `(pluginId, actionId)`.
///
/// Returns `None` when either part is empty.
pub fn split_global_id(global_id: &str) -> Option<(&str, &str)> {
    let (plugin_id, action_id) = global_id.split_once(':')?;
    if plugin_id.is_empty() || action_id.is_empty() {
        return None;
    }
    Some((plugin_id, action_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprefixed_id_is_qualified() {
        let entity = ActionEntity::from_raw("git", RawAction::new("status", "Status"));
        assert_eq!(entity.global_id, "git:status");
        assert_eq!(entity.action_id, "status");
        assert!(entity.is_valid());
    }

    #[test]
    fn test_prefixed_id_kept() {
        let entity = ActionEntity::from_raw("git", RawAction::new("git:push", "Push"));
        assert_eq!(entity.global_id, "git:push");
        assert_eq!(entity.action_id, "push");
    }

    #[test]
    fn test_similar_prefix_still_qualified() {
        assert_eq!(qualify("git", "github:open"), "git:github:open");
        assert_eq!(qualify("git", "other:open"), "git:other:open");
    }

    #[test]
    fn test_validation_errors() {
        let entity = ActionEntity::from_raw(
            "a",
            RawAction {
                id: Some("x".into()),
                ..Default::default()
            },
        );
        assert!(!entity.is_valid());
        assert_eq!(entity.validation.errors, vec!["action title is required"]);

        let entity = ActionEntity::from_raw("a", RawAction::default());
        assert_eq!(entity.validation.errors.len(), 2);
    }

    #[test]
    fn test_split_global_id() {
        assert_eq!(split_global_id("git:status"), Some(("git", "status")));
        assert_eq!(split_global_id("git:a:b"), Some(("git", "a:b")));
        assert_eq!(split_global_id("git"), None);
        assert_eq!(split_global_id(":status"), None);
        assert_eq!(split_global_id("git:"), None);
    }

    #[test]
    fn test_status_transitions() {
        let mut entity = ActionEntity::from_raw("a", RawAction::new("b", "B"));
        assert!(entity.can_execute());

        entity.begin_execute();
        assert_eq!(entity.status, ActionStatus::Executing);
        assert!(entity.started_at.is_some());
        assert!(!entity.can_execute());

        entity.execute_error("boom");
        assert_eq!(entity.status, ActionStatus::Errored);
        assert_eq!(entity.last_error.as_deref(), Some("boom"));
        assert!(entity.can_execute());

        entity.begin_execute();
        entity.complete_execute();
        assert_eq!(entity.status, ActionStatus::Completed);
        assert!(entity.last_error.is_none());
    }
}
