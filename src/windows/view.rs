//! View orchestrator - isolated surfaces for plugin-rendered UI.
//!
//! Surfaces live in a map keyed by view id. The parent window is recorded as
//! an id, not a handle: closing the parent cascades through
//! [`ViewOrchestrator::on_parent_closed`] rather than through ownership.
//!
//! Content precedence when creating a view:
//! 1. inline `content`
//! 2. the owning plugin's `getViewContent(viewPath)`
//! 3. a diagnostic error page describing why 1 and 2 failed

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{ViewError, ViewResult};
use super::{Bounds, WindowId};
use crate::plugins::{ModuleLoader, PluginRegistry};

/// Caller-chosen identifier of a view surface.
pub type ViewId = String;

/// Structured envelope for host <-> view messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

impl ViewMessage {
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }
}

/// A message sent by a view to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub view_id: ViewId,
    pub message: ViewMessage,
}

/// Where a view's HTML comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSource {
    /// Inline HTML; wins over everything else.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub plugin_id: Option<String>,
    #[serde(default)]
    pub view_path: Option<String>,
}

impl ViewSource {
    pub fn inline(html: impl Into<String>) -> Self {
        Self {
            content: Some(html.into()),
            ..Default::default()
        }
    }

    pub fn plugin(plugin_id: impl Into<String>, view_path: impl Into<String>) -> Self {
        Self {
            plugin_id: Some(plugin_id.into()),
            view_path: Some(view_path.into()),
            ..Default::default()
        }
    }
}

/// What a surface ended up displaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Blank,
    Inline,
    Plugin,
    ErrorPage,
}

/// Renderer isolation settings. Surfaces never get direct host access; all
/// communication goes through [`ViewMessage`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePreferences {
    pub context_isolation: bool,
    pub sandbox: bool,
    pub host_integration: bool,
}

impl Default for SurfacePreferences {
    fn default() -> Self {
        Self {
            context_isolation: true,
            sandbox: true,
            host_integration: false,
        }
    }
}

/// Creates renderer surfaces inside a parent window.
pub trait SurfaceBackend: Send + Sync {
    fn create_surface(
        &self,
        parent: WindowId,
        view_id: &str,
        preferences: &SurfacePreferences,
    ) -> ViewResult<Box<dyn Surface>>;
}

/// A live renderer surface.
pub trait Surface: Send + Sync {
    fn load_html(&self, html: &str) -> ViewResult<()>;
    fn set_bounds(&self, bounds: Bounds);
    fn set_visible(&self, visible: bool);
    fn post_message(&self, message: &ViewMessage) -> ViewResult<()>;
    fn toggle_dev_tools(&self);
    /// Release the surface's renderer resources.
    fn destroy(&self);
}

/// Snapshot of a live surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceInfo {
    pub view_id: ViewId,
    pub parent: WindowId,
    pub bounds: Bounds,
    pub visible: bool,
    pub content: ContentKind,
}

struct LiveSurface {
    handle: Box<dyn Surface>,
    parent: WindowId,
    bounds: Bounds,
    visible: bool,
    content: ContentKind,
}

impl LiveSurface {
    fn info(&self, view_id: &str) -> SurfaceInfo {
        SurfaceInfo {
            view_id: view_id.to_string(),
            parent: self.parent,
            bounds: self.bounds,
            visible: self.visible,
            content: self.content,
        }
    }
}

/// Manages plugin view surfaces attached to the main window.
pub struct ViewOrchestrator {
    backend: Arc<dyn SurfaceBackend>,
    registry: Arc<PluginRegistry>,
    loader: Arc<ModuleLoader>,
    parent: Mutex<Option<WindowId>>,
    surfaces: Mutex<HashMap<ViewId, LiveSurface>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl fmt::Debug for ViewOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never hold `parent` while taking `surfaces`.
        let parent = self.parent();
        f.debug_struct("ViewOrchestrator")
            .field("parent", &parent)
            .field("surfaces", &self.view_ids())
            .finish()
    }
}

impl ViewOrchestrator {
    pub fn new(
        backend: Arc<dyn SurfaceBackend>,
        registry: Arc<PluginRegistry>,
        loader: Arc<ModuleLoader>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            registry,
            loader,
            parent: Mutex::new(None),
            surfaces: Mutex::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Set the window new surfaces attach to.
    pub fn set_parent(&self, parent: Option<WindowId>) {
        *self.parent.lock() = parent;
    }

    pub fn parent(&self) -> Option<WindowId> {
        *self.parent.lock()
    }

    /// Create a view, replacing any live surface with the same id.
    pub async fn create_view(&self, view_id: &str, source: ViewSource) -> ViewResult<SurfaceInfo> {
        let parent = self.require_parent(view_id)?;

        let registry = Arc::clone(&self.registry);
        let loader = Arc::clone(&self.loader);
        let (html, kind) =
            tokio::task::spawn_blocking(move || resolve_content(&registry, &loader, &source))
                .await
                .unwrap_or_else(|e| {
                    (
                        error_page("View content resolution panicked", &e.to_string()),
                        ContentKind::ErrorPage,
                    )
                });

        let mut surfaces = self.surfaces.lock();
        if let Some(old) = surfaces.remove(view_id) {
            debug!(view = view_id, "replacing existing surface");
            old.handle.destroy();
        }

        let live = self.open_surface(parent, view_id, &html, kind)?;
        let info = live.info(view_id);
        surfaces.insert(view_id.to_string(), live);

        info!(view = view_id, content = ?info.content, "view created");
        Ok(info)
    }

    /// Show a view, creating a blank one if absent, and apply bounds if given.
    pub fn show(&self, view_id: &str, bounds: Option<Bounds>) -> ViewResult<SurfaceInfo> {
        self.upsert(view_id, |live| {
            if let Some(bounds) = bounds {
                live.handle.set_bounds(bounds);
                live.bounds = bounds;
            }
            live.handle.set_visible(true);
            live.visible = true;
        })
    }

    /// Set a view's bounds, creating a blank one if absent.
    pub fn update(&self, view_id: &str, bounds: Bounds) -> ViewResult<SurfaceInfo> {
        self.upsert(view_id, |live| {
            live.handle.set_bounds(bounds);
            live.bounds = bounds;
        })
    }

    /// Hide a view. Returns false if no such view exists.
    pub fn hide(&self, view_id: &str) -> bool {
        match self.surfaces.lock().get_mut(view_id) {
            Some(live) => {
                live.handle.set_visible(false);
                live.visible = false;
                true
            }
            None => false,
        }
    }

    /// Destroy a view. Returns false if no such view exists.
    pub fn destroy_view(&self, view_id: &str) -> bool {
        let removed = self.surfaces.lock().remove(view_id);
        match removed {
            Some(live) => {
                live.handle.destroy();
                debug!(view = view_id, "view destroyed");
                true
            }
            None => false,
        }
    }

    pub fn toggle_dev_tools(&self, view_id: &str) -> ViewResult<()> {
        let surfaces = self.surfaces.lock();
        let live = surfaces
            .get(view_id)
            .ok_or_else(|| ViewError::NotFound(view_id.to_string()))?;
        live.handle.toggle_dev_tools();
        Ok(())
    }

    /// Destroy every live surface. Safe to call repeatedly or with none live.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<(ViewId, LiveSurface)> = self.surfaces.lock().drain().collect();
        for (view_id, live) in &drained {
            debug!(view = %view_id, "destroying view");
            live.handle.destroy();
        }
        drained.len()
    }

    /// Destroy all surfaces attached to a closed parent window.
    pub fn on_parent_closed(&self, parent: WindowId) -> usize {
        {
            let mut current = self.parent.lock();
            if *current == Some(parent) {
                *current = None;
            }
        }

        let orphans: Vec<LiveSurface> = {
            let mut surfaces = self.surfaces.lock();
            let ids: Vec<ViewId> = surfaces
                .iter()
                .filter(|(_, live)| live.parent == parent)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| surfaces.remove(id)).collect()
        };

        for live in &orphans {
            live.handle.destroy();
        }
        if !orphans.is_empty() {
            info!(parent, count = orphans.len(), "parent window closed, views destroyed");
        }
        orphans.len()
    }

    /// Post a message from the host to a view.
    pub fn send(&self, view_id: &str, channel: &str, data: Value) -> ViewResult<()> {
        let surfaces = self.surfaces.lock();
        let live = surfaces
            .get(view_id)
            .ok_or_else(|| ViewError::NotFound(view_id.to_string()))?;
        live.handle.post_message(&ViewMessage::new(channel, data))
    }

    /// Route a message from a view to the host. Messages from unknown views
    /// are dropped.
    pub fn deliver_from_view(&self, view_id: &str, message: ViewMessage) -> bool {
        if !self.surfaces.lock().contains_key(view_id) {
            warn!(view = view_id, channel = %message.channel, "message from unknown view dropped");
            return false;
        }
        self.inbound_tx
            .send(InboundMessage {
                view_id: view_id.to_string(),
                message,
            })
            .is_ok()
    }

    /// Take the receiver for view-to-host messages. Only the first call gets it.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }

    pub fn surface(&self, view_id: &str) -> Option<SurfaceInfo> {
        self.surfaces.lock().get(view_id).map(|live| live.info(view_id))
    }

    pub fn view_ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<_> = self.surfaces.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.lock().is_empty()
    }

    fn require_parent(&self, view_id: &str) -> ViewResult<WindowId> {
        self.parent().ok_or_else(|| no_parent(view_id))
    }

    fn upsert<F>(&self, view_id: &str, apply: F) -> ViewResult<SurfaceInfo>
    where
        F: FnOnce(&mut LiveSurface),
    {
        let parent = self.parent();
        let mut surfaces = self.surfaces.lock();
        if !surfaces.contains_key(view_id) {
            let parent = parent.ok_or_else(|| no_parent(view_id))?;
            let live = self.open_surface(parent, view_id, "", ContentKind::Blank)?;
            surfaces.insert(view_id.to_string(), live);
        }

        let live = surfaces
            .get_mut(view_id)
            .ok_or_else(|| ViewError::NotFound(view_id.to_string()))?;
        apply(live);
        Ok(live.info(view_id))
    }

    fn open_surface(
        &self,
        parent: WindowId,
        view_id: &str,
        html: &str,
        kind: ContentKind,
    ) -> ViewResult<LiveSurface> {
        let handle = self
            .backend
            .create_surface(parent, view_id, &SurfacePreferences::default())?;

        let content = match handle.load_html(html) {
            Ok(()) => kind,
            Err(e) => {
                warn!(view = view_id, error = %e, "surface failed to load content");
                let page = error_page("This view failed to load", &e.to_string());
                if let Err(e) = handle.load_html(&page) {
                    handle.destroy();
                    return Err(e);
                }
                ContentKind::ErrorPage
            }
        };

        Ok(LiveSurface {
            handle,
            parent,
            bounds: Bounds::default(),
            visible: false,
            content,
        })
    }
}

impl Drop for ViewOrchestrator {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

/// Resolve a view source to HTML, degrading to a diagnostic page.
fn resolve_content(
    registry: &PluginRegistry,
    loader: &ModuleLoader,
    source: &ViewSource,
) -> (String, ContentKind) {
    if let Some(content) = &source.content {
        return (content.clone(), ContentKind::Inline);
    }

    let (plugin_id, view_path) = match (&source.plugin_id, &source.view_path) {
        (None, None) => return (String::new(), ContentKind::Blank),
        (Some(plugin_id), Some(view_path)) => (plugin_id, view_path),
        _ => {
            return (
                error_page(
                    "Incomplete view source",
                    "A plugin view needs both a plugin id and a view path.",
                ),
                ContentKind::ErrorPage,
            )
        }
    };

    let failure = |detail: String| {
        warn!(plugin = %plugin_id, view_path = %view_path, detail = %detail, "view content unavailable");
        (
            error_page(&format!("Could not render {}", view_path), &detail),
            ContentKind::ErrorPage,
        )
    };

    let Some(plugin) = registry.find(plugin_id) else {
        return failure(format!("Plugin '{}' is not installed.", plugin_id));
    };

    let module = match loader.try_load(&plugin) {
        Ok(module) => module,
        Err(e) => return failure(e.to_string()),
    };

    let Some(views) = module.views.as_ref() else {
        return failure(format!("Plugin '{}' does not export getViewContent.", plugin_id));
    };

    match views.get_view_content(view_path) {
        Ok(html) => (html, ContentKind::Plugin),
        Err(e) => {
            let detail = match &e.stack {
                Some(stack) => format!("{}\n\n{}", e.message, stack),
                None => e.message.clone(),
            };
            failure(detail)
        }
    }
}

fn no_parent(view_id: &str) -> ViewError {
    warn!(view = view_id, "no main window, view operation ignored");
    ViewError::NoParentWindow(view_id.to_string())
}

fn error_page(title: &str, detail: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family:-apple-system,sans-serif;padding:16px\">\
         <h3>{title}</h3><pre style=\"white-space:pre-wrap\">{detail}</pre></body></html>",
        title = escape_html(title),
        detail = escape_html(detail),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
