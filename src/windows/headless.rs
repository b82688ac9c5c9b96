//! In-memory host bindings.
//!
//! Used by the CLI (which has no windowing toolkit) and by tests, which read
//! back what the orchestrators did through the inspection methods.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{ViewError, ViewResult};
use super::view::{Surface, SurfaceBackend, SurfacePreferences, ViewMessage};
use super::{Bounds, DisplayInfo, NativeWindow, Point, ScreenInfo, WindowId};

#[derive(Debug, Default)]
struct SurfaceRecord {
    view_id: String,
    parent: WindowId,
    preferences: Option<SurfacePreferences>,
    html: String,
    bounds: Bounds,
    visible: bool,
    dev_tools: bool,
    messages: Vec<ViewMessage>,
    destroyed: bool,
}

/// Surface backend that records every surface it creates.
#[derive(Debug, Default)]
pub struct HeadlessSurfaceBackend {
    records: Mutex<Vec<Arc<Mutex<SurfaceRecord>>>>,
    fail_next_load: Arc<AtomicBool>,
}

impl HeadlessSurfaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `load_html` call on any surface fail.
    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    pub fn live_count(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| !r.lock().destroyed)
            .count()
    }

    pub fn destroyed_count(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.lock().destroyed)
            .count()
    }

    pub fn html(&self, view_id: &str) -> Option<String> {
        self.with_live(view_id, |r| r.html.clone())
    }

    pub fn bounds(&self, view_id: &str) -> Option<Bounds> {
        self.with_live(view_id, |r| r.bounds)
    }

    pub fn is_visible(&self, view_id: &str) -> bool {
        self.with_live(view_id, |r| r.visible).unwrap_or(false)
    }

    pub fn dev_tools_open(&self, view_id: &str) -> bool {
        self.with_live(view_id, |r| r.dev_tools).unwrap_or(false)
    }

    pub fn messages(&self, view_id: &str) -> Vec<ViewMessage> {
        self.with_live(view_id, |r| r.messages.clone())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, view_id: &str) -> Option<WindowId> {
        self.with_live(view_id, |r| r.parent)
    }

    pub fn preferences(&self, view_id: &str) -> Option<SurfacePreferences> {
        self.with_live(view_id, |r| r.preferences).flatten()
    }

    fn with_live<T>(&self, view_id: &str, f: impl FnOnce(&SurfaceRecord) -> T) -> Option<T> {
        let records = self.records.lock();
        let live = records.iter().rev().find(|record| {
            let record = record.lock();
            !record.destroyed && record.view_id == view_id
        })?;
        let record = live.lock();
        Some(f(&record))
    }
}

impl SurfaceBackend for HeadlessSurfaceBackend {
    fn create_surface(
        &self,
        parent: WindowId,
        view_id: &str,
        preferences: &SurfacePreferences,
    ) -> ViewResult<Box<dyn Surface>> {
        let record = Arc::new(Mutex::new(SurfaceRecord {
            view_id: view_id.to_string(),
            parent,
            preferences: Some(*preferences),
            ..Default::default()
        }));
        self.records.lock().push(Arc::clone(&record));

        Ok(Box::new(HeadlessSurface {
            record,
            fail_next_load: Arc::clone(&self.fail_next_load),
        }))
    }
}

struct HeadlessSurface {
    record: Arc<Mutex<SurfaceRecord>>,
    fail_next_load: Arc<AtomicBool>,
}

impl Surface for HeadlessSurface {
    fn load_html(&self, html: &str) -> ViewResult<()> {
        let mut record = self.record.lock();
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(ViewError::ContentLoad {
                view_id: record.view_id.clone(),
                message: "renderer crashed".to_string(),
            });
        }
        record.html = html.to_string();
        Ok(())
    }

    fn set_bounds(&self, bounds: Bounds) {
        self.record.lock().bounds = bounds;
    }

    fn set_visible(&self, visible: bool) {
        self.record.lock().visible = visible;
    }

    fn post_message(&self, message: &ViewMessage) -> ViewResult<()> {
        let mut record = self.record.lock();
        if record.destroyed {
            return Err(ViewError::Delivery {
                view_id: record.view_id.clone(),
                message: "surface destroyed".to_string(),
            });
        }
        record.messages.push(message.clone());
        Ok(())
    }

    fn toggle_dev_tools(&self) {
        let mut record = self.record.lock();
        record.dev_tools = !record.dev_tools;
    }

    fn destroy(&self) {
        self.record.lock().destroyed = true;
    }
}

/// A main window that only tracks its state.
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    id: WindowId,
    state: Mutex<WindowRecord>,
    show_count: AtomicU32,
    focus_count: AtomicU32,
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowRecord {
    visible: bool,
    destroyed: bool,
    bounds: Bounds,
    all_workspaces: bool,
    always_on_top: bool,
}

impl HeadlessWindow {
    pub fn new(id: WindowId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        state.visible = false;
    }

    pub fn on_all_workspaces(&self) -> bool {
        self.state.lock().all_workspaces
    }

    pub fn always_on_top(&self) -> bool {
        self.state.lock().always_on_top
    }

    pub fn show_count(&self) -> u32 {
        self.show_count.load(Ordering::SeqCst)
    }

    pub fn focus_count(&self) -> u32 {
        self.focus_count.load(Ordering::SeqCst)
    }
}

impl NativeWindow for HeadlessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    fn show(&self) {
        self.state.lock().visible = true;
        self.show_count.fetch_add(1, Ordering::SeqCst);
    }

    fn hide(&self) {
        self.state.lock().visible = false;
    }

    fn focus(&self) {
        self.focus_count.fetch_add(1, Ordering::SeqCst);
    }

    fn bounds(&self) -> Bounds {
        self.state.lock().bounds
    }

    fn set_bounds(&self, bounds: Bounds) {
        self.state.lock().bounds = bounds;
    }

    fn set_visible_on_all_workspaces(&self, visible: bool) {
        self.state.lock().all_workspaces = visible;
    }

    fn set_always_on_top(&self, on_top: bool) {
        self.state.lock().always_on_top = on_top;
    }
}

/// A fixed display layout with a movable pointer.
#[derive(Debug)]
pub struct HeadlessScreen {
    cursor: Mutex<Point>,
    displays: Vec<DisplayInfo>,
    workspaces: bool,
}

impl Default for HeadlessScreen {
    fn default() -> Self {
        Self::new(vec![DisplayInfo {
            id: 1,
            frame: Bounds::new(0, 0, 1920, 1080),
            work_area: Bounds::new(0, 25, 1920, 1055),
            is_primary: true,
        }])
    }
}

impl HeadlessScreen {
    pub fn new(displays: Vec<DisplayInfo>) -> Self {
        Self {
            cursor: Mutex::new(Point::default()),
            displays,
            workspaces: true,
        }
    }

    pub fn with_workspaces(mut self, supported: bool) -> Self {
        self.workspaces = supported;
        self
    }

    pub fn move_cursor(&self, point: Point) {
        *self.cursor.lock() = point;
    }
}

impl ScreenInfo for HeadlessScreen {
    fn cursor_position(&self) -> Point {
        *self.cursor.lock()
    }

    fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.clone()
    }

    fn supports_workspaces(&self) -> bool {
        self.workspaces
    }
}
