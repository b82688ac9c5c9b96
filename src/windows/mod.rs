//! Window orchestration for the launcher.
//!
//! The host windowing toolkit sits behind the traits in this module:
//!
//! - [`NativeWindow`] - the application's main window
//! - [`ScreenInfo`] - pointer position and display layout
//! - [`SurfaceBackend`] / [`Surface`] - isolated plugin view surfaces
//!
//! [`MainWindowOrchestrator`] and [`ViewOrchestrator`] hold the state machines;
//! [`headless`] provides in-memory implementations of the host traits.

mod error;
pub mod headless;
mod main_window;
mod timer;
mod view;

pub use error::{ViewError, ViewResult};
pub use main_window::{MainWindowOrchestrator, WindowBehavior};
pub use timer::DeferredTask;
pub use view::{
    ContentKind, InboundMessage, Surface, SurfaceBackend, SurfaceInfo, SurfacePreferences,
    ViewId, ViewMessage, ViewOrchestrator, ViewSource,
};

use serde::{Deserialize, Serialize};

/// Host-assigned identifier of a native window.
pub type WindowId = u64;

/// A screen point in global coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Position and size of a window, surface or display area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && (point.x as i64) < self.x as i64 + self.width as i64
            && (point.y as i64) < self.y as i64 + self.height as i64
    }

    /// Squared distance from a point to the nearest edge (0 if inside).
    pub fn distance_sq(&self, point: Point) -> i64 {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        let dx = if (point.x as i64) < self.x as i64 {
            self.x as i64 - point.x as i64
        } else if point.x as i64 >= right {
            point.x as i64 - right + 1
        } else {
            0
        };
        let dy = if (point.y as i64) < self.y as i64 {
            self.y as i64 - point.y as i64
        } else if point.y as i64 >= bottom {
            point.y as i64 - bottom + 1
        } else {
            0
        };
        dx * dx + dy * dy
    }

    /// A `width` x `height` rectangle centered within these bounds.
    pub fn centered(&self, width: u32, height: u32) -> Bounds {
        let width = width.min(self.width);
        let height = height.min(self.height);
        Bounds {
            x: self.x + ((self.width - width) / 2) as i32,
            y: self.y + ((self.height - height) / 2) as i32,
            width,
            height,
        }
    }
}

/// A connected display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub id: u32,
    /// Full display frame.
    pub frame: Bounds,
    /// Frame minus menu bar, dock and panels.
    pub work_area: Bounds,
    pub is_primary: bool,
}

/// Display containing the point, or the one closest to it.
pub fn display_nearest(displays: &[DisplayInfo], point: Point) -> Option<&DisplayInfo> {
    displays
        .iter()
        .find(|d| d.frame.contains(point))
        .or_else(|| displays.iter().min_by_key(|d| d.frame.distance_sq(point)))
}

/// The application's main window as provided by the host toolkit.
pub trait NativeWindow: Send + Sync {
    fn id(&self) -> WindowId;
    fn is_destroyed(&self) -> bool;
    fn is_visible(&self) -> bool;
    fn show(&self);
    fn hide(&self);
    fn focus(&self);
    fn bounds(&self) -> Bounds;
    fn set_bounds(&self, bounds: Bounds);
    fn set_visible_on_all_workspaces(&self, visible: bool);
    fn set_always_on_top(&self, on_top: bool);
}

/// Pointer and display queries.
pub trait ScreenInfo: Send + Sync {
    fn cursor_position(&self) -> Point;
    fn displays(&self) -> Vec<DisplayInfo>;
    /// Whether the platform has virtual desktops / full-screen spaces.
    fn supports_workspaces(&self) -> bool;
}
