//! Main window show/hide state machine.
//!
//! `Hidden <-> Visible`, driven by the global hotkey, the double-press signal
//! and explicit toggles. A show arms a short guard during which blur-triggered
//! hides are ignored: the blur generated by our own `show()`/`focus()` must not
//! immediately hide the window again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::timer::DeferredTask;
use super::{display_nearest, NativeWindow, ScreenInfo};

/// Presentation settings for the main window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBehavior {
    /// Frameless, centered, auto-hide on blur.
    pub spotlight: bool,
    pub width: u32,
    pub height: u32,
    /// Briefly join all workspaces on show so the window opens on the active desktop.
    pub follow_desktop: bool,
    pub always_on_top: bool,
    pub guard_delay: Duration,
    pub workspace_revert_delay: Duration,
}

impl Default for WindowBehavior {
    fn default() -> Self {
        Self {
            spotlight: true,
            width: 700,
            height: 500,
            follow_desktop: true,
            always_on_top: false,
            guard_delay: Duration::from_millis(500),
            workspace_revert_delay: Duration::from_millis(300),
        }
    }
}

#[derive(Default)]
struct WindowState {
    window: Option<Arc<dyn NativeWindow>>,
    visible: bool,
    last_show: Option<Instant>,
    guard_active: bool,
    guard_task: Option<DeferredTask>,
    revert_task: Option<DeferredTask>,
    /// Workspace flags are raised and the revert has not run yet.
    revert_pending: bool,
    /// Bumped on every show and detach; deferred tasks from older generations are no-ops.
    generation: u64,
}

impl WindowState {
    fn guard_active(&self, guard_delay: Duration) -> bool {
        self.guard_active
            && self
                .last_show
                .is_some_and(|shown| shown.elapsed() < guard_delay)
    }

    fn reset_tasks(&mut self) {
        if let Some(task) = self.guard_task.take() {
            task.cancel();
        }
        if let Some(task) = self.revert_task.take() {
            task.cancel();
        }
    }

    /// Cancel pending tasks and release the window. Returns the window when
    /// its workspace flags still need reverting.
    fn release(&mut self) -> Option<Arc<dyn NativeWindow>> {
        self.reset_tasks();
        self.generation += 1;
        self.guard_active = false;
        self.visible = false;
        let window = self.window.take();
        let pending = std::mem::take(&mut self.revert_pending);
        window.filter(|w| pending && !w.is_destroyed())
    }
}

fn restore_workspace_flags(window: &dyn NativeWindow, on_top: bool) {
    window.set_visible_on_all_workspaces(false);
    window.set_always_on_top(on_top);
    debug!(window = window.id(), "workspace flags reverted");
}

/// Controls the singleton application window.
pub struct MainWindowOrchestrator {
    behavior: WindowBehavior,
    screen: Arc<dyn ScreenInfo>,
    state: Arc<Mutex<WindowState>>,
}

impl std::fmt::Debug for MainWindowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MainWindowOrchestrator")
            .field("behavior", &self.behavior)
            .field("attached", &state.window.is_some())
            .field("visible", &state.visible)
            .field("guard_active", &state.guard_active)
            .finish()
    }
}

impl MainWindowOrchestrator {
    pub fn new(behavior: WindowBehavior, screen: Arc<dyn ScreenInfo>) -> Self {
        Self {
            behavior,
            screen,
            state: Arc::new(Mutex::new(WindowState::default())),
        }
    }

    pub fn behavior(&self) -> &WindowBehavior {
        &self.behavior
    }

    /// Attach a window, replacing any previous one. A replaced window whose
    /// follow-desktop revert is still pending is reverted now.
    pub fn attach_window(&self, window: Arc<dyn NativeWindow>) {
        let previous = self.state.lock().release();
        if let Some(previous) = previous {
            restore_workspace_flags(previous.as_ref(), self.behavior.always_on_top);
        }

        window.set_always_on_top(self.behavior.always_on_top);
        let mut state = self.state.lock();
        state.visible = window.is_visible();
        debug!(window = window.id(), "main window attached");
        state.window = Some(window);
    }

    /// Forget the window. Pending deferred tasks are cancelled and a pending
    /// workspace revert runs immediately.
    pub fn detach_window(&self) {
        let mut state = self.state.lock();
        let had_window = state.window.is_some();
        let pending = state.release();
        drop(state);

        if let Some(window) = pending {
            restore_workspace_flags(window.as_ref(), self.behavior.always_on_top);
        }
        if had_window {
            debug!("main window detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().window.is_some()
    }

    /// Show and focus the window on the display under the pointer.
    pub fn show(&self) -> bool {
        let Some(window) = self.live_window("show") else {
            return false;
        };

        let displays = self.screen.displays();
        let cursor = self.screen.cursor_position();
        if let Some(display) = display_nearest(&displays, cursor) {
            let target = display
                .work_area
                .centered(self.behavior.width, self.behavior.height);
            let display_id = display.id;
            debug!(display_id, ?target, "positioning main window");
            window.set_bounds(target);
        }

        let follow = self.behavior.follow_desktop && self.screen.supports_workspaces();

        // Arm the guard before the host sees show/focus so their blur is ignored.
        {
            let mut state = self.state.lock();
            state.reset_tasks();
            state.generation += 1;
            state.visible = true;
            state.last_show = Some(Instant::now());
            state.guard_active = true;

            let generation = state.generation;
            let weak = Arc::downgrade(&self.state);
            state.guard_task = Some(DeferredTask::schedule(
                self.behavior.guard_delay,
                move || clear_guard(&weak, generation),
            ));

            state.revert_pending = follow;
            if follow {
                let weak = Arc::downgrade(&self.state);
                let on_top = self.behavior.always_on_top;
                state.revert_task = Some(DeferredTask::schedule(
                    self.behavior.workspace_revert_delay,
                    move || revert_workspace_flags(&weak, generation, on_top),
                ));
            }
        }

        if follow {
            window.set_visible_on_all_workspaces(true);
            window.set_always_on_top(true);
        }
        window.show();
        window.focus();

        info!(window = window.id(), "main window shown");
        true
    }

    /// Hide the window. A blur-triggered hide inside the guard is ignored.
    pub fn hide(&self, is_blur: bool) -> bool {
        let window = {
            let mut state = self.state.lock();
            let Some(window) = state.window.clone() else {
                warn!("hide requested with no main window");
                return false;
            };
            if is_blur && state.guard_active(self.behavior.guard_delay) {
                debug!("blur inside show guard, hide ignored");
                return false;
            }
            state.visible = false;
            state.guard_active = false;
            window
        };

        if window.is_destroyed() {
            self.detach_window();
            return false;
        }

        window.hide();
        debug!(window = window.id(), blur = is_blur, "main window hidden");
        true
    }

    /// Focus-loss handler. Only spotlight windows auto-hide.
    pub fn handle_blur(&self) -> bool {
        if !self.behavior.spotlight {
            return false;
        }
        self.hide(true)
    }

    /// Hide if visible, show if hidden. Returns the resulting visibility.
    pub fn toggle(&self) -> bool {
        let Some(window) = self.live_window("toggle") else {
            return false;
        };

        if window.is_visible() {
            self.hide(false);
            false
        } else {
            self.show()
        }
    }

    pub fn on_hotkey(&self) -> bool {
        debug!("global hotkey");
        self.toggle()
    }

    pub fn on_double_press(&self) -> bool {
        debug!("modifier double press");
        self.toggle()
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn guard_active(&self) -> bool {
        self.state.lock().guard_active(self.behavior.guard_delay)
    }

    fn live_window(&self, operation: &str) -> Option<Arc<dyn NativeWindow>> {
        let window = self.state.lock().window.clone();
        match window {
            Some(window) if window.is_destroyed() => {
                warn!(operation, "main window was destroyed");
                self.detach_window();
                None
            }
            Some(window) => Some(window),
            None => {
                warn!(operation, "no main window");
                None
            }
        }
    }
}

impl Drop for MainWindowOrchestrator {
    fn drop(&mut self) {
        let pending = self.state.lock().release();
        if let Some(window) = pending {
            restore_workspace_flags(window.as_ref(), self.behavior.always_on_top);
        }
    }
}

fn clear_guard(state: &Weak<Mutex<WindowState>>, generation: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock();
    if state.generation == generation {
        state.guard_active = false;
    }
}

fn revert_workspace_flags(state: &Weak<Mutex<WindowState>>, generation: u64, on_top: bool) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let window = {
        let mut state = state.lock();
        if state.generation != generation {
            return;
        }
        state.revert_pending = false;
        state.window.clone()
    };
    if let Some(window) = window.filter(|w| !w.is_destroyed()) {
        restore_workspace_flags(window.as_ref(), on_top);
    }
}
