//! Render Invalidation
//!
//! [`Invalidator`] decides whether the render stage should draw a frame.
//! It is a cheap cloneable handle: every clone observes and mutates the same
//! state, so task callbacks, camera bindings and host code can all request
//! frames without holding the scheduler.
//!
//! # Render Modes
//!
//! | Mode | A frame is rendered when |
//! |------|--------------------------|
//! | [`RenderMode::OnDemand`] | `invalidate()` was called, or an auto-invalidating task is running |
//! | [`RenderMode::Always`] | every tick |
//! | [`RenderMode::Manual`] | `advance()` was called; `invalidate()` is only recorded |

use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Policy governing when frames are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Render only when invalidated.
    #[default]
    OnDemand,
    /// Render on every tick.
    Always,
    /// Render only when explicitly advanced.
    Manual,
}

#[derive(Debug, Default)]
struct InvalidationState {
    mode: Cell<RenderMode>,
    frame_invalidated: Cell<bool>,
    advance_requested: Cell<bool>,
    /// Number of started tasks with `auto_invalidate` set.
    auto_invalidations: Cell<usize>,
}

/// Shared handle to the render invalidation state of one context.
#[derive(Debug, Clone, Default)]
pub struct Invalidator {
    state: Rc<InvalidationState>,
}

impl Invalidator {
    #[must_use]
    pub fn new(mode: RenderMode) -> Self {
        let invalidator = Self::default();
        invalidator.state.mode.set(mode);
        invalidator
    }

    /// Requests a new frame.
    #[inline]
    pub fn invalidate(&self) {
        self.state.frame_invalidated.set(true);
    }

    /// Requests exactly one frame in [`RenderMode::Manual`].
    #[inline]
    pub fn advance(&self) {
        self.state.advance_requested.set(true);
    }

    #[inline]
    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.state.mode.get()
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        let previous = self.state.mode.replace(mode);
        if previous != mode {
            log::debug!("Render mode changed: {previous:?} -> {mode:?}");
        }
    }

    /// Whether `invalidate()` was called since the last reset.
    #[inline]
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.state.frame_invalidated.get()
    }

    /// Number of currently started auto-invalidating tasks.
    #[inline]
    #[must_use]
    pub fn auto_invalidations(&self) -> usize {
        self.state.auto_invalidations.get()
    }

    /// Whether the render stage should draw during the current tick.
    #[must_use]
    pub fn should_render(&self) -> bool {
        let state = &self.state;
        match state.mode.get() {
            RenderMode::Always => true,
            RenderMode::OnDemand => {
                state.frame_invalidated.get() || state.auto_invalidations.get() > 0
            }
            RenderMode::Manual => state.advance_requested.get(),
        }
    }

    /// Clears pending `invalidate()`/`advance()` requests once a frame was presented.
    pub fn reset_frame_invalidation(&self) {
        self.state.frame_invalidated.set(false);
        self.state.advance_requested.set(false);
    }

    pub(crate) fn add_auto_invalidation(&self) {
        let count = &self.state.auto_invalidations;
        count.set(count.get() + 1);
    }

    pub(crate) fn remove_auto_invalidation(&self) {
        let count = &self.state.auto_invalidations;
        count.set(count.get().saturating_sub(1));
    }

    /// Whether two handles share the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}
