//! Canvas Settings
//!
//! [`CanvasSettings`] is the configuration a context is created with. Every
//! field has a default, so partial configurations deserialize cleanly:
//!
//! ```rust,ignore
//! let settings: CanvasSettings = serde_json::from_str(r#"{ "render_mode": "always" }"#)?;
//! let ctx = ThrelteContext::new(renderer, settings)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::invalidation::RenderMode;

/// Canvas size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `width / height`, or `None` for a zero height.
    #[must_use]
    pub fn aspect(&self) -> Option<f32> {
        (self.height > 0).then(|| self.width as f32 / self.height as f32)
    }
}

impl Default for Size {
    /// The default size of an HTML canvas element.
    fn default() -> Self {
        Self::new(300, 150)
    }
}

/// Configuration of a [`ThrelteContext`](crate::context::ThrelteContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasSettings {
    /// When frames are rendered. Defaults to [`RenderMode::OnDemand`].
    pub render_mode: RenderMode,
    /// Whether the built-in render task draws the scene. Defaults to `true`.
    pub auto_render: bool,
    /// Initial canvas size.
    pub size: Size,
    /// Device pixel ratio handed to the renderer.
    pub dpr: f32,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::OnDemand,
            auto_render: true,
            size: Size::default(),
            dpr: 1.0,
        }
    }
}

impl CanvasSettings {
    #[must_use]
    pub fn with_render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self
    }

    #[must_use]
    pub fn with_auto_render(mut self, auto_render: bool) -> Self {
        self.auto_render = auto_render;
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Size::new(width, height);
        self
    }

    #[must_use]
    pub fn with_dpr(mut self, dpr: f32) -> Self {
        self.dpr = dpr;
        self
    }
}
