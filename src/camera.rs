//! Cameras and the default-camera registry.
//!
//! The renderer draws through whichever camera is the current *default*.
//! Any number of components may declare their camera the default at once;
//! the most recently declared one wins, and when it goes away the next most
//! recent takes over. When no candidate is left there is no default camera.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::Mat4;
use slotmap::{SlotMap, new_key_type};

use crate::errors::{Result, ThrelteError};
use crate::invalidation::Invalidator;
use crate::settings::Size;
use crate::store::{Subscription, Writable};

/// Projection parameters, resolved once when the camera is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    },
    /// A projection this crate does not manage.
    Custom(Mat4),
}

/// Closed set of camera kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraKind {
    Perspective,
    Orthographic,
    Other,
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub name: Cow<'static, str>,
    projection: Projection,
    projection_matrix: Mat4,
}

/// Camera shared between components, the registry and the renderer.
pub type SharedCamera = Rc<RefCell<Camera>>;

impl Camera {
    /// Perspective camera; `fov_y_degrees` is converted to radians.
    #[must_use]
    pub fn new_perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::from_projection(Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        })
    }

    #[must_use]
    pub fn new_orthographic(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        Self::from_projection(Projection::Orthographic {
            left,
            right,
            top,
            bottom,
            near,
            far,
        })
    }

    #[must_use]
    pub fn new_custom(projection_matrix: Mat4) -> Self {
        Self::from_projection(Projection::Custom(projection_matrix))
    }

    #[must_use]
    pub fn from_projection(projection: Projection) -> Self {
        let mut camera = Self {
            name: Cow::Borrowed("Camera"),
            projection,
            projection_matrix: Mat4::IDENTITY,
        };
        camera.update_projection_matrix();
        camera
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn into_shared(self) -> SharedCamera {
        Rc::new(RefCell::new(self))
    }

    #[must_use]
    pub fn kind(&self) -> CameraKind {
        match self.projection {
            Projection::Perspective { .. } => CameraKind::Perspective,
            Projection::Orthographic { .. } => CameraKind::Orthographic,
            Projection::Custom(_) => CameraKind::Other,
        }
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.update_projection_matrix();
    }

    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    pub fn update_projection_matrix(&mut self) {
        self.projection_matrix = match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
            Projection::Custom(matrix) => matrix,
        };
    }

    /// Fits the projection to a canvas of `size`.
    ///
    /// Perspective cameras take the canvas aspect; orthographic cameras span
    /// the canvas in pixels around the origin. Returns whether anything changed.
    pub fn fit_to_size(&mut self, size: Size) -> bool {
        let width = size.width as f32;
        let height = size.height as f32;
        let changed = match &mut self.projection {
            Projection::Perspective { aspect, .. } => {
                let Some(next) = size.aspect() else {
                    return false;
                };
                let changed = (*aspect - next).abs() > f32::EPSILON;
                *aspect = next;
                changed
            }
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                ..
            } => {
                let next = (width / -2.0, width / 2.0, height / 2.0, height / -2.0);
                let changed = (*left, *right, *top, *bottom) != next;
                (*left, *right, *top, *bottom) = next;
                changed
            }
            Projection::Custom(_) => false,
        };
        if changed {
            self.update_projection_matrix();
        }
        changed
    }
}

// ============================================================================
// Default camera registry
// ============================================================================

new_key_type! {
    /// A camera's candidacy for being the default.
    pub struct CameraToken;
}

#[derive(Default)]
struct RegistryState {
    cameras: SlotMap<CameraToken, SharedCamera>,
    /// Candidates in activation order; the last one is the default.
    order: Vec<CameraToken>,
    torn_down: bool,
}

/// Set of default-camera candidates. Clones share state.
#[derive(Clone)]
pub struct DefaultCameraRegistry {
    state: Rc<RefCell<RegistryState>>,
    invalidator: Invalidator,
}

impl fmt::Debug for DefaultCameraRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DefaultCameraRegistry")
            .field("candidates", &state.order)
            .field("torn_down", &state.torn_down)
            .finish_non_exhaustive()
    }
}

impl DefaultCameraRegistry {
    #[must_use]
    pub fn new(invalidator: Invalidator) -> Self {
        Self {
            state: Rc::new(RefCell::new(RegistryState::default())),
            invalidator,
        }
    }

    /// Makes `camera` the default until it is released or superseded.
    pub fn make_default(&self, camera: SharedCamera) -> Result<CameraToken> {
        let token = {
            let mut state = self.state.borrow_mut();
            if state.torn_down {
                return Err(ThrelteError::ContextDestroyed("make_default"));
            }
            let token = state.cameras.insert(camera);
            state.order.push(token);
            token
        };
        self.invalidator.invalidate();
        Ok(token)
    }

    /// Withdraws a candidacy. The next most recent candidate, if any, becomes
    /// the default.
    pub fn release(&self, token: CameraToken) -> bool {
        let was_active = {
            let mut state = self.state.borrow_mut();
            if state.cameras.remove(token).is_none() {
                if !state.torn_down {
                    log::warn!("Released unknown camera token {token:?}");
                }
                return false;
            }
            let was_active = state.order.last() == Some(&token);
            state.order.retain(|t| *t != token);
            if state.order.is_empty() {
                log::debug!("No default camera left");
            }
            was_active
        };
        if was_active {
            self.invalidator.invalidate();
        }
        true
    }

    /// The current default camera.
    #[must_use]
    pub fn active(&self) -> Option<SharedCamera> {
        let state = self.state.borrow();
        state
            .order
            .last()
            .and_then(|token| state.cameras.get(*token))
            .map(Rc::clone)
    }

    #[must_use]
    pub fn is_active(&self, token: CameraToken) -> bool {
        self.state.borrow().order.last() == Some(&token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn teardown(&self) {
        let mut state = self.state.borrow_mut();
        state.torn_down = true;
        state.cameras.clear();
        state.order.clear();
    }
}

// ============================================================================
// Camera bindings
// ============================================================================

/// Options for [`ThrelteContext::use_camera`](crate::context::ThrelteContext::use_camera).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraOptions {
    /// Declare the camera the default.
    pub make_default: bool,
    /// Leave the projection alone when the canvas is resized.
    pub manual: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            make_default: true,
            manual: false,
        }
    }
}

/// A camera mounted into a context. Dropping it unmounts the camera.
pub struct CameraBinding {
    camera: SharedCamera,
    registry: DefaultCameraRegistry,
    token: Option<CameraToken>,
    _resize: Option<Subscription>,
}

impl fmt::Debug for CameraBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraBinding")
            .field("token", &self.token)
            .field("follows_size", &self._resize.is_some())
            .finish_non_exhaustive()
    }
}

impl CameraBinding {
    pub(crate) fn new(
        registry: &DefaultCameraRegistry,
        camera: SharedCamera,
        options: CameraOptions,
        size: &Writable<Size>,
    ) -> Result<Self> {
        let invalidator = registry.invalidator.clone();

        let resize = if options.manual {
            None
        } else {
            if camera.borrow_mut().fit_to_size(size.get()) {
                invalidator.invalidate();
            }
            let target = Rc::clone(&camera);
            Some(size.subscribe(move |size| match target.try_borrow_mut() {
                Ok(mut camera) => {
                    if camera.fit_to_size(*size) {
                        invalidator.invalidate();
                    }
                }
                Err(_) => log::warn!("Camera is borrowed, skipped resize to {size:?}"),
            }))
        };

        let token = if options.make_default {
            Some(registry.make_default(Rc::clone(&camera))?)
        } else {
            None
        };

        Ok(Self {
            camera,
            registry: registry.clone(),
            token,
            _resize: resize,
        })
    }

    #[must_use]
    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    #[must_use]
    pub fn token(&self) -> Option<CameraToken> {
        self.token
    }

    /// Whether this camera is the current default.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.token.is_some_and(|token| self.registry.is_active(token))
    }
}

impl Drop for CameraBinding {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.registry.release(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perspective_fits_aspect() {
        let mut camera = Camera::new_perspective(45.0, 1.0, 0.1, 100.0);
        assert_eq!(camera.kind(), CameraKind::Perspective);
        assert!(camera.fit_to_size(Size::new(800, 400)));
        assert!(matches!(camera.projection(), Projection::Perspective { aspect, .. } if (*aspect - 2.0).abs() < 1e-6));
        assert!(!camera.fit_to_size(Size::new(800, 400)));
        assert!(!camera.fit_to_size(Size::new(800, 0)));
    }

    #[test]
    fn orthographic_spans_canvas() {
        let mut camera = Camera::new_orthographic(-1.0, 1.0, 1.0, -1.0, 0.1, 100.0);
        assert!(camera.fit_to_size(Size::new(200, 100)));
        assert_eq!(
            *camera.projection(),
            Projection::Orthographic {
                left: -100.0,
                right: 100.0,
                top: 50.0,
                bottom: -50.0,
                near: 0.1,
                far: 100.0,
            }
        );
    }

    #[test]
    fn custom_projection_is_untouched() {
        let matrix = Mat4::from_scale(glam::Vec3::splat(2.0));
        let mut camera = Camera::new_custom(matrix);
        assert_eq!(camera.kind(), CameraKind::Other);
        assert!(!camera.fit_to_size(Size::new(10, 10)));
        assert_eq!(camera.projection_matrix(), matrix);
    }
}
