//! The rendering context.
//!
//! [`ThrelteContext`] is the owning scope of one canvas. Components receive a
//! reference to it and reach everything through it: the scheduler, the
//! invalidator, the disposal context and the default-camera registry. Dropping
//! the context tears all of it down.

use std::cell::{Cell, Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::camera::{CameraBinding, CameraOptions, DefaultCameraRegistry, SharedCamera};
use crate::disposal::{DisposalContext, DisposeScope};
use crate::errors::{Result, ThrelteError};
use crate::invalidation::{Invalidator, RenderMode};
use crate::renderer::{Renderer, RendererBinding, RendererInputs};
use crate::scheduler::{FrameContext, Key, Scheduler, Stage, StageOptions, Task, TaskOptions};
use crate::settings::{CanvasSettings, Size};
use crate::store::Writable;

/// Answers whether the owning context is still alive.
///
/// Asynchronous work captures a clone and checks it before writing results
/// back; results arriving after teardown are dropped.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Rc<Cell<bool>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
        }
    }
}

impl Liveness {
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Hands `value` to `apply` if the context is alive, else drops it.
    /// Returns whether `apply` ran.
    pub fn settle<T>(&self, value: T, apply: impl FnOnce(T)) -> bool {
        if !self.is_alive() {
            log::trace!("Discarded a result that settled after teardown");
            return false;
        }
        apply(value);
        true
    }

    fn kill(&self) {
        self.alive.set(false);
    }
}

/// Options for [`ThrelteContext::use_task`].
#[derive(Debug, Clone)]
pub struct UseTaskOptions {
    key: Option<Key>,
    stage: Option<Key>,
    before: Vec<Key>,
    after: Vec<Key>,
    auto_start: bool,
    auto_invalidate: bool,
}

impl Default for UseTaskOptions {
    fn default() -> Self {
        Self {
            key: None,
            stage: None,
            before: Vec::new(),
            after: Vec::new(),
            auto_start: true,
            auto_invalidate: true,
        }
    }
}

impl UseTaskOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task key. Defaults to a fresh symbol.
    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn stage(mut self, stage: impl Into<Key>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    #[must_use]
    pub fn before(mut self, task: impl Into<Key>) -> Self {
        self.before.push(task.into());
        self
    }

    #[must_use]
    pub fn after(mut self, task: impl Into<Key>) -> Self {
        self.after.push(task.into());
        self
    }

    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Whether the started task keeps rendering in on-demand mode. Defaults
    /// to `true`.
    #[must_use]
    pub fn auto_invalidate(mut self, auto_invalidate: bool) -> Self {
        self.auto_invalidate = auto_invalidate;
        self
    }
}

/// Owning scope of one canvas.
pub struct ThrelteContext<R: Renderer + 'static> {
    scheduler: Scheduler,
    invalidator: Invalidator,
    disposal: DisposalContext,
    cameras: DefaultCameraRegistry,
    size: Writable<Size>,
    dpr: Writable<f32>,
    auto_render: Writable<bool>,
    xr_presenting: Writable<bool>,
    renderer: RendererBinding<R>,
    liveness: Liveness,
}

impl<R: Renderer + 'static> fmt::Debug for ThrelteContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrelteContext")
            .field("scheduler", &self.scheduler)
            .field("render_mode", &self.invalidator.render_mode())
            .field("disposal", &self.disposal)
            .field("cameras", &self.cameras)
            .field("size", &self.size.get())
            .field("renderer", &self.renderer)
            .field("alive", &self.liveness.is_alive())
            .finish()
    }
}

impl<R: Renderer + 'static> ThrelteContext<R> {
    pub fn new(renderer: R, settings: CanvasSettings) -> Result<Self> {
        let CanvasSettings {
            render_mode,
            auto_render,
            size,
            dpr,
        } = settings;

        let invalidator = Invalidator::new(render_mode);
        let mut scheduler = Scheduler::new(invalidator.clone());
        let cameras = DefaultCameraRegistry::new(invalidator.clone());
        let size = Writable::new(size);
        let dpr = Writable::new(dpr);
        let auto_render = Writable::new(auto_render);
        let xr_presenting = Writable::new(false);

        let renderer = RendererBinding::install(
            &mut scheduler,
            renderer,
            &RendererInputs {
                cameras: &cameras,
                size: &size,
                dpr: &dpr,
                auto_render: &auto_render,
                xr_presenting: &xr_presenting,
            },
        )?;

        log::debug!("Context created ({render_mode:?}, {}x{})", size.get().width, size.get().height);
        Ok(Self {
            scheduler,
            invalidator,
            disposal: DisposalContext::new(),
            cameras,
            size,
            dpr,
            auto_render,
            xr_presenting,
            renderer,
            liveness: Liveness::default(),
        })
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Registers a per-frame task.
    ///
    /// The task runs in the given stage; without one, in the stage of the
    /// first task named in `before`/`after`; otherwise in the main stage.
    pub fn use_task<F>(&mut self, callback: F, options: UseTaskOptions) -> Result<Task>
    where
        F: FnMut(&mut FrameContext<'_>) + 'static,
    {
        self.ensure_alive("use_task")?;
        let UseTaskOptions {
            key,
            stage,
            before,
            after,
            auto_start,
            auto_invalidate,
        } = options;

        let stage = stage
            .or_else(|| {
                before
                    .iter()
                    .chain(&after)
                    .find_map(|task| self.scheduler.stage_of_task(task))
                    .map(|stage| stage.key().clone())
            })
            .unwrap_or_else(|| self.renderer.main_stage().key().clone());

        let mut task_options = TaskOptions::new()
            .auto_start(auto_start)
            .auto_invalidate(auto_invalidate);
        for target in before {
            task_options = task_options.before(target);
        }
        for target in after {
            task_options = task_options.after(target);
        }

        let key = key.unwrap_or_else(|| Key::symbol("use-task"));
        self.scheduler.create_task(stage, key, callback, task_options)
    }

    pub fn remove_task(&mut self, task: &Task) -> bool {
        self.scheduler.remove_task(task)
    }

    /// Returns the stage registered under `key`, creating it with `options`
    /// if there is none.
    pub fn use_stage(&mut self, key: impl Into<Key>, options: StageOptions) -> Result<Stage> {
        self.ensure_alive("use_stage")?;
        let key = key.into();
        if let Some(stage) = self.scheduler.stage(&key) {
            return Ok(stage);
        }
        self.scheduler.create_stage(key, options)
    }

    #[must_use]
    pub fn main_stage(&self) -> &Stage {
        self.renderer.main_stage()
    }

    #[must_use]
    pub fn render_stage(&self) -> &Stage {
        self.renderer.render_stage()
    }

    #[must_use]
    pub fn auto_render_task(&self) -> &Task {
        self.renderer.auto_render_task()
    }

    #[must_use]
    pub fn resize_task(&self) -> &Task {
        self.renderer.resize_task()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Runs one frame: releases resources unmounted since the last frame,
    /// then runs the scheduler.
    pub fn advance_frame(&mut self, timestamp: f64) {
        if !self.liveness.is_alive() {
            log::warn!("Frame {timestamp} requested after teardown");
            return;
        }
        self.disposal.flush(false);
        self.scheduler.run(timestamp);
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    #[must_use]
    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn invalidate(&self) {
        self.invalidator.invalidate();
    }

    /// Requests one frame in [`RenderMode::Manual`].
    pub fn advance(&self) {
        self.invalidator.advance();
    }

    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.invalidator.render_mode()
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.invalidator.set_render_mode(mode);
    }

    #[must_use]
    pub fn should_render(&self) -> bool {
        self.invalidator.should_render()
    }

    // ========================================================================
    // Canvas state
    // ========================================================================

    #[must_use]
    pub fn size(&self) -> &Writable<Size> {
        &self.size
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set(Size::new(width, height));
    }

    #[must_use]
    pub fn dpr(&self) -> &Writable<f32> {
        &self.dpr
    }

    #[must_use]
    pub fn auto_render(&self) -> &Writable<bool> {
        &self.auto_render
    }

    pub fn set_auto_render(&self, auto_render: bool) {
        self.auto_render.set(auto_render);
    }

    /// Whether an immersive session is presenting. Resizing waits until it is
    /// not.
    #[must_use]
    pub fn xr_presenting(&self) -> &Writable<bool> {
        &self.xr_presenting
    }

    #[must_use]
    pub fn renderer(&self) -> Ref<'_, R> {
        self.renderer.renderer().borrow()
    }

    pub fn renderer_mut(&self) -> RefMut<'_, R> {
        self.renderer.renderer().borrow_mut()
    }

    // ========================================================================
    // Cameras and disposal
    // ========================================================================

    #[must_use]
    pub fn cameras(&self) -> &DefaultCameraRegistry {
        &self.cameras
    }

    /// The camera the renderer draws through.
    #[must_use]
    pub fn camera(&self) -> Option<SharedCamera> {
        self.cameras.active()
    }

    /// Mounts a camera: optionally makes it the default and keeps its
    /// projection fitted to the canvas.
    pub fn use_camera(&self, camera: SharedCamera, options: CameraOptions) -> Result<CameraBinding> {
        CameraBinding::new(&self.cameras, camera, options, &self.size)
    }

    #[must_use]
    pub fn disposal(&self) -> &DisposalContext {
        &self.disposal
    }

    /// A root dispose scope. `None` disposes.
    #[must_use]
    pub fn dispose_scope(&self, dispose: Option<bool>) -> DisposeScope {
        DisposeScope::new(&self.disposal, dispose)
    }

    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        !self.liveness.is_alive()
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<()> {
        if self.liveness.is_alive() {
            Ok(())
        } else {
            Err(ThrelteError::ContextDestroyed(operation))
        }
    }

    /// Disposes every tracked resource and the renderer. Idempotent; also
    /// runs on drop.
    pub fn teardown(&mut self) {
        if !self.liveness.is_alive() {
            return;
        }
        self.liveness.kill();
        let released = self.disposal.teardown();
        self.cameras.teardown();
        self.scheduler.clear();
        self.renderer.dispose();
        log::debug!("Context torn down ({released} resources released)");
    }
}

impl<R: Renderer + 'static> Drop for ThrelteContext<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}
