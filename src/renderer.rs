//! Renderer binding.
//!
//! Installs the two built-in stages and the renderer's tasks into a
//! [`Scheduler`]:
//!
//! ```text
//! threlte-main-stage          user tasks (default stage of use_task)
//! threlte-render-stage        runs only when a render is due, then resets invalidation
//!   ├─ resize task            applies the canvas size once, then stops itself
//!   └─ auto render task       renders the default camera
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::camera::{Camera, DefaultCameraRegistry};
use crate::errors::Result;
use crate::invalidation::Invalidator;
use crate::scheduler::{Key, Scheduler, Stage, StageOptions, Task, TaskOptions};
use crate::settings::Size;
use crate::store::{Subscription, Writable};

pub const MAIN_STAGE: &str = "threlte-main-stage";
pub const RENDER_STAGE: &str = "threlte-render-stage";

/// The drawing backend driven by the frame loop.
pub trait Renderer {
    /// Draws one frame through `camera`.
    fn render(&mut self, camera: &Camera);

    /// Resizes the drawing surface, in CSS pixels.
    fn set_size(&mut self, size: Size);

    fn set_pixel_ratio(&mut self, _dpr: f32) {}

    /// Releases the backend. Called once when the owning context tears down.
    fn dispose(&mut self) {}
}

/// Observable state the binding reacts to.
pub(crate) struct RendererInputs<'a> {
    pub cameras: &'a DefaultCameraRegistry,
    pub size: &'a Writable<Size>,
    pub dpr: &'a Writable<f32>,
    pub auto_render: &'a Writable<bool>,
    pub xr_presenting: &'a Writable<bool>,
}

pub struct RendererBinding<R> {
    renderer: Rc<RefCell<R>>,
    main_stage: Stage,
    render_stage: Stage,
    auto_render_task: Task,
    resize_task: Task,
    disposed: bool,
    observers: Vec<Subscription>,
}

impl<R> fmt::Debug for RendererBinding<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererBinding")
            .field("main_stage", self.main_stage.key())
            .field("render_stage", self.render_stage.key())
            .field("auto_render", &self.auto_render_task.is_started())
            .field("resize_pending", &self.resize_task.is_started())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<R: Renderer + 'static> RendererBinding<R> {
    pub(crate) fn install(scheduler: &mut Scheduler, renderer: R, inputs: &RendererInputs<'_>) -> Result<Self> {
        let renderer = Rc::new(RefCell::new(renderer));
        let invalidator = scheduler.invalidator().clone();

        let main_stage = scheduler.create_stage(Key::symbol(MAIN_STAGE), StageOptions::new())?;
        let render_stage = {
            let invalidator = invalidator.clone();
            scheduler.create_stage(
                Key::symbol(RENDER_STAGE),
                StageOptions::new().after(&main_stage).callback(move |_, run_tasks| {
                    if invalidator.should_render() {
                        run_tasks(None);
                    }
                    invalidator.reset_frame_invalidation();
                }),
            )?
        };

        let auto_render_task = {
            let renderer = Rc::clone(&renderer);
            let cameras = inputs.cameras.clone();
            scheduler.create_task(
                &render_stage,
                Key::symbol("threlte-auto-render-task"),
                move |_| render_default_camera(&renderer, &cameras),
                TaskOptions::new().auto_start(inputs.auto_render.get()),
            )?
        };

        let resize_task = {
            let renderer = Rc::clone(&renderer);
            let size = inputs.size.clone();
            let presenting = inputs.xr_presenting.clone();
            scheduler.create_task(
                &render_stage,
                Key::symbol("threlte-resize-task"),
                move |frame| {
                    if presenting.get() {
                        return;
                    }
                    let Ok(mut renderer) = renderer.try_borrow_mut() else {
                        log::warn!("Renderer is borrowed, deferred resize");
                        return;
                    };
                    renderer.set_size(size.get());
                    frame.invalidate();
                    frame.stop();
                },
                TaskOptions::new()
                    .before(&auto_render_task)
                    .auto_start(false)
                    .auto_invalidate(false),
            )?
        };

        renderer.borrow_mut().set_pixel_ratio(inputs.dpr.get());

        let observers = vec![
            resize_on_change(inputs.size, &resize_task, &invalidator),
            resize_on_change(inputs.xr_presenting, &resize_task, &invalidator),
            {
                let task = auto_render_task.clone();
                let invalidator = invalidator.clone();
                inputs.auto_render.subscribe(move |enabled| {
                    if *enabled {
                        task.start();
                        invalidator.invalidate();
                    } else {
                        task.stop();
                    }
                })
            },
            {
                let renderer = Rc::clone(&renderer);
                let invalidator = invalidator.clone();
                inputs.dpr.subscribe(move |dpr| match renderer.try_borrow_mut() {
                    Ok(mut renderer) => {
                        renderer.set_pixel_ratio(*dpr);
                        invalidator.invalidate();
                    }
                    Err(_) => log::warn!("Renderer is borrowed, skipped pixel ratio {dpr}"),
                })
            },
        ];

        // The initial size is applied by the first rendered frame.
        resize_task.start();
        invalidator.invalidate();

        Ok(Self {
            renderer,
            main_stage,
            render_stage,
            auto_render_task,
            resize_task,
            disposed: false,
            observers,
        })
    }
}

impl<R: Renderer> RendererBinding<R> {
    #[must_use]
    pub fn renderer(&self) -> &Rc<RefCell<R>> {
        &self.renderer
    }

    #[must_use]
    pub fn main_stage(&self) -> &Stage {
        &self.main_stage
    }

    #[must_use]
    pub fn render_stage(&self) -> &Stage {
        &self.render_stage
    }

    #[must_use]
    pub fn auto_render_task(&self) -> &Task {
        &self.auto_render_task
    }

    #[must_use]
    pub fn resize_task(&self) -> &Task {
        &self.resize_task
    }

    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.observers.clear();
        self.auto_render_task.stop();
        self.resize_task.stop();
        match self.renderer.try_borrow_mut() {
            Ok(mut renderer) => renderer.dispose(),
            Err(_) => log::error!("Renderer is borrowed during teardown and was not disposed"),
        }
    }
}

fn render_default_camera<R: Renderer>(renderer: &RefCell<R>, cameras: &DefaultCameraRegistry) {
    let Some(camera) = cameras.active() else {
        log::trace!("No default camera, skipped render");
        return;
    };
    let (Ok(camera), Ok(mut renderer)) = (camera.try_borrow(), renderer.try_borrow_mut()) else {
        log::warn!("Camera or renderer is borrowed, skipped render");
        return;
    };
    renderer.render(&camera);
}

fn resize_on_change<T>(store: &Writable<T>, task: &Task, invalidator: &Invalidator) -> Subscription
where
    T: Clone + PartialEq + 'static,
{
    let task = task.clone();
    let invalidator = invalidator.clone();
    store.subscribe(move |_| {
        task.start();
        invalidator.invalidate();
    })
}
