#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod camera;
pub mod context;
pub mod disposal;
pub mod errors;
pub mod invalidation;
pub mod renderer;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod tick;
pub mod utils;
pub mod xr;

pub use camera::{Camera, CameraBinding, CameraKind, CameraOptions, DefaultCameraRegistry, Projection, SharedCamera};
pub use context::{Liveness, ThrelteContext, UseTaskOptions};
pub use disposal::{Disposable, DisposableObject, DisposalContext, DisposeScope};
pub use errors::{Result, ThrelteError};
pub use invalidation::{Invalidator, RenderMode};
pub use renderer::Renderer;
pub use scheduler::{FrameContext, Key, Scheduler, Stage, StageOptions, Task, TaskOptions};
pub use settings::{CanvasSettings, Size};
pub use store::{Subscription, Writable};
pub use tick::{AnimationLoop, ClockTickSource, FrameFeed, QueuedTickSource, TickSlot, TickSource, TickSwap};
pub use xr::{ReferenceSpace, XrSessionState, XrTimingBinding};
