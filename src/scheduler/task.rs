//! Tasks: per-frame callbacks owned by a stage.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::Key;
use crate::invalidation::Invalidator;

/// Per-frame task callback.
pub type TaskCallback = Box<dyn FnMut(&mut FrameContext<'_>)>;

/// What a task callback sees while it runs.
pub struct FrameContext<'a> {
    timestamp: f64,
    delta: f64,
    task: &'a Task,
    invalidator: &'a Invalidator,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(timestamp: f64, delta: f64, task: &'a Task, invalidator: &'a Invalidator) -> Self {
        Self {
            timestamp,
            delta,
            task,
            invalidator,
        }
    }

    /// Timestamp handed to [`Scheduler::run`](super::Scheduler::run).
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Time since the previous run, in the timestamp's unit.
    #[inline]
    #[must_use]
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// The running task.
    #[inline]
    #[must_use]
    pub fn task(&self) -> &Task {
        self.task
    }

    /// Stops the running task. The current invocation finishes normally.
    pub fn stop(&self) {
        self.task.stop();
    }

    pub fn invalidate(&self) {
        self.invalidator.invalidate();
    }
}

impl fmt::Debug for FrameContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameContext")
            .field("timestamp", &self.timestamp)
            .field("delta", &self.delta)
            .field("task", self.task.key())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct TaskState {
    key: Key,
    stage: Key,
    started: Cell<bool>,
    attached: Cell<bool>,
    auto_invalidate: bool,
    invalidator: Invalidator,
}

/// Handle to a scheduled task.
///
/// Clones share state: starting or stopping any clone affects the task in
/// the scheduler. Both operations are idempotent and may be called from
/// inside the task's own callback.
#[derive(Debug, Clone)]
pub struct Task {
    state: Rc<TaskState>,
}

impl Task {
    pub(crate) fn new(key: Key, stage: Key, auto_invalidate: bool, invalidator: Invalidator) -> Self {
        Self {
            state: Rc::new(TaskState {
                key,
                stage,
                started: Cell::new(false),
                attached: Cell::new(true),
                auto_invalidate,
                invalidator,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.state.key
    }

    /// Key of the owning stage.
    #[inline]
    #[must_use]
    pub fn stage(&self) -> &Key {
        &self.state.stage
    }

    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.started.get()
    }

    #[inline]
    #[must_use]
    pub fn auto_invalidate(&self) -> bool {
        self.state.auto_invalidate
    }

    /// Whether the task is still registered with its scheduler.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.attached.get()
    }

    pub fn start(&self) {
        if !self.is_attached() {
            log::warn!("Task {} was removed from its stage and cannot be started", self.key());
            return;
        }
        if self.state.started.replace(true) {
            return;
        }
        if self.state.auto_invalidate {
            self.state.invalidator.add_auto_invalidation();
        }
    }

    pub fn stop(&self) {
        if !self.state.started.replace(false) {
            return;
        }
        if self.state.auto_invalidate {
            self.state.invalidator.remove_auto_invalidation();
        }
    }

    pub(crate) fn detach(&self) {
        self.stop();
        self.state.attached.set(false);
    }

    /// Whether both handles refer to the same task.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl From<&Task> for Key {
    fn from(task: &Task) -> Self {
        task.key().clone()
    }
}

/// Options for [`Scheduler::create_task`](super::Scheduler::create_task).
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub(crate) before: Vec<Key>,
    pub(crate) after: Vec<Key>,
    pub(crate) auto_start: bool,
    pub(crate) auto_invalidate: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
            auto_start: true,
            auto_invalidate: false,
        }
    }
}

impl TaskOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs this task before `task` within the stage.
    #[must_use]
    pub fn before(mut self, task: impl Into<Key>) -> Self {
        self.before.push(task.into());
        self
    }

    /// Runs this task after `task` within the stage.
    #[must_use]
    pub fn after(mut self, task: impl Into<Key>) -> Self {
        self.after.push(task.into());
        self
    }

    /// Whether the task starts immediately. Defaults to `true`.
    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Whether a started task keeps requesting frames in on-demand mode.
    #[must_use]
    pub fn auto_invalidate(mut self, auto_invalidate: bool) -> Self {
        self.auto_invalidate = auto_invalidate;
        self
    }
}
