//! Stages: ordered buckets of tasks.

use std::fmt;

use super::Key;
use super::ordering::OrderedGraph;
use super::task::{FrameContext, Task, TaskCallback};
use crate::invalidation::Invalidator;

/// Custom stage driver.
///
/// Receives the frame delta and a `run_tasks` function. Calling `run_tasks`
/// runs every started task of the stage in order; passing `Some(delta)`
/// overrides the delta the tasks see. Not calling it skips the tasks for this
/// frame; calling it several times runs them several times.
pub type StageCallback = Box<dyn FnMut(f64, &mut dyn FnMut(Option<f64>))>;

/// Handle to a stage registered with a [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stage {
    key: Key,
}

impl Stage {
    pub(crate) fn new(key: Key) -> Self {
        Self { key }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl From<&Stage> for Key {
    fn from(stage: &Stage) -> Self {
        stage.key.clone()
    }
}

impl From<Stage> for Key {
    fn from(stage: Stage) -> Self {
        stage.key
    }
}

/// Options for [`Scheduler::create_stage`](super::Scheduler::create_stage).
#[derive(Default)]
pub struct StageOptions {
    pub(crate) before: Vec<Key>,
    pub(crate) after: Vec<Key>,
    pub(crate) callback: Option<StageCallback>,
}

impl StageOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(mut self, stage: impl Into<Key>) -> Self {
        self.before.push(stage.into());
        self
    }

    #[must_use]
    pub fn after(mut self, stage: impl Into<Key>) -> Self {
        self.after.push(stage.into());
        self
    }

    /// Takes over running the stage's tasks. See [`StageCallback`].
    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(f64, &mut dyn FnMut(Option<f64>)) + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for StageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOptions")
            .field("before", &self.before)
            .field("after", &self.after)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

pub(crate) struct TaskEntry {
    pub(crate) task: Task,
    pub(crate) callback: TaskCallback,
}

pub(crate) struct StageEntry {
    pub(crate) callback: Option<StageCallback>,
    pub(crate) tasks: OrderedGraph<Key, TaskEntry>,
}

impl StageEntry {
    pub(crate) fn new(callback: Option<StageCallback>) -> Self {
        Self {
            callback,
            tasks: OrderedGraph::new(),
        }
    }

    pub(crate) fn run(&mut self, timestamp: f64, delta: f64, invalidator: &Invalidator) {
        let Self { callback, tasks } = self;
        match callback {
            Some(callback) => callback(delta, &mut |override_delta: Option<f64>| {
                run_tasks(tasks, timestamp, override_delta.unwrap_or(delta), invalidator);
            }),
            None => run_tasks(tasks, timestamp, delta, invalidator),
        }
    }

    /// Detaches every task, e.g. when the stage is removed.
    pub(crate) fn detach_all(&self) {
        for entry in self.tasks.values() {
            entry.task.detach();
        }
    }
}

fn run_tasks(
    tasks: &mut OrderedGraph<Key, TaskEntry>,
    timestamp: f64,
    delta: f64,
    invalidator: &Invalidator,
) {
    for entry in tasks.values_mut() {
        // Flags may flip mid-iteration; a task stopped by an earlier one is skipped.
        if !entry.task.is_started() {
            continue;
        }
        let mut context = FrameContext::new(timestamp, delta, &entry.task, invalidator);
        (entry.callback)(&mut context);
    }
}
