//! Frame Scheduler
//!
//! The [`Scheduler`] owns an ordered set of [`Stage`]s, each owning an
//! ordered set of [`Task`]s, and runs every started task once per
//! [`Scheduler::run`] call.
//!
//! # Ordering
//!
//! Stages are ordered relative to other stages and tasks relative to sibling
//! tasks through `before`/`after` constraints. The resolved order is a
//! topological order of the constraint graph in which unconstrained entries
//! keep their insertion order. It is updated incrementally on every insertion;
//! a constraint that would close a cycle is rejected with
//! [`ThrelteError::CyclicOrdering`] and the schedule is left untouched.
//!
//! Constraints may name stages or tasks that are not registered yet. They take
//! effect as soon as the named entry is added.
//!
//! # Example
//!
//! ```rust,ignore
//! use threlte::scheduler::{Scheduler, StageOptions, TaskOptions};
//!
//! let mut scheduler = Scheduler::default();
//! let main = scheduler.create_stage("main", StageOptions::new())?;
//! let physics = scheduler.create_stage("physics", StageOptions::new().before(&main))?;
//!
//! scheduler.create_task(&physics, "step", |frame| world.step(frame.delta()), TaskOptions::new())?;
//! scheduler.run(16.6);
//! ```

pub mod key;
pub(crate) mod ordering;
pub mod stage;
pub mod task;

pub use key::Key;
pub use stage::{Stage, StageCallback, StageOptions};
pub use task::{FrameContext, Task, TaskCallback, TaskOptions};

use std::fmt;

use self::ordering::{OrderError, OrderedGraph};
use self::stage::{StageEntry, TaskEntry};
use crate::errors::{Result, ThrelteError};
use crate::invalidation::Invalidator;

fn order_error(kind: &'static str, error: OrderError<Key>) -> ThrelteError {
    match error {
        OrderError::Duplicate(key) => ThrelteError::DuplicateKey { kind, key },
        OrderError::Cycle { key, conflict } => ThrelteError::CyclicOrdering {
            kind,
            key,
            conflict,
        },
    }
}

/// Runs stages and their tasks in dependency order.
pub struct Scheduler {
    stages: OrderedGraph<Key, StageEntry>,
    invalidator: Invalidator,
    last_timestamp: Option<f64>,
    frame_count: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Invalidator::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("last_timestamp", &self.last_timestamp)
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates an empty scheduler. Tasks report to `invalidator`.
    #[must_use]
    pub fn new(invalidator: Invalidator) -> Self {
        Self {
            stages: OrderedGraph::new(),
            invalidator,
            last_timestamp: None,
            frame_count: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    /// Number of completed [`run`](Self::run) calls.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    // ========================================================================
    // Stages
    // ========================================================================

    pub fn create_stage(&mut self, key: impl Into<Key>, options: StageOptions) -> Result<Stage> {
        let key = key.into();
        let StageOptions {
            before,
            after,
            callback,
        } = options;

        self.stages
            .insert(key.clone(), StageEntry::new(callback), &before, &after)
            .map_err(|e| order_error("stage", e))?;

        log::debug!("Created stage {key}");
        Ok(Stage::new(key))
    }

    #[must_use]
    pub fn stage(&self, key: &Key) -> Option<Stage> {
        self.stages.contains(key).then(|| Stage::new(key.clone()))
    }

    #[must_use]
    pub fn has_stage(&self, key: &Key) -> bool {
        self.stages.contains(key)
    }

    /// Removes a stage and detaches all of its tasks.
    pub fn remove_stage(&mut self, key: &Key) -> bool {
        let Some(entry) = self.stages.remove(key) else {
            return false;
        };
        entry.detach_all();
        log::debug!("Removed stage {key} ({} tasks)", entry.tasks.len());
        true
    }

    /// Stage keys in run order.
    #[must_use]
    pub fn stage_order(&self) -> Vec<Key> {
        self.stages.keys().cloned().collect()
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn create_task<F>(
        &mut self,
        stage: impl Into<Key>,
        key: impl Into<Key>,
        callback: F,
        options: TaskOptions,
    ) -> Result<Task>
    where
        F: FnMut(&mut FrameContext<'_>) + 'static,
    {
        let stage = stage.into();
        let key = key.into();
        let entry = self
            .stages
            .get_mut(&stage)
            .ok_or_else(|| ThrelteError::UnknownStage(stage.clone()))?;

        let task = Task::new(
            key.clone(),
            stage.clone(),
            options.auto_invalidate,
            self.invalidator.clone(),
        );
        entry
            .tasks
            .insert(
                key.clone(),
                TaskEntry {
                    task: task.clone(),
                    callback: Box::new(callback),
                },
                &options.before,
                &options.after,
            )
            .map_err(|e| order_error("task", e))?;

        if options.auto_start {
            task.start();
        }
        log::debug!("Created task {key} in stage {stage}");
        Ok(task)
    }

    /// Removes a task. Takes effect before the next [`run`](Self::run).
    pub fn remove_task(&mut self, task: &Task) -> bool {
        let Some(entry) = self.stages.get_mut(task.stage()) else {
            return false;
        };
        match entry.tasks.get(task.key()) {
            Some(registered) if registered.task.ptr_eq(task) => {}
            _ => return false,
        }
        if let Some(removed) = entry.tasks.remove(task.key()) {
            removed.task.detach();
            log::debug!("Removed task {} from stage {}", task.key(), task.stage());
        }
        true
    }

    /// The registered task with `key` in `stage`.
    #[must_use]
    pub fn task(&self, stage: &Key, key: &Key) -> Option<Task> {
        self.stages
            .get(stage)?
            .tasks
            .get(key)
            .map(|entry| entry.task.clone())
    }

    /// The stage holding a task with `key`, searching stages in run order.
    #[must_use]
    pub fn stage_of_task(&self, key: &Key) -> Option<Stage> {
        self.stages
            .keys()
            .zip(self.stages.values())
            .find(|(_, entry)| entry.tasks.contains(key))
            .map(|(stage, _)| Stage::new(stage.clone()))
    }

    /// Task keys of `stage` in run order.
    #[must_use]
    pub fn task_order(&self, stage: &Key) -> Vec<Key> {
        self.stages
            .get(stage)
            .map(|entry| entry.tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Runs every started task of every stage in order.
    ///
    /// Tasks receive `timestamp` and the difference to the previous call's
    /// timestamp (`0` on the first call).
    pub fn run(&mut self, timestamp: f64) {
        let delta = match self.last_timestamp {
            Some(last) if timestamp >= last => timestamp - last,
            Some(last) => {
                log::debug!("Scheduler timestamp went backwards ({last} -> {timestamp})");
                0.0
            }
            None => 0.0,
        };
        self.last_timestamp = Some(timestamp);

        log::trace!("Frame {} at {timestamp} (delta {delta})", self.frame_count);
        for stage in self.stages.values_mut() {
            stage.run(timestamp, delta, &self.invalidator);
        }
        self.frame_count += 1;
    }

    /// Detaches every task and removes every stage.
    pub fn clear(&mut self) {
        for key in self.stage_order() {
            self.remove_stage(&key);
        }
    }
}
