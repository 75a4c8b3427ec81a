//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`ThrelteError`] covers two families:
//! - Configuration errors: duplicate keys, cyclic `before`/`after`
//!   constraints, tasks on unknown stages, use of a torn-down context
//! - Resource errors: a [`Disposable`](crate::disposal::Disposable) failing to
//!   release itself
//!
//! Configuration errors are returned before anything is mutated, so the
//! previously valid schedule stays in place. Resource errors never abort a
//! disposal flush; they are logged and handed to the context's error handler.
//!
//! # Usage
//!
//! ```rust,ignore
//! use threlte::errors::Result;
//!
//! fn setup(scheduler: &mut Scheduler) -> Result<()> {
//!     scheduler.create_stage("physics", StageOptions::new().before(&render_stage))?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::scheduler::Key;

/// Boxed error returned by fallible resource callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type.
#[derive(Error, Debug)]
pub enum ThrelteError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A stage or task with this key is already registered in its scope.
    #[error("A {kind} with key {key} already exists")]
    DuplicateKey {
        /// `"stage"` or `"task"`
        kind: &'static str,
        /// The conflicting key
        key: Key,
    },

    /// Inserting the node would create a cycle in the `before`/`after` graph.
    #[error("Cyclic {kind} ordering: {key} cannot be inserted ({conflict})")]
    CyclicOrdering {
        /// `"stage"` or `"task"`
        kind: &'static str,
        /// The key that was rejected
        key: Key,
        /// Which constraints collide
        conflict: String,
    },

    /// A task was attached to a stage that does not exist.
    #[error("Stage {0} does not exist")]
    UnknownStage(Key),

    /// The owning context was already torn down.
    #[error("`{0}` was called after the owning context was destroyed")]
    ContextDestroyed(&'static str),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A resource failed to dispose.
    #[error("Failed to dispose {object}: {source}")]
    Dispose {
        /// Description of the object
        object: String,
        /// The underlying failure
        #[source]
        source: BoxError,
    },
}

/// Alias for `Result<T, ThrelteError>`.
pub type Result<T> = std::result::Result<T, ThrelteError>;
