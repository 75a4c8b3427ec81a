//! Resource Disposal
//!
//! [`DisposalContext`] reference-counts disposable resources claimed by
//! mounted components and releases each one exactly once after the last
//! claim is gone.
//!
//! # Lifecycle of a tracked object
//!
//! ```text
//! Unregistered --mounted--> Mounted(1) --mounted--> Mounted(n + 1)
//! Mounted(n > 1) --unmounted--> Mounted(n - 1)
//! Mounted(1) --unmounted--> PendingDispose --flush--> Unregistered (disposed)
//! PendingDispose --mounted--> Mounted(1)          (re-claimed before the flush)
//! any --remove_from_disposal--> Unregistered      (not disposed)
//! ```
//!
//! Disposal never happens inside `object_unmounted`: it is deferred to
//! [`DisposalContext::flush`], which the frame loop calls once per frame. A
//! component that unmounts and immediately re-mounts the same resource within
//! one update therefore never sees it disposed.
//!
//! Flushing is gated by a dirty flag set when a count reaches zero, so frames
//! without unmounts do not scan the tracked set. `flush(true)` bypasses the
//! flag. Tearing the context down disposes every tracked object regardless of
//! its count.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::errors::{BoxError, Result, ThrelteError};

/// A resource that must be released explicitly (GPU buffers, textures, ...).
pub trait Disposable {
    /// Releases the resource. Called at most once by a [`DisposalContext`].
    fn dispose(&self) -> std::result::Result<(), BoxError>;

    /// Name used in logs and errors.
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// Shared handle to a disposable resource.
pub type DisposableObject = Rc<dyn Disposable>;

/// Identity of a tracked object: the address of its shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ObjectId(usize);

impl ObjectId {
    fn of(object: &DisposableObject) -> Self {
        Self(Rc::as_ptr(object).cast::<()>() as usize)
    }
}

struct Tracked {
    object: DisposableObject,
    mounted: usize,
    /// Registration order, for deterministic flushes.
    sequence: u64,
}

type ErrorHandler = Rc<dyn Fn(&ThrelteError)>;

#[derive(Default)]
struct DisposalState {
    objects: FxHashMap<ObjectId, Tracked>,
    next_sequence: u64,
    should_dispose: bool,
    torn_down: bool,
    error_handler: Option<ErrorHandler>,
}

/// Shared handle to the disposal bookkeeping of one context.
#[derive(Clone, Default)]
pub struct DisposalContext {
    state: Rc<RefCell<DisposalState>>,
}

impl fmt::Debug for DisposalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DisposalContext")
            .field("tracked", &state.objects.len())
            .field("should_dispose", &state.should_dispose)
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

impl DisposalContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes dispose failures to the host in addition to the log.
    pub fn set_error_handler(&self, handler: impl Fn(&ThrelteError) + 'static) {
        self.state.borrow_mut().error_handler = Some(Rc::new(handler));
    }

    fn live_state(&self, operation: &'static str) -> Result<std::cell::RefMut<'_, DisposalState>> {
        let state = self.state.borrow_mut();
        if state.torn_down {
            return Err(ThrelteError::ContextDestroyed(operation));
        }
        Ok(state)
    }

    /// Claims `object` for one more mounted component.
    pub fn object_mounted(&self, object: &DisposableObject) -> Result<()> {
        let mut state = self.live_state("object_mounted")?;
        let id = ObjectId::of(object);
        if !state.objects.contains_key(&id) {
            state.next_sequence += 1;
        }
        let sequence = state.next_sequence;
        let entry = state.objects.entry(id).or_insert_with(|| Tracked {
            object: Rc::clone(object),
            mounted: 0,
            sequence,
        });
        entry.mounted += 1;
        Ok(())
    }

    /// Drops one claim on `object`. At zero claims the object is disposed by
    /// the next flush unless it is mounted again first.
    pub fn object_unmounted(&self, object: &DisposableObject) -> Result<()> {
        let mut state = self.live_state("object_unmounted")?;
        let Some(entry) = state.objects.get_mut(&ObjectId::of(object)) else {
            log::warn!("Unmounted {} which is not tracked for disposal", object.label());
            return Ok(());
        };
        if entry.mounted == 0 {
            log::warn!("Unmounted {} more often than it was mounted", object.label());
            return Ok(());
        }
        entry.mounted -= 1;
        if entry.mounted == 0 {
            state.should_dispose = true;
        }
        Ok(())
    }

    /// Stops tracking `object` without disposing it.
    pub fn remove_from_disposal(&self, object: &DisposableObject) -> Result<bool> {
        let mut state = self.live_state("remove_from_disposal")?;
        Ok(state.objects.remove(&ObjectId::of(object)).is_some())
    }

    /// Current claim count of `object`, `None` if it is not tracked.
    #[must_use]
    pub fn mount_count(&self, object: &DisposableObject) -> Option<usize> {
        self.state
            .borrow()
            .objects
            .get(&ObjectId::of(object))
            .map(|entry| entry.mounted)
    }

    #[must_use]
    pub fn is_tracked(&self, object: &DisposableObject) -> bool {
        self.mount_count(object).is_some()
    }

    /// Number of tracked objects, including ones pending disposal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an unmount left an object at zero claims since the last flush.
    #[must_use]
    pub fn needs_flush(&self) -> bool {
        self.state.borrow().should_dispose
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.state.borrow().torn_down
    }

    /// Disposes every object with zero claims and stops tracking it.
    ///
    /// Without `force` this is a no-op unless an unmount reached zero since
    /// the last flush. A failing `dispose()` is reported and the flush goes on.
    /// Returns the number of objects released.
    pub fn flush(&self, force: bool) -> usize {
        let mut pending: Vec<(u64, ObjectId)> = {
            let mut state = self.state.borrow_mut();
            if state.torn_down || !(force || state.should_dispose) {
                return 0;
            }
            state.should_dispose = false;
            state
                .objects
                .iter()
                .filter(|(_, entry)| entry.mounted == 0)
                .map(|(id, entry)| (entry.sequence, *id))
                .collect()
        };
        pending.sort_unstable_by_key(|(sequence, _)| *sequence);

        let handler = self.error_handler();
        let mut disposed = 0;
        for (_, id) in pending {
            // An earlier `dispose()` in this batch may have re-claimed the object.
            let released = {
                let mut state = self.state.borrow_mut();
                let reclaimed = state.objects.get(&id).is_none_or(|entry| entry.mounted > 0);
                if reclaimed {
                    None
                } else {
                    state.objects.remove(&id)
                }
            };
            let Some(entry) = released else {
                continue;
            };
            if Self::dispose_entry(&entry, handler.as_ref()) {
                disposed += 1;
            }
        }
        disposed
    }

    /// Disposes every tracked object regardless of its count and refuses
    /// further registrations.
    pub fn teardown(&self) -> usize {
        let mut released: Vec<Tracked> = {
            let mut state = self.state.borrow_mut();
            if state.torn_down {
                return 0;
            }
            state.torn_down = true;
            state.should_dispose = false;
            state.objects.drain().map(|(_, entry)| entry).collect()
        };
        released.sort_by_key(|entry| entry.sequence);

        let handler = self.error_handler();
        let count = released
            .iter()
            .filter(|entry| Self::dispose_entry(entry, handler.as_ref()))
            .count();
        log::debug!("Disposal context torn down, released {count} objects");
        count
    }

    fn error_handler(&self) -> Option<ErrorHandler> {
        self.state.borrow().error_handler.clone()
    }

    /// Runs `dispose()` with no borrow held. Returns whether it succeeded.
    fn dispose_entry(entry: &Tracked, handler: Option<&ErrorHandler>) -> bool {
        match entry.object.dispose() {
            Ok(()) => true,
            Err(source) => {
                let error = ThrelteError::Dispose {
                    object: entry.object.label().into_owned(),
                    source,
                };
                log::error!("{error}");
                if let Some(handler) = handler {
                    handler(&error);
                }
                false
            }
        }
    }
}

// ============================================================================
// Dispose scopes
// ============================================================================

/// Per-component disposal ownership.
///
/// A scope tracks the component's current resource and whether the component
/// owns its disposal. The effective flag is the local setting if there is one,
/// else the parent scope's effective flag, else `true`; turning it off for a
/// parent turns it off for every child that does not override it.
///
/// Changes to a parent's flag reach existing children when they call
/// [`DisposeScope::sync`].
pub struct DisposeScope {
    disposal: DisposalContext,
    parent: Option<Rc<Cell<bool>>>,
    local: Option<bool>,
    effective: Rc<Cell<bool>>,
    current: Option<DisposableObject>,
}

impl fmt::Debug for DisposeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposeScope")
            .field("local", &self.local)
            .field("effective", &self.effective.get())
            .field("current", &self.current.as_ref().map(|o| o.label().into_owned()))
            .finish_non_exhaustive()
    }
}

impl DisposeScope {
    /// Creates a root scope.
    #[must_use]
    pub fn new(disposal: &DisposalContext, dispose: Option<bool>) -> Self {
        Self::with_parent(disposal, None, dispose)
    }

    /// Creates a scope inheriting from `parent`.
    #[must_use]
    pub fn child(&self, dispose: Option<bool>) -> Self {
        Self::with_parent(&self.disposal, Some(Rc::clone(&self.effective)), dispose)
    }

    fn with_parent(disposal: &DisposalContext, parent: Option<Rc<Cell<bool>>>, local: Option<bool>) -> Self {
        let effective = local.or_else(|| parent.as_ref().map(|p| p.get())).unwrap_or(true);
        Self {
            disposal: disposal.clone(),
            parent,
            local,
            effective: Rc::new(Cell::new(effective)),
            current: None,
        }
    }

    /// Whether this scope currently owns disposal of its resource.
    #[must_use]
    pub fn disposes(&self) -> bool {
        self.effective.get()
    }

    #[must_use]
    pub fn current(&self) -> Option<&DisposableObject> {
        self.current.as_ref()
    }

    /// Replaces the scope's resource. When disposing, the previous resource
    /// loses a claim and the new one gains one.
    pub fn set_object(&mut self, object: Option<DisposableObject>) -> Result<()> {
        let same = match (&self.current, &object) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        if self.disposes() {
            if let Some(previous) = &self.current {
                self.disposal.object_unmounted(previous)?;
            }
            if let Some(next) = &object {
                self.disposal.object_mounted(next)?;
            }
        }
        self.current = object;
        Ok(())
    }

    /// Sets the local dispose override and applies the resulting change.
    pub fn set_dispose(&mut self, dispose: Option<bool>) -> Result<()> {
        self.local = dispose;
        self.sync()
    }

    /// Re-evaluates the effective flag against the parent.
    ///
    /// Turning disposal off removes the resource from disposal tracking;
    /// turning it on registers the resource again.
    pub fn sync(&mut self) -> Result<()> {
        let next = self
            .local
            .or_else(|| self.parent.as_ref().map(|p| p.get()))
            .unwrap_or(true);
        if next == self.effective.replace(next) {
            return Ok(());
        }
        if let Some(object) = &self.current {
            if next {
                self.disposal.object_mounted(object)?;
            } else {
                self.disposal.remove_from_disposal(object)?;
            }
        }
        Ok(())
    }
}

impl Drop for DisposeScope {
    fn drop(&mut self) {
        if !self.disposes() {
            return;
        }
        if let Some(object) = self.current.take()
            && let Err(e) = self.disposal.object_unmounted(&object)
        {
            log::debug!("Skipped unmount on scope drop: {e}");
        }
    }
}
