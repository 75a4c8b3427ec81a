//! Tick sources and the animation loop.
//!
//! A [`TickSource`] yields frame timestamps, in milliseconds. The
//! [`AnimationLoop`] polls whichever source currently occupies its
//! [`TickSlot`] and advances a context once per new timestamp. The slot can be
//! taken over at runtime, e.g. by an immersive session's frame callback, and
//! handed back afterwards:
//!
//! ```rust,ignore
//! let mut animation = AnimationLoop::new(ClockTickSource::new());
//! let (xr_frames, feed) = QueuedTickSource::new();
//!
//! let swap = animation.slot().swap(xr_frames);
//! feed.push(16.0);
//! animation.pump(&mut ctx);   // runs the frame at 16.0
//! swap.restore();             // the clock drives the loop again
//! ```
//!
//! All sources installed into one slot must share a time base: the loop
//! ignores timestamps that are not later than the last one it executed, so
//! a frame is never run twice for the same timestamp.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::context::ThrelteContext;
use crate::renderer::Renderer;
use crate::utils::time::Timer;

/// Producer of frame timestamps.
pub trait TickSource {
    /// The timestamp of the next frame, or `None` if no frame is due.
    fn poll_frame(&mut self) -> Option<f64>;
}

impl<F> TickSource for F
where
    F: FnMut() -> Option<f64>,
{
    fn poll_frame(&mut self) -> Option<f64> {
        self()
    }
}

/// Continuous source: every poll is a frame, stamped with the wall clock.
#[derive(Debug, Default)]
pub struct ClockTickSource {
    timer: Timer,
}

impl ClockTickSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickSource for ClockTickSource {
    fn poll_frame(&mut self) -> Option<f64> {
        Some(self.timer.elapsed_ms())
    }
}

/// Source fed by the host, one timestamp per frame callback.
#[derive(Debug)]
pub struct QueuedTickSource {
    queue: Rc<RefCell<VecDeque<f64>>>,
}

/// Pushing half of a [`QueuedTickSource`].
#[derive(Debug, Clone)]
pub struct FrameFeed {
    queue: Rc<RefCell<VecDeque<f64>>>,
}

impl QueuedTickSource {
    #[must_use]
    pub fn new() -> (Self, FrameFeed) {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        (
            Self {
                queue: Rc::clone(&queue),
            },
            FrameFeed { queue },
        )
    }
}

impl TickSource for QueuedTickSource {
    fn poll_frame(&mut self) -> Option<f64> {
        self.queue.borrow_mut().pop_front()
    }
}

impl FrameFeed {
    pub fn push(&self, timestamp: f64) {
        self.queue.borrow_mut().push_back(timestamp);
    }

    /// Frames pushed but not polled yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

// ============================================================================
// Slot
// ============================================================================

type BoxedSource = Box<dyn TickSource>;

struct SlotState {
    /// Source installed with [`TickSlot::new`] or replaced in with no swap live.
    base: BoxedSource,
    /// Live swaps, oldest first. The last one is active.
    swaps: Vec<(u64, BoxedSource)>,
    next_swap: u64,
    /// Bumped whenever the active source changes.
    generation: u64,
}

impl SlotState {
    fn active_mut(&mut self) -> &mut BoxedSource {
        match self.swaps.last_mut() {
            Some((_, source)) => source,
            None => &mut self.base,
        }
    }
}

/// Single shared slot holding the active tick source. Clones share the slot.
#[derive(Clone)]
pub struct TickSlot {
    state: Rc<RefCell<SlotState>>,
}

impl fmt::Debug for TickSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TickSlot")
            .field("generation", &state.generation)
            .field("swaps", &state.swaps.len())
            .finish_non_exhaustive()
    }
}

impl TickSlot {
    pub fn new(source: impl TickSource + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(SlotState {
                base: Box::new(source),
                swaps: Vec::new(),
                next_swap: 0,
                generation: 0,
            })),
        }
    }

    /// Installs `source` in place of the active one and returns it. Last
    /// writer wins.
    pub fn replace(&self, source: impl TickSource + 'static) -> BoxedSource {
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        log::debug!("Tick source replaced (generation {})", state.generation);
        std::mem::replace(state.active_mut(), Box::new(source))
    }

    /// Installs `source` until the returned guard is restored or dropped.
    ///
    /// Guards may be restored in any order: each removes only its own source,
    /// and the original comes back once every guard is gone.
    #[must_use = "dropping the TickSwap removes its source immediately"]
    pub fn swap(&self, source: impl TickSource + 'static) -> TickSwap {
        let mut state = self.state.borrow_mut();
        let id = state.next_swap;
        state.next_swap += 1;
        state.swaps.push((id, Box::new(source)));
        state.generation += 1;
        log::debug!("Tick source swapped in (generation {})", state.generation);
        TickSwap {
            slot: self.clone(),
            id,
            restored: false,
        }
    }

    /// Polls the active source.
    pub fn poll(&self) -> Option<f64> {
        match self.state.try_borrow_mut() {
            Ok(mut state) => state.active_mut().poll_frame(),
            Err(_) => {
                log::warn!("Tick source polled re-entrantly");
                None
            }
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    fn remove_swap(&self, id: u64) -> Option<BoxedSource> {
        let mut state = self.state.borrow_mut();
        let index = state.swaps.iter().position(|(swap, _)| *swap == id)?;
        let was_active = index + 1 == state.swaps.len();
        let (_, source) = state.swaps.remove(index);
        if was_active {
            state.generation += 1;
            log::debug!("Tick source restored (generation {})", state.generation);
        }
        Some(source)
    }
}

/// Temporary takeover of a [`TickSlot`]; its source leaves the slot on
/// [`restore`](Self::restore) or drop.
pub struct TickSwap {
    slot: TickSlot,
    id: u64,
    restored: bool,
}

impl fmt::Debug for TickSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSwap")
            .field("slot", &self.slot)
            .field("restored", &self.restored)
            .finish()
    }
}

impl TickSwap {
    pub fn restore(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.restored, true) {
            return;
        }
        // Dropped outside the slot borrow.
        drop(self.slot.remove_swap(self.id));
    }
}

impl Drop for TickSwap {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Animation loop
// ============================================================================

/// Drives a context from the source in its slot.
#[derive(Debug)]
pub struct AnimationLoop {
    slot: TickSlot,
    last_timestamp: Option<f64>,
    frames: u64,
}

impl AnimationLoop {
    pub fn new(source: impl TickSource + 'static) -> Self {
        Self::with_slot(TickSlot::new(source))
    }

    #[must_use]
    pub fn with_slot(slot: TickSlot) -> Self {
        Self {
            slot,
            last_timestamp: None,
            frames: 0,
        }
    }

    #[must_use]
    pub fn slot(&self) -> &TickSlot {
        &self.slot
    }

    /// Timestamp of the last executed frame.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Number of executed frames.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Polls the active source once and advances `ctx` if it yielded a new
    /// timestamp. Returns whether a frame ran.
    pub fn pump<R: Renderer + 'static>(&mut self, ctx: &mut ThrelteContext<R>) -> bool {
        self.poll_and_run(ctx) == Some(true)
    }

    /// Pumps until the active source has no frame due, at most `limit` polls.
    /// Returns the number of frames that ran.
    pub fn pump_pending<R: Renderer + 'static>(&mut self, ctx: &mut ThrelteContext<R>, limit: usize) -> usize {
        let mut executed = 0;
        for _ in 0..limit {
            match self.poll_and_run(ctx) {
                Some(true) => executed += 1,
                Some(false) => {}
                None => break,
            }
        }
        executed
    }

    /// `None` when no frame was due, else whether the frame ran.
    fn poll_and_run<R: Renderer + 'static>(&mut self, ctx: &mut ThrelteContext<R>) -> Option<bool> {
        let timestamp = self.slot.poll()?;
        if let Some(last) = self.last_timestamp
            && timestamp <= last
        {
            log::trace!("Dropped stale frame {timestamp} (last {last})");
            return Some(false);
        }
        self.last_timestamp = Some(timestamp);
        self.frames += 1;
        ctx.advance_frame(timestamp);
        Some(true)
    }
}
