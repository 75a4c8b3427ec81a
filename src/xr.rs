//! Immersive session timing.
//!
//! While an XR session presents, the session's frame callback drives the
//! frame loop instead of the host's animation loop. [`XrTimingBinding`] owns
//! that handover: the session state exists only between
//! [`begin_session`](XrTimingBinding::begin_session) and
//! [`end_session`](XrTimingBinding::end_session), and the host source is back
//! in the slot once the session ends or the binding is dropped.

use serde::{Deserialize, Serialize};

use crate::store::Writable;
use crate::tick::{TickSlot, TickSource, TickSwap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSpace {
    Viewer,
    Local,
    #[default]
    LocalFloor,
    BoundedFloor,
    Unbounded,
}

/// State of one immersive session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrSessionState {
    pub session_id: u64,
    pub reference_space: ReferenceSpace,
    pub presenting: bool,
    pub hand_tracking: bool,
}

impl XrSessionState {
    #[must_use]
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            reference_space: ReferenceSpace::default(),
            presenting: true,
            hand_tracking: false,
        }
    }
}

struct ActiveSession {
    state: XrSessionState,
    swap: TickSwap,
}

/// Hands the tick slot to an immersive session and back.
pub struct XrTimingBinding {
    slot: TickSlot,
    presenting: Writable<bool>,
    session: Option<ActiveSession>,
}

impl std::fmt::Debug for XrTimingBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrTimingBinding")
            .field("slot", &self.slot)
            .field("session", &self.session.as_ref().map(|s| &s.state))
            .finish()
    }
}

impl XrTimingBinding {
    /// `presenting` mirrors whether a session is presenting; pass the
    /// context's [`xr_presenting`](crate::context::ThrelteContext::xr_presenting) slot.
    #[must_use]
    pub fn new(slot: TickSlot, presenting: Writable<bool>) -> Self {
        Self {
            slot,
            presenting,
            session: None,
        }
    }

    /// Starts driving frames from `source`. A session that is still active is
    /// ended first.
    pub fn begin_session(&mut self, state: XrSessionState, source: impl TickSource + 'static) {
        if let Some(previous) = &self.session {
            log::warn!(
                "XR session {} began while session {} was active",
                state.session_id,
                previous.state.session_id
            );
            self.end_session();
        }
        log::debug!("XR session {} took over frame timing", state.session_id);
        let swap = self.slot.swap(source);
        self.presenting.set(state.presenting);
        self.session = Some(ActiveSession { state, swap });
    }

    /// Hands frame timing back to the source that was active before the
    /// session began. Returns the ended session's state.
    pub fn end_session(&mut self) -> Option<XrSessionState> {
        let Some(ActiveSession { state, swap }) = self.session.take() else {
            log::warn!("Ended an XR session that was never started");
            return None;
        };
        swap.restore();
        self.presenting.set(false);
        log::debug!("XR session {} ended", state.session_id);
        Some(state)
    }

    #[must_use]
    pub fn session(&self) -> Option<&XrSessionState> {
        self.session.as_ref().map(|s| &s.state)
    }

    /// Updates the active session's presenting flag.
    pub fn set_presenting(&mut self, presenting: bool) {
        if let Some(session) = &mut self.session {
            session.state.presenting = presenting;
            self.presenting.set(presenting);
        }
    }

    #[must_use]
    pub fn is_presenting(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state.presenting)
    }
}

impl Drop for XrTimingBinding {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.end_session();
        }
    }
}
