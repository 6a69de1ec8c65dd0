use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one realtime session.
///
/// `Idle → Connecting → Open → Closing → Closed`, with `Connecting → Idle`
/// when the connection attempt fails. `Closing` and `Closed` are terminal for
/// the session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Open,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Whether `self → next` is an edge of the session graph.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Idle)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free holder of a [`SessionState`].
///
/// The session handle and its transport task both observe the state; only
/// legal edges are ever applied.
#[derive(Debug, Clone)]
pub struct SessionStateCell {
    inner: Arc<AtomicU8>,
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
        }
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.get() == SessionState::Open
    }

    /// Apply `from → to` atomically. Returns `false` if the current state is
    /// not `from` or the edge is illegal.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Walk `Open → Closing → Closed`, or just `Closing → Closed` if a close
    /// is already under way. Returns `true` if this call performed the
    /// `Closing → Closed` step.
    pub fn close(&self) -> bool {
        self.transition(SessionState::Open, SessionState::Closing);
        self.transition(SessionState::Closing, SessionState::Closed)
    }
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}
