//! Call phase state machine.
//!
//! Each session owns exactly one state. Transitions are checked against the
//! legal-transition table; illegal attempts are logged and rejected without
//! being fatal. Listeners fire synchronously and must not block.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Bounded transition history; oldest entries are dropped past this.
const HISTORY_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Interrupted,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "IDLE",
            CallState::Listening => "LISTENING",
            CallState::Thinking => "THINKING",
            CallState::Speaking => "SPEAKING",
            CallState::Interrupted => "INTERRUPTED",
        };
        write!(f, "{name}")
    }
}

/// A successful transition, recorded in order.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: CallState,
    pub to: CallState,
    pub reason: String,
    pub at: Instant,
}

/// Rejected transition. Internal and non-fatal; callers log and move on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: CallState,
    pub to: CallState,
}

pub type StateListener = Arc<dyn Fn(&Transition) + Send + Sync>;

struct Inner {
    current: CallState,
    history: Vec<Transition>,
    listeners: Vec<StateListener>,
}

pub struct CallStateMachine {
    inner: Mutex<Inner>,
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: CallState::Idle,
                history: Vec::new(),
                listeners: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> CallState {
        self.inner.lock().current
    }

    /// Attempt a transition. Returns true when it was legal and applied.
    pub fn attempt(&self, to: CallState, reason: &str) -> bool {
        match self.try_transition(to, reason) {
            Ok(()) => true,
            Err(e) => {
                warn!("rejected state change ({}): {}", reason, e);
                false
            }
        }
    }

    fn try_transition(&self, to: CallState, reason: &str) -> Result<(), IllegalTransition> {
        let mut inner = self.inner.lock();
        let from = inner.current;
        if !is_legal(from, to) {
            return Err(IllegalTransition { from, to });
        }

        let transition = Transition {
            from,
            to,
            reason: reason.to_string(),
            at: Instant::now(),
        };
        inner.current = to;
        if inner.history.len() >= HISTORY_CAP {
            inner.history.remove(0);
        }
        inner.history.push(transition.clone());
        let listeners = inner.listeners.clone();
        drop(inner);

        debug!("state {} -> {} ({})", from, to, reason);
        for listener in &listeners {
            listener(&transition);
        }
        Ok(())
    }

    /// Register a synchronous, non-blocking listener.
    pub fn subscribe(&self, listener: StateListener) {
        self.inner.lock().listeners.push(listener);
    }

    pub fn history(&self) -> Vec<Transition> {
        self.inner.lock().history.clone()
    }
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// The legal-transition table. Teardown to Idle is allowed from anywhere.
fn is_legal(from: CallState, to: CallState) -> bool {
    use CallState::*;
    matches!(
        (from, to),
        (_, Idle)
            | (Idle, Listening)
            | (Listening, Thinking)
            | (Thinking, Speaking)
            | (Thinking, Listening)
            | (Speaking, Listening)
            | (Speaking, Interrupted)
            | (Interrupted, Listening)
    )
}
