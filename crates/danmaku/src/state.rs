//! Connection lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Draining -> Connecting -> ...
//!                      \             |          |
//!                       `-> Draining  `--------- `--> Stopped
//! ```
//!
//! `Stopped` is terminal and reachable from every other state.

use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Stopped,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Draining)
                | (Connected, Draining)
                | (Draining, Connecting)
                | (Disconnected | Connecting | Connected | Draining, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Stopped
    }
}

/// Owner side of the observable state.
#[derive(Debug)]
pub(crate) struct StateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply a transition if it is allowed. Returns whether it happened.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!(from = %state, to = %next, "Connection state transition");
                *state = next;
                applied = true;
                true
            } else {
                false
            }
        });
        if !applied && self.current() != next {
            warn!(from = %self.current(), to = %next, "Rejected connection state transition");
        }
        applied
    }
}
