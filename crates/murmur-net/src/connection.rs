//! Observable connection lifecycle.
//!
//! State changes are broadcast via a [`watch`] channel so any number of
//! consumers can react without polling.

use tokio::sync::watch;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport opening or join sent, waiting for `welcome`.
    Connecting,
    /// Handshake complete, commands may be sent.
    Connected,
    /// No live session.
    Disconnected,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// `Connecting -> Disconnected` covers a handshake timeout or early close.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Move to `next` if the lifecycle allows it, notifying subscribers.
    ///
    /// Returns `false` and leaves the state untouched otherwise.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::trace!(?current, ?next, "ignoring illegal connection state transition");
            return false;
        }
        tracing::debug!(from = ?current, to = ?next, "connection state changed");
        let _ = self.tx.send(next);
        true
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Shorthand for `current() == Connected`.
    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }
}
