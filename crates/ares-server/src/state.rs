//! Server state machine.
//!
//! ```text
//!   Idle ──▶ Starting ──▶ Running ──▶ Draining ──▶ Stopped
//!     │          │           │                        ▲
//!     └──────────┴───────────┴────── stop ────────────┘
//! ```
//!
//! The current state lives in a `watch` channel so that readers never block
//! and supervisors can await a transition.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Constructed, not yet serving.
    Idle,
    /// Binding the listener and running hooks.
    Starting,
    /// Accepting connections.
    Running,
    /// Listener closed, waiting for in-flight connections.
    Draining,
    /// Fully stopped.
    Stopped,
}

impl ServerState {
    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable [`ServerState`].
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ServerState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Creates a cell in [`ServerState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Idle);
        Self { tx }
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Unconditionally moves to `next`.
    pub fn set(&self, next: ServerState) {
        self.tx.send_replace(next);
    }

    /// Moves to `next` only if the current state is one of `from`.
    ///
    /// Returns the state observed before the attempt.
    pub fn transition(&self, from: &[ServerState], next: ServerState) -> Result<ServerState, ServerState> {
        let mut observed = ServerState::Idle;
        let moved = self.tx.send_if_modified(|state| {
            observed = *state;
            if from.contains(state) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(observed)
        } else {
            Err(observed)
        }
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    /// Resolves once the state equals `target`.
    pub async fn wait_for(&self, target: ServerState) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transition_guards() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ServerState::Idle);

        assert_eq!(
            cell.transition(&[ServerState::Idle], ServerState::Starting),
            Ok(ServerState::Idle)
        );
        assert_eq!(
            cell.transition(&[ServerState::Idle], ServerState::Starting),
            Err(ServerState::Starting)
        );
        assert_eq!(cell.get(), ServerState::Starting);
    }

    #[tokio::test]
    async fn test_wait_for_observes_change() {
        let cell = Arc::new(StateCell::new());
        let waiter = tokio::spawn({
            let cell = Arc::clone(&cell);
            async move { cell.wait_for(ServerState::Stopped).await }
        });

        cell.set(ServerState::Running);
        cell.set(ServerState::Stopped);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_current_state_is_immediate() {
        let cell = StateCell::new();
        cell.set(ServerState::Stopped);
        cell.wait_for(ServerState::Stopped).await;
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerState::Draining.to_string(), "draining");
    }
}
