//! Server lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Lifecycle state of the compiler server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Waiting for requests.
    Idle,
    /// Opening the build session.
    Starting,
    /// A pass is running.
    Building,
    /// Watching for file changes between passes.
    Watching,
    /// Finishing the current pass before exit.
    Stopping,
    /// Exited.
    Stopped,
}

impl ServerState {
    /// Returns `true` if `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Starting, Idle)
                | (Starting, Building)
                | (Idle, Building)
                | (Idle, Watching)
                | (Building, Idle)
                | (Building, Watching)
                | (Watching, Building)
                | (Idle | Starting | Building | Watching, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Building => "building",
            ServerState::Watching => "watching",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Tracks the current state and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ServerState,
    watching: bool,
}

impl StateMachine {
    /// A machine in [`ServerState::Idle`].
    pub fn new() -> Self {
        Self {
            state: ServerState::Idle,
            watching: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether watch mode has been enabled.
    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Moves to `to`. Moving to the current state is a no-op.
    pub fn transition(&mut self, to: ServerState) -> Result<(), ServerError> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(ServerError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %self.state, to = %to, "server state");
        if to == ServerState::Watching {
            self.watching = true;
        }
        self.state = to;
        Ok(())
    }

    /// The state to return to after a pass.
    pub fn resting_state(&self) -> ServerState {
        if self.watching {
            ServerState::Watching
        } else {
            ServerState::Idle
        }
    }

    /// Turns watch mode on without changing the current state.
    pub fn enable_watch(&mut self) {
        self.watching = true;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
