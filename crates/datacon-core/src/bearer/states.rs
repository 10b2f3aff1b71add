//! Connection lifecycle states
//!
//! Five concrete states under one implicit Default parent. An event a state
//! handler does not consume falls through to the parent handler, which is
//! how common behavior (reset, deferral, notification refresh) is inherited.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle state of one bearer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No call. The initial state and the terminal state of every teardown.
    Inactive,
    /// A setup-data-call request is in flight.
    Activating,
    /// The call is up and a network agent is exposed.
    Active,
    /// A deactivate request is in flight after a normal disconnect.
    Disconnecting,
    /// A deactivate request is in flight because the setup response was
    /// unusable.
    DisconnectingErrorCreatingConnection,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Inactive => "Inactive",
            ConnectionState::Activating => "Activating",
            ConnectionState::Active => "Active",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::DisconnectingErrorCreatingConnection => {
                "DisconnectingErrorCreatingConnection"
            }
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
