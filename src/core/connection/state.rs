//! Connection state machine
//!
//! Tracks the manager's lifecycle and rejects transitions that would break
//! the handle/state pairing (a port handle is live only while `Connecting`
//! or `Connected`).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

const MAX_HISTORY: usize = 50;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No port handle
    #[default]
    Disconnected,
    /// Opening a port
    Connecting,
    /// Port open and read loop running
    Connected,
    /// Auto-connect detection cycle in progress
    Reconnecting,
}

impl ConnectionState {
    /// Check if a port is open and being read
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the state is transient
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Rejected transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// State before the attempt
    pub from: ConnectionState,
    /// Requested state
    pub to: ConnectionState,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ConnectionState,
    /// New state
    pub to: ConnectionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Connection state machine with bounded transition history
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    history: VecDeque<StateTransition>,
}

impl ConnectionStateMachine {
    /// Start in `Disconnected`
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.iter().cloned().collect()
    }

    /// Transition to a new state
    ///
    /// Re-entering the current state is accepted and not recorded.
    pub fn transition(&mut self, to: ConnectionState, reason: Option<&str>) -> Result<(), InvalidTransition> {
        let from = self.state;
        if from == to {
            return Ok(());
        }
        if !Self::is_valid_transition(from, to) {
            return Err(InvalidTransition { from, to });
        }

        self.history.push_back(StateTransition {
            from,
            to,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        self.state = to;
        tracing::debug!(%from, %to, reason, "Connection state changed");
        Ok(())
    }

    fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_manual_lifecycle() {
        let mut sm = ConnectionStateMachine::new();
        sm.transition(Connecting, Some("manual")).unwrap();
        sm.transition(Connected, None).unwrap();
        sm.transition(Disconnected, Some("user")).unwrap();

        let history = sm.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from, Disconnected);
        assert_eq!(history[0].reason.as_deref(), Some("manual"));
        assert_eq!(history[2].to, Disconnected);
    }

    #[test]
    fn test_rejects_skipping_connecting() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(
            sm.transition(Connected, None),
            Err(InvalidTransition {
                from: Disconnected,
                to: Connected
            })
        );
        assert_eq!(sm.state(), Disconnected);

        sm.transition(Reconnecting, None).unwrap();
        assert!(sm.transition(Connected, None).is_err());
        sm.transition(Connecting, None).unwrap();
        assert!(sm.transition(Reconnecting, None).is_err());
    }

    #[test]
    fn test_same_state_is_not_recorded() {
        let mut sm = ConnectionStateMachine::new();
        sm.transition(Disconnected, None).unwrap();
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut sm = ConnectionStateMachine::new();
        for _ in 0..40 {
            sm.transition(Reconnecting, None).unwrap();
            sm.transition(Disconnected, None).unwrap();
        }
        assert_eq!(sm.history().len(), MAX_HISTORY);
        assert!(!Connected.is_transitional());
        assert!(Reconnecting.is_transitional());
    }
}
