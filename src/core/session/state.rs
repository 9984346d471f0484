//! Connection lifecycle of a single streaming session.

use serde::Serialize;

/// Lifecycle state of one websocket exchange.
///
/// States only move forward. `Failed` is reachable from every non-terminal
/// state and `Closing` may be entered early from any state that owns an open
/// socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unconnected,
    Handshaking,
    Open,
    Streaming,
    AwaitingFinalResult,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    fn ordinal(self) -> u8 {
        match self {
            Self::Unconnected => 0,
            Self::Handshaking => 1,
            Self::Open => 2,
            Self::Streaming => 3,
            Self::AwaitingFinalResult => 4,
            Self::Closing => 5,
            Self::Closed => 6,
            Self::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// True while a websocket is held by the session.
    pub fn has_socket(self) -> bool {
        matches!(
            self,
            Self::Open | Self::Streaming | Self::AwaitingFinalResult | Self::Closing
        )
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Closing => self.has_socket() && self != Self::Closing,
            _ => next.ordinal() == self.ordinal() + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::AwaitingFinalResult => "awaiting_final_result",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: ConnectionState,
    history: Vec<ConnectionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: ConnectionState::Unconnected,
            history: vec![ConnectionState::Unconnected],
        }
    }
}

impl StateTracker {
    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    /// Moves to `next`, returning the rejected pair on an illegal transition.
    pub fn advance(
        &mut self,
        next: ConnectionState,
    ) -> Result<(), (ConnectionState, ConnectionState)> {
        if !self.current.can_transition_to(next) {
            return Err((self.current, next));
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    pub fn into_history(self) -> Vec<ConnectionState> {
        self.history
    }
}
