//! Pure connection state machine
//!
//! Every binding drives the same three-state lifecycle. The functions here
//! decide transitions without touching any I/O so they can be tested in
//! isolation from transports.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle state of a realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// `connect()` was called and the transport has not opened yet
    Connecting,
    /// Transport is open; sends and subscriptions are accepted
    Connected,
    /// No live transport
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Inputs that can move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    ConnectRequested,
    Opened,
    ConnectFailed,
    Closed,
    DisconnectRequested,
}

/// Determine the next state for a signal (pure function)
///
/// Signals that are not valid in the current state leave it unchanged.
pub fn next_state(current: ConnectionState, signal: Signal) -> ConnectionState {
    use ConnectionState::*;
    match (current, signal) {
        (Disconnected, Signal::ConnectRequested) => Connecting,
        (Connecting, Signal::Opened) => Connected,
        (Connecting, Signal::ConnectFailed) => Disconnected,
        (Connecting | Connected, Signal::Closed) => Disconnected,
        (_, Signal::DisconnectRequested) => Disconnected,
        (state, _) => state,
    }
}

/// Signal for a transport failure observed in `state`
///
/// A failure before open is a failed connect; after open it ends the
/// connection like a close.
pub fn failure_signal(state: ConnectionState) -> Signal {
    match state {
        ConnectionState::Connecting => Signal::ConnectFailed,
        _ => Signal::Closed,
    }
}

/// Check if a state accepts outbound messages (pure function)
pub fn can_send(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Check if a state accepts a new `connect()` (pure function)
pub fn can_connect(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Disconnected)
}

/// How a close notification from the transport should be journaled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Caller asked for the close: `DISCONNECTED{manual: true}`
    Manual,
    /// Open connection dropped: `ERROR{CONNECTION_LOST}`
    Lost,
    /// Connection never opened: `ERROR{CONNECTION_FAILED}`
    Failed,
    /// Already disconnected; trailing close after a failure
    Ignored,
}

/// Decide the journal outcome for a close notification (pure function)
pub fn close_outcome(state: ConnectionState, manual: bool) -> CloseOutcome {
    if manual {
        return CloseOutcome::Manual;
    }
    match state {
        ConnectionState::Connected => CloseOutcome::Lost,
        ConnectionState::Connecting => CloseOutcome::Failed,
        ConnectionState::Disconnected => CloseOutcome::Ignored,
    }
}

/// Log a state transition (pure logging function)
pub fn log_transition(protocol: &str, from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!(protocol, "Connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!(protocol, "Connection closed");
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            warn!(protocol, "Connection attempt ended before open");
        }
        _ => {
            debug!(protocol, %from, %to, "State transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = next_state(ConnectionState::Disconnected, Signal::ConnectRequested);
        assert_eq!(state, ConnectionState::Connecting);

        let state = next_state(state, Signal::Opened);
        assert_eq!(state, ConnectionState::Connected);

        let state = next_state(state, Signal::Closed);
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_failure_returns_to_disconnected() {
        assert_eq!(
            next_state(ConnectionState::Connecting, Signal::ConnectFailed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_invalid_signals_leave_state_unchanged() {
        assert_eq!(
            next_state(ConnectionState::Connected, Signal::ConnectRequested),
            ConnectionState::Connected
        );
        assert_eq!(
            next_state(ConnectionState::Disconnected, Signal::Opened),
            ConnectionState::Disconnected
        );
        assert_eq!(
            next_state(ConnectionState::Connected, Signal::ConnectFailed),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_failure_signal_ends_any_live_state() {
        for state in [ConnectionState::Connecting, ConnectionState::Connected] {
            assert_eq!(
                next_state(state, failure_signal(state)),
                ConnectionState::Disconnected
            );
        }
        assert_eq!(
            failure_signal(ConnectionState::Connecting),
            Signal::ConnectFailed
        );
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(
                next_state(state, Signal::DisconnectRequested),
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn test_can_send_only_when_connected() {
        assert!(can_send(ConnectionState::Connected));
        assert!(!can_send(ConnectionState::Connecting));
        assert!(!can_send(ConnectionState::Disconnected));
    }

    #[test]
    fn test_can_connect_only_when_disconnected() {
        assert!(can_connect(ConnectionState::Disconnected));
        assert!(!can_connect(ConnectionState::Connecting));
        assert!(!can_connect(ConnectionState::Connected));
    }

    #[test]
    fn test_close_outcome() {
        assert_eq!(
            close_outcome(ConnectionState::Connected, true),
            CloseOutcome::Manual
        );
        assert_eq!(
            close_outcome(ConnectionState::Disconnected, true),
            CloseOutcome::Manual
        );
        assert_eq!(
            close_outcome(ConnectionState::Connected, false),
            CloseOutcome::Lost
        );
        assert_eq!(
            close_outcome(ConnectionState::Connecting, false),
            CloseOutcome::Failed
        );
        assert_eq!(
            close_outcome(ConnectionState::Disconnected, false),
            CloseOutcome::Ignored
        );
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"CONNECTING\"");
        assert_eq!(ConnectionState::Disconnected.to_string(), "DISCONNECTED");
    }

    fn any_state() -> impl Strategy<Value = ConnectionState> {
        prop_oneof![
            Just(ConnectionState::Connecting),
            Just(ConnectionState::Connected),
            Just(ConnectionState::Disconnected),
        ]
    }

    fn any_signal() -> impl Strategy<Value = Signal> {
        prop_oneof![
            Just(Signal::ConnectRequested),
            Just(Signal::Opened),
            Just(Signal::ConnectFailed),
            Just(Signal::Closed),
            Just(Signal::DisconnectRequested),
        ]
    }

    proptest! {
        #[test]
        fn connected_is_only_reachable_from_connecting(
            state in any_state(),
            signal in any_signal(),
        ) {
            let next = next_state(state, signal);
            if next == ConnectionState::Connected && state != ConnectionState::Connected {
                prop_assert_eq!(state, ConnectionState::Connecting);
                prop_assert_eq!(signal, Signal::Opened);
            }
        }

        #[test]
        fn disconnect_request_always_disconnects(state in any_state()) {
            prop_assert_eq!(
                next_state(state, Signal::DisconnectRequested),
                ConnectionState::Disconnected
            );
        }
    }
}
