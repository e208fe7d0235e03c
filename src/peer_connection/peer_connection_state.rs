use std::fmt;

use serde::{Deserialize, Serialize};

/// RTCPeerConnectionState is the aggregate transport state of a connection
/// as reported by the media engine.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCPeerConnection/connectionState
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-peerconnection-connection-state
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCPeerConnectionState {
    #[default]
    Unspecified,

    /// New is the initial state; no transport has started connecting yet.
    #[serde(rename = "new")]
    New,

    /// Connecting means at least one transport is checking or handshaking.
    #[serde(rename = "connecting")]
    Connecting,

    /// Connected means every live transport is usable.
    #[serde(rename = "connected")]
    Connected,

    /// Disconnected may recover back to connected without renegotiation.
    #[serde(rename = "disconnected")]
    Disconnected,

    /// Failed requires an ICE restart; nothing reconnects automatically.
    #[serde(rename = "failed")]
    Failed,

    /// Closed is terminal and entered only through `close()`.
    #[serde(rename = "closed")]
    Closed,
}

const PEER_CONNECTION_STATE_NEW_STR: &str = "new";
const PEER_CONNECTION_STATE_CONNECTING_STR: &str = "connecting";
const PEER_CONNECTION_STATE_CONNECTED_STR: &str = "connected";
const PEER_CONNECTION_STATE_DISCONNECTED_STR: &str = "disconnected";
const PEER_CONNECTION_STATE_FAILED_STR: &str = "failed";
const PEER_CONNECTION_STATE_CLOSED_STR: &str = "closed";

impl From<&str> for RTCPeerConnectionState {
    fn from(raw: &str) -> Self {
        match raw {
            PEER_CONNECTION_STATE_NEW_STR => RTCPeerConnectionState::New,
            PEER_CONNECTION_STATE_CONNECTING_STR => RTCPeerConnectionState::Connecting,
            PEER_CONNECTION_STATE_CONNECTED_STR => RTCPeerConnectionState::Connected,
            PEER_CONNECTION_STATE_DISCONNECTED_STR => RTCPeerConnectionState::Disconnected,
            PEER_CONNECTION_STATE_FAILED_STR => RTCPeerConnectionState::Failed,
            PEER_CONNECTION_STATE_CLOSED_STR => RTCPeerConnectionState::Closed,
            _ => RTCPeerConnectionState::Unspecified,
        }
    }
}

impl From<u8> for RTCPeerConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCPeerConnectionState::New,
            2 => RTCPeerConnectionState::Connecting,
            3 => RTCPeerConnectionState::Connected,
            4 => RTCPeerConnectionState::Disconnected,
            5 => RTCPeerConnectionState::Failed,
            6 => RTCPeerConnectionState::Closed,
            _ => RTCPeerConnectionState::Unspecified,
        }
    }
}

impl fmt::Display for RTCPeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCPeerConnectionState::New => PEER_CONNECTION_STATE_NEW_STR,
            RTCPeerConnectionState::Connecting => PEER_CONNECTION_STATE_CONNECTING_STR,
            RTCPeerConnectionState::Connected => PEER_CONNECTION_STATE_CONNECTED_STR,
            RTCPeerConnectionState::Disconnected => PEER_CONNECTION_STATE_DISCONNECTED_STR,
            RTCPeerConnectionState::Failed => PEER_CONNECTION_STATE_FAILED_STR,
            RTCPeerConnectionState::Closed => PEER_CONNECTION_STATE_CLOSED_STR,
            RTCPeerConnectionState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// Coalesces negotiation-needed notifications while one is already being
/// delivered.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum NegotiationNeededState {
    /// nothing running, nothing queued
    #[default]
    Empty,
    /// a notification is being delivered
    Run,
    /// a notification is being delivered and another one is pending
    Queue,
}

impl From<u8> for NegotiationNeededState {
    fn from(v: u8) -> Self {
        match v {
            1 => NegotiationNeededState::Run,
            2 => NegotiationNeededState::Queue,
            _ => NegotiationNeededState::Empty,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_peer_connection_state() {
        let tests = vec![
            (crate::UNSPECIFIED_STR, RTCPeerConnectionState::Unspecified),
            ("new", RTCPeerConnectionState::New),
            ("connecting", RTCPeerConnectionState::Connecting),
            ("connected", RTCPeerConnectionState::Connected),
            ("disconnected", RTCPeerConnectionState::Disconnected),
            ("failed", RTCPeerConnectionState::Failed),
            ("closed", RTCPeerConnectionState::Closed),
        ];

        for (state_string, expected_state) in tests {
            assert_eq!(
                RTCPeerConnectionState::from(state_string),
                expected_state,
                "testCase: {expected_state}",
            );
            assert_eq!(expected_state.to_string(), state_string);
            assert_eq!(
                RTCPeerConnectionState::from(expected_state as u8),
                expected_state
            );
        }
    }

    #[test]
    fn test_negotiation_needed_state_from_u8() {
        assert_eq!(NegotiationNeededState::from(0), NegotiationNeededState::Empty);
        assert_eq!(NegotiationNeededState::from(1), NegotiationNeededState::Run);
        assert_eq!(NegotiationNeededState::from(2), NegotiationNeededState::Queue);
        assert_eq!(NegotiationNeededState::from(7), NegotiationNeededState::Empty);
    }
}
