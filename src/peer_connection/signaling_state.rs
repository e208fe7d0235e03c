use std::fmt;

use crate::error::{Error, Result};
use crate::peer_connection::sdp::sdp_type::RTCSdpType;

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StateChangeOp {
    #[default]
    SetLocal,
    SetRemote,
}

impl fmt::Display for StateChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StateChangeOp::SetLocal => write!(f, "SetLocal"),
            StateChangeOp::SetRemote => write!(f, "SetRemote"),
        }
    }
}

/// SignalingState indicates the signaling state of the offer/answer process.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCPeerConnection/signalingState
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-peerconnection-signaling-state
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RTCSignalingState {
    #[default]
    Unspecified = 0,

    /// SignalingStateStable indicates there is no offer/answer exchange in
    /// progress. This is also the initial state, in which case the local and
    /// remote descriptions are nil.
    Stable,

    /// SignalingStateHaveLocalOffer indicates that a local description, of
    /// type "offer", has been successfully applied.
    HaveLocalOffer,

    /// SignalingStateHaveRemoteOffer indicates that a remote description, of
    /// type "offer", has been successfully applied.
    HaveRemoteOffer,

    /// SignalingStateHaveLocalPranswer indicates that a remote description
    /// of type "offer" has been successfully applied and a local description
    /// of type "pranswer" has been successfully applied.
    HaveLocalPranswer,

    /// SignalingStateHaveRemotePranswer indicates that a local description
    /// of type "offer" has been successfully applied and a remote description
    /// of type "pranswer" has been successfully applied.
    HaveRemotePranswer,

    /// SignalingStateClosed indicates The PeerConnection has been closed.
    /// Closed is absorbing: nothing transitions out of it.
    Closed,
}

const SIGNALING_STATE_STABLE_STR: &str = "stable";
const SIGNALING_STATE_HAVE_LOCAL_OFFER_STR: &str = "have-local-offer";
const SIGNALING_STATE_HAVE_REMOTE_OFFER_STR: &str = "have-remote-offer";
const SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR: &str = "have-local-pranswer";
const SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR: &str = "have-remote-pranswer";
const SIGNALING_STATE_CLOSED_STR: &str = "closed";

impl From<&str> for RTCSignalingState {
    fn from(raw: &str) -> Self {
        match raw {
            SIGNALING_STATE_STABLE_STR => RTCSignalingState::Stable,
            SIGNALING_STATE_HAVE_LOCAL_OFFER_STR => RTCSignalingState::HaveLocalOffer,
            SIGNALING_STATE_HAVE_REMOTE_OFFER_STR => RTCSignalingState::HaveRemoteOffer,
            SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR => RTCSignalingState::HaveLocalPranswer,
            SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR => RTCSignalingState::HaveRemotePranswer,
            SIGNALING_STATE_CLOSED_STR => RTCSignalingState::Closed,
            _ => RTCSignalingState::Unspecified,
        }
    }
}

impl fmt::Display for RTCSignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCSignalingState::Stable => SIGNALING_STATE_STABLE_STR,
            RTCSignalingState::HaveLocalOffer => SIGNALING_STATE_HAVE_LOCAL_OFFER_STR,
            RTCSignalingState::HaveRemoteOffer => SIGNALING_STATE_HAVE_REMOTE_OFFER_STR,
            RTCSignalingState::HaveLocalPranswer => SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR,
            RTCSignalingState::HaveRemotePranswer => SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR,
            RTCSignalingState::Closed => SIGNALING_STATE_CLOSED_STR,
            RTCSignalingState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

impl From<u8> for RTCSignalingState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCSignalingState::Stable,
            2 => RTCSignalingState::HaveLocalOffer,
            3 => RTCSignalingState::HaveRemoteOffer,
            4 => RTCSignalingState::HaveLocalPranswer,
            5 => RTCSignalingState::HaveRemotePranswer,
            6 => RTCSignalingState::Closed,
            _ => RTCSignalingState::Unspecified,
        }
    }
}

/// next_signaling_state returns the state reached by applying a description of
/// `sdp_type` through `op` while in `cur`, or the reason the transition is invalid.
pub(crate) fn next_signaling_state(
    cur: RTCSignalingState,
    op: StateChangeOp,
    sdp_type: RTCSdpType,
) -> Result<RTCSignalingState> {
    if cur == RTCSignalingState::Closed {
        return Err(Error::ErrConnectionClosed);
    }

    // Special case for rollbacks
    if sdp_type == RTCSdpType::Rollback {
        return match (cur, op) {
            (RTCSignalingState::Stable, _) => Err(Error::ErrSignalingStateCannotRollback),
            // have-local-offer->SetLocal(rollback)->stable
            (RTCSignalingState::HaveLocalOffer, StateChangeOp::SetLocal)
            // have-remote-offer->SetRemote(rollback)->stable
            | (RTCSignalingState::HaveRemoteOffer, StateChangeOp::SetRemote) => {
                Ok(RTCSignalingState::Stable)
            }
            _ => Err(invalid_transition(cur, op, sdp_type)),
        };
    }

    // 4.3.1 valid state transitions
    let next = match (cur, op, sdp_type) {
        // stable->SetLocal(offer)->have-local-offer
        (RTCSignalingState::Stable, StateChangeOp::SetLocal, RTCSdpType::Offer) => {
            RTCSignalingState::HaveLocalOffer
        }
        // stable->SetRemote(offer)->have-remote-offer
        (RTCSignalingState::Stable, StateChangeOp::SetRemote, RTCSdpType::Offer) => {
            RTCSignalingState::HaveRemoteOffer
        }
        // have-local-offer->SetLocal(offer)->have-local-offer
        (RTCSignalingState::HaveLocalOffer, StateChangeOp::SetLocal, RTCSdpType::Offer) => {
            RTCSignalingState::HaveLocalOffer
        }
        // have-local-offer->SetRemote(answer)->stable
        (RTCSignalingState::HaveLocalOffer, StateChangeOp::SetRemote, RTCSdpType::Answer) => {
            RTCSignalingState::Stable
        }
        // have-local-offer->SetRemote(pranswer)->have-remote-pranswer
        (RTCSignalingState::HaveLocalOffer, StateChangeOp::SetRemote, RTCSdpType::Pranswer) => {
            RTCSignalingState::HaveRemotePranswer
        }
        // have-remote-pranswer->SetRemote(pranswer)->have-remote-pranswer
        (
            RTCSignalingState::HaveRemotePranswer,
            StateChangeOp::SetRemote,
            RTCSdpType::Pranswer,
        ) => RTCSignalingState::HaveRemotePranswer,
        // have-remote-pranswer->SetRemote(answer)->stable
        (RTCSignalingState::HaveRemotePranswer, StateChangeOp::SetRemote, RTCSdpType::Answer) => {
            RTCSignalingState::Stable
        }
        // have-remote-offer->SetRemote(offer)->have-remote-offer
        (RTCSignalingState::HaveRemoteOffer, StateChangeOp::SetRemote, RTCSdpType::Offer) => {
            RTCSignalingState::HaveRemoteOffer
        }
        // have-remote-offer->SetLocal(answer)->stable
        (RTCSignalingState::HaveRemoteOffer, StateChangeOp::SetLocal, RTCSdpType::Answer) => {
            RTCSignalingState::Stable
        }
        // have-remote-offer->SetLocal(pranswer)->have-local-pranswer
        (RTCSignalingState::HaveRemoteOffer, StateChangeOp::SetLocal, RTCSdpType::Pranswer) => {
            RTCSignalingState::HaveLocalPranswer
        }
        // have-local-pranswer->SetLocal(pranswer)->have-local-pranswer
        (RTCSignalingState::HaveLocalPranswer, StateChangeOp::SetLocal, RTCSdpType::Pranswer) => {
            RTCSignalingState::HaveLocalPranswer
        }
        // have-local-pranswer->SetLocal(answer)->stable
        (RTCSignalingState::HaveLocalPranswer, StateChangeOp::SetLocal, RTCSdpType::Answer) => {
            RTCSignalingState::Stable
        }
        _ => return Err(invalid_transition(cur, op, sdp_type)),
    };

    Ok(next)
}

fn invalid_transition(cur: RTCSignalingState, op: StateChangeOp, sdp_type: RTCSdpType) -> Error {
    Error::ErrSignalingStateProposedTransitionInvalid {
        from: cur,
        applying: sdp_type,
        is_local: op == StateChangeOp::SetLocal,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_signaling_state() {
        let tests = vec![
            ("Unspecified", RTCSignalingState::Unspecified),
            ("stable", RTCSignalingState::Stable),
            ("have-local-offer", RTCSignalingState::HaveLocalOffer),
            ("have-remote-offer", RTCSignalingState::HaveRemoteOffer),
            ("have-local-pranswer", RTCSignalingState::HaveLocalPranswer),
            (
                "have-remote-pranswer",
                RTCSignalingState::HaveRemotePranswer,
            ),
            ("closed", RTCSignalingState::Closed),
        ];

        for (state_string, expected_state) in tests {
            assert_eq!(RTCSignalingState::from(state_string), expected_state);
            assert_eq!(
                RTCSignalingState::from(expected_state as u8),
                expected_state
            );
        }
    }

    #[test]
    fn test_signaling_state_transitions() {
        use RTCSdpType::*;
        use RTCSignalingState::*;
        use StateChangeOp::*;

        let tests = vec![
            ("stable->SetLocal(offer)", Stable, SetLocal, Offer, HaveLocalOffer),
            ("stable->SetRemote(offer)", Stable, SetRemote, Offer, HaveRemoteOffer),
            ("have-local-offer->SetRemote(answer)", HaveLocalOffer, SetRemote, Answer, Stable),
            (
                "have-local-offer->SetRemote(pranswer)",
                HaveLocalOffer,
                SetRemote,
                Pranswer,
                HaveRemotePranswer,
            ),
            (
                "have-remote-pranswer->SetRemote(answer)",
                HaveRemotePranswer,
                SetRemote,
                Answer,
                Stable,
            ),
            ("have-remote-offer->SetLocal(answer)", HaveRemoteOffer, SetLocal, Answer, Stable),
            (
                "have-remote-offer->SetLocal(pranswer)",
                HaveRemoteOffer,
                SetLocal,
                Pranswer,
                HaveLocalPranswer,
            ),
            ("have-local-pranswer->SetLocal(answer)", HaveLocalPranswer, SetLocal, Answer, Stable),
            ("have-local-offer->SetLocal(rollback)", HaveLocalOffer, SetLocal, Rollback, Stable),
            ("have-remote-offer->SetRemote(rollback)", HaveRemoteOffer, SetRemote, Rollback, Stable),
        ];

        for (desc, cur, op, sdp_type, expected) in tests {
            let next = next_signaling_state(cur, op, sdp_type)
                .unwrap_or_else(|err| panic!("{desc}: unexpected error {err}"));
            assert_eq!(next, expected, "{desc} state mismatch");
        }
    }

    #[test]
    fn test_signaling_state_invalid_transitions() {
        use RTCSdpType::*;
        use RTCSignalingState::*;
        use StateChangeOp::*;

        let tests = vec![
            ("stable->SetRemote(pranswer)", Stable, SetRemote, Pranswer),
            ("stable->SetLocal(answer)", Stable, SetLocal, Answer),
            ("have-local-offer->SetLocal(answer)", HaveLocalOffer, SetLocal, Answer),
            ("have-remote-offer->SetRemote(answer)", HaveRemoteOffer, SetRemote, Answer),
            ("have-local-offer->SetRemote(rollback)", HaveLocalOffer, SetRemote, Rollback),
        ];

        for (desc, cur, op, sdp_type) in tests {
            let result = next_signaling_state(cur, op, sdp_type);
            assert!(
                matches!(
                    result,
                    Err(Error::ErrSignalingStateProposedTransitionInvalid { .. })
                ),
                "{desc}: expected invalid transition, got {result:?}"
            );
        }
    }

    #[test]
    fn test_signaling_state_rollback_from_stable() {
        let result = next_signaling_state(
            RTCSignalingState::Stable,
            StateChangeOp::SetRemote,
            RTCSdpType::Rollback,
        );
        assert!(matches!(result, Err(Error::ErrSignalingStateCannotRollback)));
    }

    #[test]
    fn test_signaling_state_closed_is_absorbing() {
        for sdp_type in [
            RTCSdpType::Offer,
            RTCSdpType::Answer,
            RTCSdpType::Pranswer,
            RTCSdpType::Rollback,
        ] {
            for op in [StateChangeOp::SetLocal, StateChangeOp::SetRemote] {
                let result = next_signaling_state(RTCSignalingState::Closed, op, sdp_type);
                assert!(matches!(result, Err(Error::ErrConnectionClosed)));
            }
        }
    }
}
