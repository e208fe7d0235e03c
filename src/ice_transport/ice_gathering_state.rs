use std::fmt;

use serde::{Deserialize, Serialize};

/// RTCIceGatheringState describes local candidate gathering progress.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCIceGatheringState {
    #[default]
    Unspecified,

    /// Gathering has not started.
    #[serde(rename = "new")]
    New,

    /// The engine is collecting local candidates.
    #[serde(rename = "gathering")]
    Gathering,

    /// All local candidates have been emitted. Also the terminal value of a
    /// closed connection.
    #[serde(rename = "complete")]
    Complete,
}

const ICE_GATHERING_STATE_NEW_STR: &str = "new";
const ICE_GATHERING_STATE_GATHERING_STR: &str = "gathering";
const ICE_GATHERING_STATE_COMPLETE_STR: &str = "complete";

impl From<&str> for RTCIceGatheringState {
    fn from(raw: &str) -> Self {
        match raw {
            ICE_GATHERING_STATE_NEW_STR => RTCIceGatheringState::New,
            ICE_GATHERING_STATE_GATHERING_STR => RTCIceGatheringState::Gathering,
            ICE_GATHERING_STATE_COMPLETE_STR => RTCIceGatheringState::Complete,
            _ => RTCIceGatheringState::Unspecified,
        }
    }
}

impl From<u8> for RTCIceGatheringState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCIceGatheringState::New,
            2 => RTCIceGatheringState::Gathering,
            3 => RTCIceGatheringState::Complete,
            _ => RTCIceGatheringState::Unspecified,
        }
    }
}

impl fmt::Display for RTCIceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceGatheringState::New => ICE_GATHERING_STATE_NEW_STR,
            RTCIceGatheringState::Gathering => ICE_GATHERING_STATE_GATHERING_STR,
            RTCIceGatheringState::Complete => ICE_GATHERING_STATE_COMPLETE_STR,
            RTCIceGatheringState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_gathering_state_strings() {
        let tests = vec![
            ("Unspecified", RTCIceGatheringState::Unspecified),
            ("new", RTCIceGatheringState::New),
            ("gathering", RTCIceGatheringState::Gathering),
            ("complete", RTCIceGatheringState::Complete),
        ];

        for (state_string, expected_state) in tests {
            assert_eq!(RTCIceGatheringState::from(state_string), expected_state);
            assert_eq!(expected_state.to_string(), state_string);
            assert_eq!(RTCIceGatheringState::from(expected_state as u8), expected_state);
        }
    }
}
