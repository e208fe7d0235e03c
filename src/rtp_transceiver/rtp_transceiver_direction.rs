use std::fmt;

use serde::{Deserialize, Serialize};

/// RTCRtpTransceiverDirection is the negotiated direction of a transceiver.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCRtpTransceiverDirection {
    #[default]
    Unspecified,

    #[serde(rename = "sendrecv")]
    Sendrecv,

    #[serde(rename = "sendonly")]
    Sendonly,

    #[serde(rename = "recvonly")]
    Recvonly,

    #[serde(rename = "inactive")]
    Inactive,
}

const RTP_TRANSCEIVER_DIRECTION_SENDRECV_STR: &str = "sendrecv";
const RTP_TRANSCEIVER_DIRECTION_SENDONLY_STR: &str = "sendonly";
const RTP_TRANSCEIVER_DIRECTION_RECVONLY_STR: &str = "recvonly";
const RTP_TRANSCEIVER_DIRECTION_INACTIVE_STR: &str = "inactive";

impl From<&str> for RTCRtpTransceiverDirection {
    fn from(raw: &str) -> Self {
        match raw {
            RTP_TRANSCEIVER_DIRECTION_SENDRECV_STR => RTCRtpTransceiverDirection::Sendrecv,
            RTP_TRANSCEIVER_DIRECTION_SENDONLY_STR => RTCRtpTransceiverDirection::Sendonly,
            RTP_TRANSCEIVER_DIRECTION_RECVONLY_STR => RTCRtpTransceiverDirection::Recvonly,
            RTP_TRANSCEIVER_DIRECTION_INACTIVE_STR => RTCRtpTransceiverDirection::Inactive,
            _ => RTCRtpTransceiverDirection::Unspecified,
        }
    }
}

impl From<u8> for RTCRtpTransceiverDirection {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCRtpTransceiverDirection::Sendrecv,
            2 => RTCRtpTransceiverDirection::Sendonly,
            3 => RTCRtpTransceiverDirection::Recvonly,
            4 => RTCRtpTransceiverDirection::Inactive,
            _ => RTCRtpTransceiverDirection::Unspecified,
        }
    }
}

impl fmt::Display for RTCRtpTransceiverDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCRtpTransceiverDirection::Sendrecv => RTP_TRANSCEIVER_DIRECTION_SENDRECV_STR,
            RTCRtpTransceiverDirection::Sendonly => RTP_TRANSCEIVER_DIRECTION_SENDONLY_STR,
            RTCRtpTransceiverDirection::Recvonly => RTP_TRANSCEIVER_DIRECTION_RECVONLY_STR,
            RTCRtpTransceiverDirection::Inactive => RTP_TRANSCEIVER_DIRECTION_INACTIVE_STR,
            RTCRtpTransceiverDirection::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

impl RTCRtpTransceiverDirection {
    /// reverse is the direction the remote side sees.
    pub fn reverse(&self) -> RTCRtpTransceiverDirection {
        match *self {
            RTCRtpTransceiverDirection::Sendonly => RTCRtpTransceiverDirection::Recvonly,
            RTCRtpTransceiverDirection::Recvonly => RTCRtpTransceiverDirection::Sendonly,
            _ => *self,
        }
    }

    pub fn has_send(&self) -> bool {
        matches!(
            self,
            RTCRtpTransceiverDirection::Sendrecv | RTCRtpTransceiverDirection::Sendonly
        )
    }

    pub fn has_recv(&self) -> bool {
        matches!(
            self,
            RTCRtpTransceiverDirection::Sendrecv | RTCRtpTransceiverDirection::Recvonly
        )
    }
}
