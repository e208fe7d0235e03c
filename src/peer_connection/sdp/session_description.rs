use serde::{Deserialize, Serialize};

use super::sdp_type::RTCSdpType;
use crate::error::{Error, Result};
use crate::MAX_SDP_SIZE;

/// RTCSessionDescription is an immutable (type, payload) pair exchanged over
/// the application's signaling channel. The payload is opaque at this layer.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RTCSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: RTCSdpType,

    pub sdp: String,
}

impl RTCSessionDescription {
    /// Given SDP representing an answer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection.
    pub fn answer(sdp: String) -> Result<RTCSessionDescription> {
        Self::with_type(RTCSdpType::Answer, sdp)
    }

    /// Given SDP representing an offer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection.
    pub fn offer(sdp: String) -> Result<RTCSessionDescription> {
        Self::with_type(RTCSdpType::Offer, sdp)
    }

    /// Given SDP representing an answer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection. `pranswer` is used when the
    /// answer may not be final, or when updating a previously sent pranswer.
    pub fn pranswer(sdp: String) -> Result<RTCSessionDescription> {
        Self::with_type(RTCSdpType::Pranswer, sdp)
    }

    /// A description that cancels the current negotiation round.
    pub fn rollback() -> RTCSessionDescription {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Rollback,
            sdp: String::new(),
        }
    }

    fn with_type(sdp_type: RTCSdpType, sdp: String) -> Result<RTCSessionDescription> {
        check_sdp_size(&sdp)?;
        Ok(RTCSessionDescription { sdp_type, sdp })
    }
}

/// Payloads above [`MAX_SDP_SIZE`] are rejected whole, never truncated.
pub(crate) fn check_sdp_size(sdp: &str) -> Result<()> {
    if sdp.len() > MAX_SDP_SIZE {
        Err(Error::ErrSdpTooLarge(sdp.len()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_session_description_json() {
        let tests = vec![
            (RTCSdpType::Offer, r#"{"type":"offer","sdp":"sdp"}"#),
            (RTCSdpType::Pranswer, r#"{"type":"pranswer","sdp":"sdp"}"#),
            (RTCSdpType::Answer, r#"{"type":"answer","sdp":"sdp"}"#),
            (RTCSdpType::Rollback, r#"{"type":"rollback","sdp":"sdp"}"#),
            (
                RTCSdpType::Unspecified,
                r#"{"type":"Unspecified","sdp":"sdp"}"#,
            ),
        ];

        for (sdp_type, expected_string) in tests {
            let desc = RTCSessionDescription {
                sdp_type,
                sdp: "sdp".to_owned(),
            };
            let result = serde_json::to_string(&desc);
            assert!(result.is_ok(), "testCase: marshal err: {result:?}");
            let desc_data = result.unwrap();
            assert_eq!(desc_data, expected_string, "string is not expected");

            let result = serde_json::from_str::<RTCSessionDescription>(&desc_data);
            assert!(result.is_ok(), "testCase: unmarshal err: {result:?}");
            assert_eq!(result.unwrap(), desc);
        }
    }

    #[test]
    fn test_session_description_size_bound() {
        let at_limit = "a".repeat(MAX_SDP_SIZE);
        let desc = RTCSessionDescription::offer(at_limit).unwrap();
        assert_eq!(desc.sdp.len(), MAX_SDP_SIZE);

        let too_large = "a".repeat(MAX_SDP_SIZE + 1);
        let result = RTCSessionDescription::answer(too_large);
        assert!(matches!(result, Err(Error::ErrSdpTooLarge(n)) if n == MAX_SDP_SIZE + 1));
    }

    #[test]
    fn test_session_description_constructors() {
        assert_eq!(
            RTCSessionDescription::pranswer("v=0".to_owned())
                .unwrap()
                .sdp_type,
            RTCSdpType::Pranswer
        );
        let rollback = RTCSessionDescription::rollback();
        assert_eq!(rollback.sdp_type, RTCSdpType::Rollback);
        assert!(rollback.sdp.is_empty());
    }
}
