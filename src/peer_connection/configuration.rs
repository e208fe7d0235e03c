use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ice_transport::ice_server::RTCIceServer;
use crate::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use crate::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use crate::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use crate::peer_connection::policy::sdp_semantics::RTCSdpSemantics;

/// RTCConfiguration describes how a connection is established. It is handed
/// to the media engine unchanged once validated, and serializes to the
/// camelCase JSON shape browsers accept.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RTCConfiguration {
    /// STUN and TURN servers available to ICE.
    pub ice_servers: Vec<RTCIceServer>,

    /// Which candidates ICE is allowed to use.
    pub ice_transport_policy: RTCIceTransportPolicy,

    pub bundle_policy: RTCBundlePolicy,

    pub rtcp_mux_policy: RTCRtcpMuxPolicy,

    pub sdp_semantics: RTCSdpSemantics,

    /// Size of the prefetched ICE candidate pool, RFC 8829.
    pub ice_candidate_pool_size: u8,
}

impl RTCConfiguration {
    /// validate checks every ICE server before any engine resource exists.
    pub(crate) fn validate(&self) -> Result<()> {
        for ice_server in &self.ice_servers {
            ice_server.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::ice_transport::ice_credential_type::RTCIceCredentialType;

    #[test]
    fn test_configuration_json() {
        let j = r#"
        {
            "iceServers": [{
                "urls": ["turn:turn.example.org"],
                "username": "jch",
                "credential": "topsecret",
                "credentialType": "password"
            }],
            "iceTransportPolicy": "relay",
            "bundlePolicy": "max-bundle",
            "rtcpMuxPolicy": "require",
            "sdpSemantics": "unified-plan",
            "iceCandidatePoolSize": 4
        }"#;

        let config: RTCConfiguration = serde_json::from_str(j).unwrap();
        assert_eq!(
            config,
            RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: vec!["turn:turn.example.org".to_owned()],
                    username: "jch".to_owned(),
                    credential: "topsecret".to_owned(),
                    credential_type: RTCIceCredentialType::Password,
                }],
                ice_transport_policy: RTCIceTransportPolicy::Relay,
                bundle_policy: RTCBundlePolicy::MaxBundle,
                rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
                sdp_semantics: RTCSdpSemantics::UnifiedPlan,
                ice_candidate_pool_size: 4,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_json_defaults() {
        let config: RTCConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RTCConfiguration::default());
        assert_eq!(config.sdp_semantics, RTCSdpSemantics::UnifiedPlan);
    }

    #[test]
    fn test_configuration_validate_turn_without_credentials() {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["turn:192.158.29.39?transport=udp".to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ErrNoTurnCredentials)));
    }
}
