use std::fmt;

use serde::{Deserialize, Serialize};

/// RTCIceCredentialType is the kind of credential carried by an
/// [`RTCIceServer`](super::ice_server::RTCIceServer).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCIceCredentialType {
    Unspecified,

    /// Long-term username/password credentials, RFC 5389.
    #[default]
    #[serde(rename = "password")]
    Password,

    /// Token credentials, RFC 7635. Rejected when validating TURN servers.
    #[serde(rename = "oauth")]
    Oauth,
}

const ICE_CREDENTIAL_TYPE_PASSWORD_STR: &str = "password";
const ICE_CREDENTIAL_TYPE_OAUTH_STR: &str = "oauth";

impl From<&str> for RTCIceCredentialType {
    fn from(raw: &str) -> Self {
        match raw {
            ICE_CREDENTIAL_TYPE_PASSWORD_STR => RTCIceCredentialType::Password,
            ICE_CREDENTIAL_TYPE_OAUTH_STR => RTCIceCredentialType::Oauth,
            _ => RTCIceCredentialType::Unspecified,
        }
    }
}

impl fmt::Display for RTCIceCredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceCredentialType::Password => ICE_CREDENTIAL_TYPE_PASSWORD_STR,
            RTCIceCredentialType::Oauth => ICE_CREDENTIAL_TYPE_OAUTH_STR,
            RTCIceCredentialType::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_credential_type_strings() {
        let tests = vec![
            ("Unspecified", RTCIceCredentialType::Unspecified),
            ("password", RTCIceCredentialType::Password),
            ("oauth", RTCIceCredentialType::Oauth),
        ];

        for (ct_str, expected_ct) in tests {
            assert_eq!(RTCIceCredentialType::from(ct_str), expected_ct);
            assert_eq!(expected_ct.to_string(), ct_str);
        }
    }
}
