use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ice_transport::ice_credential_type::RTCIceCredentialType;

/// RTCIceServer describes one STUN or TURN server handed to the media engine.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RTCIceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
    #[serde(default)]
    pub credential_type: RTCIceCredentialType,
}

impl RTCIceServer {
    pub(crate) fn validate(&self) -> Result<()> {
        self.urls()?;
        Ok(())
    }

    /// urls parses every configured URL, attaching credentials to TURN
    /// entries. STUN URLs have any `?query` stripped first since strict
    /// RFC 7064 parsing would reject them.
    pub(crate) fn urls(&self) -> Result<Vec<ice::url::Url>> {
        let mut urls = Vec::with_capacity(self.urls.len());

        for raw_url in &self.urls {
            let url_str = if raw_url.starts_with("stun") {
                raw_url.split('?').next().unwrap_or(raw_url.as_str())
            } else {
                raw_url.as_str()
            };

            let mut url = ice::url::Url::parse_url(url_str)?;
            if url.scheme == ice::url::SchemeType::Turn || url.scheme == ice::url::SchemeType::Turns
            {
                // https://www.w3.org/TR/webrtc/#set-the-configuration (step #11.3.2)
                if self.username.is_empty() || self.credential.is_empty() {
                    return Err(Error::ErrNoTurnCredentials);
                }
                url.username = self.username.clone();

                match self.credential_type {
                    RTCIceCredentialType::Password => {
                        url.password = self.credential.clone();
                    }
                    _ => return Err(Error::ErrTurnCredentials),
                }
            }

            urls.push(url);
        }

        Ok(urls)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_server_validate_success() {
        let tests = vec![
            RTCIceServer {
                urls: vec!["turn:192.158.29.39?transport=udp".to_owned()],
                username: "unittest".to_owned(),
                credential: "placeholder".to_owned(),
                credential_type: RTCIceCredentialType::Password,
            },
            RTCIceServer {
                urls: vec!["turn:[2001:db8:1234:5678::1]?transport=udp".to_owned()],
                username: "unittest".to_owned(),
                credential: "placeholder".to_owned(),
                credential_type: RTCIceCredentialType::Password,
            },
            RTCIceServer {
                urls: vec!["stun:global.stun.twilio.com:3478?transport=udp".to_owned()],
                ..Default::default()
            },
        ];

        for ice_server in tests {
            let result = ice_server.urls();
            assert!(result.is_ok(), "{ice_server:?}: {result:?}");
        }
    }

    #[test]
    fn test_ice_server_validate_failure() {
        let tests = vec![
            (
                RTCIceServer {
                    urls: vec!["turn:192.158.29.39?transport=udp".to_owned()],
                    ..Default::default()
                },
                Error::ErrNoTurnCredentials,
            ),
            (
                RTCIceServer {
                    urls: vec!["turn:192.158.29.39?transport=udp".to_owned()],
                    username: "unittest".to_owned(),
                    credential: String::new(),
                    credential_type: RTCIceCredentialType::Password,
                },
                Error::ErrNoTurnCredentials,
            ),
            (
                RTCIceServer {
                    urls: vec!["turn:192.158.29.39?transport=udp".to_owned()],
                    username: "unittest".to_owned(),
                    credential: "placeholder".to_owned(),
                    credential_type: RTCIceCredentialType::Oauth,
                },
                Error::ErrTurnCredentials,
            ),
        ];

        for (ice_server, expected_err) in tests {
            let result = ice_server.urls();
            match result {
                Err(err) => assert_eq!(err.to_string(), expected_err.to_string()),
                Ok(_) => panic!("expected error {expected_err}"),
            }
        }
    }

    #[test]
    fn test_ice_server_rejects_unparseable_url() {
        let ice_server = RTCIceServer {
            urls: vec!["http://example.com".to_owned()],
            ..Default::default()
        };
        assert!(matches!(ice_server.validate(), Err(Error::Ice(_))));
    }
}
