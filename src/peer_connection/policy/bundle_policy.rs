use std::fmt;

use serde::{Deserialize, Serialize};

/// RTCBundlePolicy tells the media engine how to group media lines onto
/// transports when the remote endpoint is not bundle-aware.
///
/// ## Specifications
///
/// * [W3C]
///
/// [W3C]: https://w3c.github.io/webrtc-pc/#rtcbundlepolicy-enum
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum RTCBundlePolicy {
    #[default]
    Unspecified = 0,

    /// One transport per media kind in use.
    #[serde(rename = "balanced")]
    Balanced = 1,

    /// One transport per track.
    #[serde(rename = "max-compat")]
    MaxCompat = 2,

    /// A single transport for everything.
    #[serde(rename = "max-bundle")]
    MaxBundle = 3,
}

const BUNDLE_POLICY_BALANCED_STR: &str = "balanced";
const BUNDLE_POLICY_MAX_COMPAT_STR: &str = "max-compat";
const BUNDLE_POLICY_MAX_BUNDLE_STR: &str = "max-bundle";

impl From<&str> for RTCBundlePolicy {
    fn from(raw: &str) -> Self {
        match raw {
            BUNDLE_POLICY_BALANCED_STR => RTCBundlePolicy::Balanced,
            BUNDLE_POLICY_MAX_COMPAT_STR => RTCBundlePolicy::MaxCompat,
            BUNDLE_POLICY_MAX_BUNDLE_STR => RTCBundlePolicy::MaxBundle,
            _ => RTCBundlePolicy::Unspecified,
        }
    }
}

impl fmt::Display for RTCBundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCBundlePolicy::Balanced => BUNDLE_POLICY_BALANCED_STR,
            RTCBundlePolicy::MaxCompat => BUNDLE_POLICY_MAX_COMPAT_STR,
            RTCBundlePolicy::MaxBundle => BUNDLE_POLICY_MAX_BUNDLE_STR,
            RTCBundlePolicy::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bundle_policy_strings() {
        let tests = vec![
            ("Unspecified", RTCBundlePolicy::Unspecified),
            ("balanced", RTCBundlePolicy::Balanced),
            ("max-compat", RTCBundlePolicy::MaxCompat),
            ("max-bundle", RTCBundlePolicy::MaxBundle),
        ];

        for (policy_string, expected_policy) in tests {
            assert_eq!(RTCBundlePolicy::from(policy_string), expected_policy);
            assert_eq!(expected_policy.to_string(), policy_string);
        }
    }
}
