use std::fmt;

use serde::{Deserialize, Serialize};

use super::PayloadType;

pub const MIME_TYPE_H264: &str = "video/H264";
pub const MIME_TYPE_VP8: &str = "video/VP8";
pub const MIME_TYPE_VP9: &str = "video/VP9";
pub const MIME_TYPE_AV1: &str = "video/AV1";
pub const MIME_TYPE_OPUS: &str = "audio/opus";
pub const MIME_TYPE_G722: &str = "audio/G722";
pub const MIME_TYPE_PCMU: &str = "audio/PCMU";
pub const MIME_TYPE_PCMA: &str = "audio/PCMA";

/// Dynamic payload types (RFC 3551) handed out when a track's codec is not
/// among the offered ones.
const DYNAMIC_PAYLOAD_TYPES: std::ops::RangeInclusive<PayloadType> = 96..=127;

/// RTPCodecType is the media kind of a codec, track or transceiver.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RTPCodecType {
    #[default]
    Unspecified = 0,

    #[serde(rename = "audio")]
    Audio = 1,

    #[serde(rename = "video")]
    Video = 2,
}

impl From<&str> for RTPCodecType {
    fn from(raw: &str) -> Self {
        match raw {
            "audio" => RTPCodecType::Audio,
            "video" => RTPCodecType::Video,
            _ => RTPCodecType::Unspecified,
        }
    }
}

impl From<u8> for RTPCodecType {
    fn from(v: u8) -> Self {
        match v {
            1 => RTPCodecType::Audio,
            2 => RTPCodecType::Video,
            _ => RTPCodecType::Unspecified,
        }
    }
}

impl fmt::Display for RTPCodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTPCodecType::Audio => "audio",
            RTPCodecType::Video => "video",
            RTPCodecType::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// RTCRtpCodecCapability describes one codec a track can be sent with.
/// <https://w3c.github.io/webrtc-pc/#dictionary-rtcrtpcodeccapability-members>
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RTCRtpCodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl RTCRtpCodecCapability {
    /// The kind is the MIME top-level type.
    pub fn kind(&self) -> RTPCodecType {
        let top = self.mime_type.split('/').next().unwrap_or_default();
        RTPCodecType::from(top.to_lowercase().as_str())
    }
}

/// RTCRtpCodecParameters is a codec together with the payload type it was
/// negotiated under.
/// <https://w3c.github.io/webrtc-pc/#rtcrtpcodecparameters>
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RTCRtpCodecParameters {
    pub capability: RTCRtpCodecCapability,
    pub payload_type: PayloadType,
    pub stats_id: String,
}

/// RTCRtpParameters is the list of codecs a transport context offers.
/// <https://w3c.github.io/webrtc-pc/#dictionary-rtcrtpparameters-members>
#[derive(Default, Debug, Clone)]
pub struct RTCRtpParameters {
    pub codecs: Vec<RTCRtpCodecParameters>,
}

fn codec(mime_type: &str, clock_rate: u32, channels: u16, payload_type: PayloadType) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate,
            channels,
            sdp_fmtp_line: String::new(),
        },
        payload_type,
        stats_id: format!("RTPCodec-{payload_type}"),
    }
}

/// The codecs a connection offers for `kind` when binding a local track.
pub(crate) fn default_codecs(kind: RTPCodecType) -> Vec<RTCRtpCodecParameters> {
    match kind {
        RTPCodecType::Audio => vec![
            codec(MIME_TYPE_OPUS, 48000, 2, 111),
            codec(MIME_TYPE_G722, 8000, 0, 9),
            codec(MIME_TYPE_PCMU, 8000, 0, 0),
            codec(MIME_TYPE_PCMA, 8000, 0, 8),
        ],
        RTPCodecType::Video => vec![
            codec(MIME_TYPE_VP8, 90000, 0, 96),
            codec(MIME_TYPE_VP9, 90000, 0, 98),
            codec(MIME_TYPE_H264, 90000, 0, 102),
            codec(MIME_TYPE_AV1, 90000, 0, 41),
        ],
        RTPCodecType::Unspecified => vec![],
    }
}

/// codec_exact_match finds the offered codec with the same MIME type,
/// compared case-insensitively.
pub(crate) fn codec_exact_match(
    needle: &RTCRtpCodecCapability,
    haystack: &[RTCRtpCodecParameters],
) -> Option<RTCRtpCodecParameters> {
    haystack
        .iter()
        .find(|c| c.capability.mime_type.eq_ignore_ascii_case(&needle.mime_type))
        .cloned()
}

/// first_unused_payload_type returns the lowest dynamic payload type no
/// offered codec uses.
pub(crate) fn first_unused_payload_type(codecs: &[RTCRtpCodecParameters]) -> Option<PayloadType> {
    DYNAMIC_PAYLOAD_TYPES.into_iter().find(|pt| codecs.iter().all(|c| c.payload_type != *pt))
}
