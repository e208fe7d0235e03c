use serde::{Deserialize, Serialize};

/// RTCDataChannelInit configures the reliability and framing of a new
/// data channel.
///
/// ## Specifications
///
/// * [W3C]
///
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-rtcdatachannelinit
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RTCDataChannelInit {
    /// ordered defaults to true: messages are delivered in send order.
    pub ordered: Option<bool>,

    /// max_packet_life_time bounds, in milliseconds, how long a message may
    /// be retransmitted.
    pub max_packet_life_time: Option<u16>,

    /// max_retransmits bounds how often a message may be retransmitted.
    pub max_retransmits: Option<u16>,

    /// protocol is the application subprotocol name, at most 65535 bytes.
    pub protocol: Option<String>,

    /// negotiated carries the stream id when the application negotiates the
    /// channel out of band instead of announcing it in-band.
    pub negotiated: Option<u16>,
}
