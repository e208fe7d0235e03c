use smol_str::SmolStr;

use crate::engine::{ReceiverHandle, RemoteTrackInfo};
use crate::rtp_transceiver::rtp_codec::RTPCodecType;

/// TrackRemote represents a single inbound source of media announced by the
/// media engine. Decoding and playout stay inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRemote {
    id: String,
    stream_id: String,
    kind: RTPCodecType,
    mid: Option<SmolStr>,
    receiver: ReceiverHandle,
}

impl TrackRemote {
    pub(crate) fn new(info: &RemoteTrackInfo) -> Self {
        TrackRemote {
            id: info.id.clone(),
            stream_id: info.stream_id.clone(),
            kind: info.kind,
            mid: info.mid.as_deref().map(SmolStr::new),
            receiver: info.receiver,
        }
    }

    /// id is the unique identifier for this Track. This should be unique for the
    /// stream, but doesn't have to globally unique. A common example would be 'audio' or 'video'
    /// and StreamID would be 'desktop' or 'webcam'
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// stream_id is the group this track belongs too. This must be unique
    pub fn stream_id(&self) -> &str {
        self.stream_id.as_str()
    }

    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    pub fn mid(&self) -> Option<&SmolStr> {
        self.mid.as_ref()
    }

    pub(crate) fn receiver_handle(&self) -> ReceiverHandle {
        self.receiver
    }
}
