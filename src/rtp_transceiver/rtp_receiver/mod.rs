use std::sync::Arc;

use crate::engine::ReceiverHandle;
use crate::rtp_transceiver::rtp_codec::RTPCodecType;
use crate::track::track_remote::TrackRemote;

/// RTPReceiver allows an application to inspect the receipt of a TrackRemote
#[derive(Debug)]
pub struct RTCRtpReceiver {
    kind: RTPCodecType,
    track: Arc<TrackRemote>,
}

impl RTCRtpReceiver {
    pub(crate) fn new(track: Arc<TrackRemote>) -> Self {
        RTCRtpReceiver {
            kind: track.kind(),
            track,
        }
    }

    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    /// track returns the remote track announced with this receiver
    pub fn track(&self) -> Arc<TrackRemote> {
        Arc::clone(&self.track)
    }

    pub(crate) fn handle(&self) -> ReceiverHandle {
        self.track.receiver_handle()
    }
}
