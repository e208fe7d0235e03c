use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::{AtomicBool, AtomicU8};
use smol_str::SmolStr;
use tokio::sync::{Mutex, OnceCell};

use crate::error::Result;
use crate::rtp_transceiver::rtp_codec::RTPCodecType;
use crate::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use crate::rtp_transceiver::rtp_sender::RTCRtpSender;
use crate::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

pub mod rtp_codec;
pub mod rtp_receiver;
pub mod rtp_sender;
pub mod rtp_transceiver_direction;

/// SSRC represents a synchronization source
/// A synchronization source is a randomly chosen
/// value meant to be globally unique within a particular
/// RTP session. Used to identify a single stream of media.
/// <https://tools.ietf.org/html/rfc3550#section-3>
#[allow(clippy::upper_case_acronyms)]
pub type SSRC = u32;

/// PayloadType identifies the format of the RTP payload and determines
/// its interpretation by the application. Each codec in a RTP Session
/// will have a different PayloadType
/// <https://tools.ietf.org/html/rfc3550#section-3>
pub type PayloadType = u8;

/// RTPTransceiverInit dictionary is used when calling the WebRTC function addTransceiver() to provide configuration options for the new transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RTCRtpTransceiverInit {
    pub direction: RTCRtpTransceiverDirection,
}

impl Default for RTCRtpTransceiverInit {
    fn default() -> Self {
        RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Sendrecv,
        }
    }
}

/// RTPTransceiver represents a combination of an RTPSender and an RTPReceiver that share a common mid.
pub struct RTCRtpTransceiver {
    mid: OnceCell<SmolStr>,
    sender: Mutex<Option<Arc<RTCRtpSender>>>,
    receiver: Mutex<Option<Arc<RTCRtpReceiver>>>,

    direction: AtomicU8, //RTPTransceiverDirection

    pub(crate) stopped: AtomicBool,
    pub(crate) kind: RTPCodecType,
}

impl RTCRtpTransceiver {
    pub(crate) fn new(
        kind: RTPCodecType,
        direction: RTCRtpTransceiverDirection,
        sender: Option<Arc<RTCRtpSender>>,
        receiver: Option<Arc<RTCRtpReceiver>>,
    ) -> Arc<Self> {
        Arc::new(RTCRtpTransceiver {
            mid: OnceCell::new(),
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            direction: AtomicU8::new(direction as u8),
            stopped: AtomicBool::new(false),
            kind,
        })
    }

    /// sender returns the RTPTransceiver's RTPSender if it has one
    pub async fn sender(&self) -> Option<Arc<RTCRtpSender>> {
        let sender = self.sender.lock().await;
        sender.clone()
    }

    /// receiver returns the RTPTransceiver's RTPReceiver if it has one
    pub async fn receiver(&self) -> Option<Arc<RTCRtpReceiver>> {
        let receiver = self.receiver.lock().await;
        receiver.clone()
    }

    /// set_mid sets the RTPTransceiver's mid. A mid, once set, never changes.
    pub(crate) fn set_mid(&self, mid: SmolStr) -> bool {
        self.mid.set(mid).is_ok()
    }

    /// mid gets the Transceiver's mid value.
    pub fn mid(&self) -> Option<SmolStr> {
        self.mid.get().cloned()
    }

    /// kind returns RTPTransceiver's kind.
    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    /// direction returns the RTPTransceiver's desired direction.
    pub fn direction(&self) -> RTCRtpTransceiverDirection {
        self.direction.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_direction_internal(&self, d: RTCRtpTransceiverDirection) -> bool {
        let previous: RTCRtpTransceiverDirection =
            self.direction.swap(d as u8, Ordering::SeqCst).into();
        if previous != d {
            log::trace!("changing direction of transceiver from {previous} to {d}");
        }
        previous != d
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// stop irreversibly stops the RTPTransceiver
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sender = self.sender().await;
        if let Some(sender) = sender {
            sender.stop().await?;
        }

        self.set_direction_internal(RTCRtpTransceiverDirection::Inactive);
        Ok(())
    }

    /// Marks the transceiver stopped during connection teardown.
    pub(crate) async fn teardown(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        let sender = self.sender().await;
        if let Some(sender) = sender {
            sender.teardown().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for RTCRtpTransceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RTCRtpTransceiver")
            .field("mid", &self.mid)
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("direction", &self.direction())
            .field("stopped", &self.stopped)
            .field("kind", &self.kind)
            .finish()
    }
}
