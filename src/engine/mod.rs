//! The media engine boundary.
//!
//! Everything that touches codecs, ICE, DTLS/SRTP or SDP grammar lives behind
//! [`MediaEngine`]. The peer connection and tracks only orchestrate: they call
//! the primitives below and receive [`EngineEvent`]s through [`EventSink`]s
//! registered per [`CallbackCategory`].

pub mod loopback;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::data_channel::data_channel_init::RTCDataChannelInit;
use crate::ice_transport::ice_candidate::RTCIceCandidateInit;
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::media::MediaParameters;
use crate::peer_connection::configuration::RTCConfiguration;
use crate::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use crate::peer_connection::peer_connection_state::RTCPeerConnectionState;
use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::signaling_state::RTCSignalingState;
use crate::rtp_transceiver::rtp_codec::RTPCodecType;
use crate::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use crate::stats::EngineStats;

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

engine_handle!(
    /// Native peer connection owned exclusively by one `RTCPeerConnection`.
    ConnectionHandle
);
engine_handle!(
    /// Transport-level sender created by `add_track_from_source`.
    SenderHandle
);
engine_handle!(
    /// Transport-level receiver announced through an on-track notification.
    ReceiverHandle
);
engine_handle!(
    /// Per-kind capture source feeding a sender.
    SourceHandle
);
engine_handle!(EncoderHandle);
engine_handle!(DataChannelHandle);

impl ConnectionHandle {
    /// Sentinel stored by a connection once its native handle is released.
    pub const NONE: ConnectionHandle = ConnectionHandle(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Failure reported by a media engine. The core maps these onto the named
/// kinds of [`crate::Error`] for the operation that failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("unknown handle")]
    UnknownHandle,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// CallbackCategory names one family of engine notifications. Each category
/// is registered and unregistered independently.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallbackCategory {
    ConnectionState,
    IceCandidate,
    IceConnectionState,
    IceGatheringState,
    SignalingState,
    Track,
    DataChannel,
    NegotiationNeeded,
    BandwidthEstimate,
}

impl CallbackCategory {
    pub const ALL: [CallbackCategory; 9] = [
        CallbackCategory::ConnectionState,
        CallbackCategory::IceCandidate,
        CallbackCategory::IceConnectionState,
        CallbackCategory::IceGatheringState,
        CallbackCategory::SignalingState,
        CallbackCategory::Track,
        CallbackCategory::DataChannel,
        CallbackCategory::NegotiationNeeded,
        CallbackCategory::BandwidthEstimate,
    ];
}

impl fmt::Display for CallbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CallbackCategory::ConnectionState => "connection-state",
            CallbackCategory::IceCandidate => "ice-candidate",
            CallbackCategory::IceConnectionState => "ice-connection-state",
            CallbackCategory::IceGatheringState => "ice-gathering-state",
            CallbackCategory::SignalingState => "signaling-state",
            CallbackCategory::Track => "on-track",
            CallbackCategory::DataChannel => "on-data-channel",
            CallbackCategory::NegotiationNeeded => "negotiation-needed",
            CallbackCategory::BandwidthEstimate => "bandwidth-estimate",
        };
        write!(f, "{s}")
    }
}

/// A remote track announced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub receiver: ReceiverHandle,
    pub id: String,
    pub stream_id: String,
    pub kind: RTPCodecType,
    pub mid: Option<String>,
}

/// A data channel opened by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataChannelInfo {
    pub handle: DataChannelHandle,
    pub label: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
}

/// Notifications delivered by the engine, possibly from its own threads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionStateChange(RTCPeerConnectionState),
    /// `None` marks the end of candidate gathering.
    IceCandidate(Option<RTCIceCandidateInit>),
    IceConnectionStateChange(RTCIceConnectionState),
    IceGatheringStateChange(RTCIceGatheringState),
    SignalingStateChange(RTCSignalingState),
    Track(RemoteTrackInfo),
    DataChannel(RemoteDataChannelInfo),
    NegotiationNeeded,
    /// Estimated available send bandwidth in bits per second.
    BandwidthEstimate(u64),
}

impl EngineEvent {
    pub fn category(&self) -> CallbackCategory {
        match self {
            EngineEvent::ConnectionStateChange(_) => CallbackCategory::ConnectionState,
            EngineEvent::IceCandidate(_) => CallbackCategory::IceCandidate,
            EngineEvent::IceConnectionStateChange(_) => CallbackCategory::IceConnectionState,
            EngineEvent::IceGatheringStateChange(_) => CallbackCategory::IceGatheringState,
            EngineEvent::SignalingStateChange(_) => CallbackCategory::SignalingState,
            EngineEvent::Track(_) => CallbackCategory::Track,
            EngineEvent::DataChannel(_) => CallbackCategory::DataChannel,
            EngineEvent::NegotiationNeeded => CallbackCategory::NegotiationNeeded,
            EngineEvent::BandwidthEstimate(_) => CallbackCategory::BandwidthEstimate,
        }
    }
}

/// EventSink is the registration token handed to the engine for one
/// callback category. Emitting never blocks, so it is safe from any thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    category: CallbackCategory,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn new(category: CallbackCategory, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        EventSink { category, tx }
    }

    pub fn category(&self) -> CallbackCategory {
        self.category
    }

    /// emit delivers an event to the owning connection. Returns false when
    /// the event belongs to another category or the connection is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        if event.category() != self.category {
            log::warn!(
                "dropping {} event emitted on {} sink",
                event.category(),
                self.category
            );
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

/// Encoder configuration derived from a bound track.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub mime_type: String,
    pub clock_rate: u32,
    pub params: MediaParameters,
}

/// Result of a single encode call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EncodedFrameInfo {
    /// Bytes written at the front of the output buffer.
    pub size: usize,
    pub is_keyframe: bool,
}

/// MediaEngine is the collaborator providing codecs, ICE, secure transport
/// and SDP generation. Connection-level primitives are async; encoder
/// primitives are synchronous and CPU bound.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_connection(&self, config: &RTCConfiguration) -> EngineResult<ConnectionHandle>;

    /// close_connection stops all network activity of the connection.
    async fn close_connection(&self, handle: ConnectionHandle) -> EngineResult<()>;

    /// destroy_connection releases the native connection. The handle is
    /// invalid afterwards.
    fn destroy_connection(&self, handle: ConnectionHandle);

    async fn create_offer(
        &self,
        handle: ConnectionHandle,
        options: &RTCOfferOptions,
    ) -> EngineResult<String>;

    async fn create_answer(
        &self,
        handle: ConnectionHandle,
        options: &RTCAnswerOptions,
    ) -> EngineResult<String>;

    async fn set_local_description(
        &self,
        handle: ConnectionHandle,
        sdp_type: RTCSdpType,
        sdp: &str,
    ) -> EngineResult<()>;

    async fn set_remote_description(
        &self,
        handle: ConnectionHandle,
        sdp_type: RTCSdpType,
        sdp: &str,
    ) -> EngineResult<()>;

    /// gather_candidates starts local ICE candidate gathering.
    async fn gather_candidates(&self, handle: ConnectionHandle) -> EngineResult<()>;

    async fn add_ice_candidate(
        &self,
        handle: ConnectionHandle,
        candidate: &RTCIceCandidateInit,
    ) -> EngineResult<()>;

    async fn create_track_source(
        &self,
        handle: ConnectionHandle,
        kind: RTPCodecType,
    ) -> EngineResult<SourceHandle>;

    fn release_track_source(&self, handle: ConnectionHandle, source: SourceHandle);

    async fn add_track_from_source(
        &self,
        handle: ConnectionHandle,
        source: SourceHandle,
        track_id: &str,
        stream_id: &str,
    ) -> EngineResult<SenderHandle>;

    async fn remove_track(&self, handle: ConnectionHandle, sender: SenderHandle)
        -> EngineResult<()>;

    /// add_transceiver adds a media section with no local track.
    async fn add_transceiver(
        &self,
        handle: ConnectionHandle,
        kind: RTPCodecType,
        direction: RTCRtpTransceiverDirection,
    ) -> EngineResult<()>;

    /// write_rtp hands a marshaled RTP packet to the sender's transport.
    async fn write_rtp(
        &self,
        handle: ConnectionHandle,
        sender: SenderHandle,
        packet: &[u8],
    ) -> EngineResult<usize>;

    async fn create_data_channel(
        &self,
        handle: ConnectionHandle,
        label: &str,
        init: &RTCDataChannelInit,
    ) -> EngineResult<DataChannelHandle>;

    async fn send_data_channel_message(
        &self,
        handle: ConnectionHandle,
        channel: DataChannelHandle,
        data: &[u8],
        is_string: bool,
    ) -> EngineResult<usize>;

    async fn close_data_channel(
        &self,
        handle: ConnectionHandle,
        channel: DataChannelHandle,
    ) -> EngineResult<()>;

    async fn get_stats(&self, handle: ConnectionHandle) -> EngineResult<EngineStats>;

    fn register_callback(
        &self,
        handle: ConnectionHandle,
        category: CallbackCategory,
        sink: EventSink,
    ) -> EngineResult<()>;

    fn unregister_callback(&self, handle: ConnectionHandle, category: CallbackCategory);

    fn create_encoder(&self, config: &EncoderConfig) -> EngineResult<EncoderHandle>;

    /// encoder_max_output_size is the worst-case size of one encoded frame.
    fn encoder_max_output_size(&self, encoder: EncoderHandle) -> usize;

    /// encode writes one encoded frame to the front of `out`. The timestamp
    /// is in microseconds.
    fn encode(
        &self,
        encoder: EncoderHandle,
        frame: &[u8],
        timestamp_us: u64,
        force_keyframe: bool,
        out: &mut [u8],
    ) -> EngineResult<EncodedFrameInfo>;

    fn request_keyframe(&self, encoder: EncoderHandle);

    fn set_encoder_bitrate(&self, encoder: EncoderHandle, bps: u32) -> EngineResult<()>;

    fn set_encoder_framerate(&self, encoder: EncoderHandle, fps: u32) -> EngineResult<()>;

    fn destroy_encoder(&self, encoder: EncoderHandle);
}
