use thiserror::Error;
use tokio::sync::mpsc::error::SendError as MpscSendError;

use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::signaling_state::RTCSignalingState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// ErrConnectionClosed indicates an operation executed after connection
    /// has already been closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    /// ErrConnectionCreationFailed indicates the media engine could not
    /// create the native connection.
    #[error("create connection failed: {0}")]
    ErrConnectionCreationFailed(String),

    /// ErrCreateOfferFailed indicates the media engine refused to produce an offer,
    /// e.g. because there is nothing to negotiate.
    #[error("create offer failed: {0}")]
    ErrCreateOfferFailed(String),

    /// ErrCreateAnswerFailed indicates the media engine refused to produce an answer.
    #[error("create answer failed: {0}")]
    ErrCreateAnswerFailed(String),

    /// ErrSetDescriptionFailed indicates the media engine rejected a local or
    /// remote session description.
    #[error("set description failed: {0}")]
    ErrSetDescriptionFailed(String),

    /// ErrAddICECandidateFailed indicates the media engine rejected a remote candidate.
    #[error("add ice candidate failed: {0}")]
    ErrAddICECandidateFailed(String),

    /// ErrSdpTooLarge indicates a session description exceeds the 64 KiB bound.
    #[error("sdp of {0} bytes exceeds the {max} byte limit", max = crate::MAX_SDP_SIZE)]
    ErrSdpTooLarge(usize),

    /// ErrNoRemoteDescription indicates that an operation was rejected because
    /// the remote description is not set
    #[error("remote description is not set")]
    ErrNoRemoteDescription,

    /// ErrIncorrectSignalingState indicates that the signaling state of PeerConnection is not correct
    #[error("operation can not be run in current signaling state")]
    ErrIncorrectSignalingState,

    #[error("can't rollback from stable state")]
    ErrSignalingStateCannotRollback,

    #[error(
        "invalid proposed signaling state transition from {} applying {} {}",
        from,
        applying,
        if *is_local { "local" } else { "remote" }
    )]
    ErrSignalingStateProposedTransitionInvalid {
        from: RTCSignalingState,
        applying: RTCSdpType,
        is_local: bool,
    },

    #[error("invalid SDP type supplied to SetLocalDescription()")]
    ErrPeerConnSDPTypeInvalidValueSetLocalDescription,

    /// ErrNoTurnCredentials indicates that a TURN server URL was provided
    /// without required credentials.
    #[error("turn server credentials required")]
    ErrNoTurnCredentials,

    /// ErrTurnCredentials indicates that provided TURN credentials are partial
    /// or malformed.
    #[error("invalid turn server credentials")]
    ErrTurnCredentials,

    /// ErrSenderNotCreatedByConnection indicates RemoveTrack was called with a RtpSender not created
    /// by this PeerConnection
    #[error("RtpSender not created by this PeerConnection")]
    ErrSenderNotCreatedByConnection,

    /// ErrTrackSourceFailed indicates the media engine could not create the
    /// per-kind source or sender for a track.
    #[error("track source creation failed: {0}")]
    ErrTrackSourceFailed(String),

    /// ErrStringSizeLimit indicates that the character size limit of string is
    /// exceeded. The limit is hardcoded to 65535 according to specifications.
    #[error("data channel label exceeds size limit")]
    ErrStringSizeLimit,

    /// ErrProtocolTooLarge indicates that value given for a DataChannelInit protocol is
    /// longer then 65535 bytes
    #[error("protocol is larger then 65535 bytes")]
    ErrProtocolTooLarge,

    /// ErrDataChannelNotOpen indicates an operation executed when the data
    /// channel is not (yet) open.
    #[error("data channel not open")]
    ErrDataChannelNotOpen,

    #[error("data channel creation failed: {0}")]
    ErrDataChannelCreationFailed(String),

    #[error("data channel send failed: {0}")]
    ErrDataChannelSendFailed(String),

    #[error("data channel close failed: {0}")]
    ErrDataChannelCloseFailed(String),

    #[error("stats collection failed: {0}")]
    ErrStatsFailed(String),

    /// ErrNotBound indicates a write on a track that is not attached to a transport.
    #[error("track is not bound")]
    ErrNotBound,

    /// ErrTrackClosed indicates the track was closed and can not be bound again.
    #[error("track is closed")]
    ErrTrackClosed,

    /// ErrTrackAlreadyBound indicates a bind from a second transport context
    /// while the track is still attached to another one.
    #[error("track is already bound to another transport")]
    ErrTrackAlreadyBound,

    #[error("invalid video width: must be greater than zero")]
    ErrInvalidVideoWidth,

    #[error("invalid video height: must be greater than zero")]
    ErrInvalidVideoHeight,

    #[error("invalid audio sample rate: must be greater than zero")]
    ErrInvalidSampleRate,

    #[error("invalid audio channel count: must be greater than zero")]
    ErrInvalidChannelCount,

    #[error("invalid audio channel count: at most 2 channels are supported")]
    ErrTooManyChannels,

    #[error("invalid bitrate: must be greater than zero")]
    ErrInvalidBitrate,

    /// ErrInvalidFramerate is returned for a zero framerate, or any
    /// framerate on an audio track.
    #[error("invalid framerate: must be greater than zero on a video track")]
    ErrInvalidFramerate,

    /// ErrCodecNotFound is returned when a track has no codec to bind with
    #[error("codec not found")]
    ErrCodecNotFound,

    /// ErrCodecKindMismatch is returned when a track's codec is of another
    /// media kind than its parameters.
    #[error("codec kind does not match track kind")]
    ErrCodecKindMismatch,

    /// ErrTransceiverKindUnspecified is returned when a transceiver is
    /// requested for neither audio nor video.
    #[error("transceiver kind must be audio or video")]
    ErrTransceiverKindUnspecified,

    #[error("add transceiver failed: {0}")]
    ErrAddTransceiverFailed(String),

    #[error("mtu {0} is too small to carry an RTP packet")]
    ErrInvalidMtu(usize),

    #[error("encoder creation failed: {0}")]
    ErrEncoderCreationFailed(String),

    #[error("encode failed: {0}")]
    ErrEncodeFailed(String),

    /// ErrEncodedFrameTooLarge indicates an encoded payload larger than the
    /// scratch buffers allocated at bind time.
    #[error("encoded frame of {size} bytes exceeds the {capacity} byte budget")]
    ErrEncodedFrameTooLarge { size: usize, capacity: usize },

    #[error("rtp write failed: {0}")]
    ErrRtpWriteFailed(String),

    #[error("ice: {0}")]
    Ice(#[from] ice::Error),
    #[error("util: {0}")]
    Util(#[from] util::Error),
    #[error("json: {0}")]
    Json(String),
    #[error("mpsc send: {0}")]
    MpscSend(String),

    #[allow(non_camel_case_types)]
    #[error("{0}")]
    new(String),
}

// Because Tokio SendError is parameterized, we sadly lose the payload.
impl<T> From<MpscSendError<T>> for Error {
    fn from(e: MpscSendError<T>) -> Self {
        Error::MpscSend(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

/// flatten_errs flattens multiple errors into one
pub fn flatten_errs(errs: Vec<impl Into<Error>>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        let errs_strs: Vec<String> = errs.into_iter().map(|e| e.into().to_string()).collect();
        Err(Error::new(errs_strs.join("\n")))
    }
}
