
pub mod track_local_static_frame;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use util::marshal::Marshal;

use crate::engine::MediaEngine;
use crate::error::Result;
use crate::rtp_transceiver::rtp_codec::*;
use crate::rtp_transceiver::SSRC;
use crate::track::RTP_OUTBOUND_MTU;

/// TrackLocalWriter is the Writer for outbound RTP Packets
#[async_trait]
pub trait TrackLocalWriter: fmt::Debug {
    /// write hands one marshaled RTP packet to the transport.
    async fn write(&self, b: &[u8]) -> Result<usize>;

    /// write_rtp marshals a RTP packet and writes it to the transport
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<usize> {
        let raw = pkt.marshal()?;
        self.write(&raw).await
    }
}

/// TrackLocalContext is the Context passed when a TrackLocal has been
/// bound to or unbound from a transport.
#[derive(Clone)]
pub struct TrackLocalContext {
    pub(crate) id: String,
    pub(crate) params: RTCRtpParameters,
    pub(crate) ssrc: SSRC,
    pub(crate) mtu: Option<usize>,
    pub(crate) write_stream: Arc<dyn TrackLocalWriter + Send + Sync>,
    pub(crate) engine: Arc<dyn MediaEngine>,
}

impl fmt::Debug for TrackLocalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackLocalContext")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("ssrc", &self.ssrc)
            .field("mtu", &self.mtu())
            .field("write_stream", &self.write_stream)
            .finish()
    }
}

impl TrackLocalContext {
    pub fn new(
        id: impl Into<String>,
        params: RTCRtpParameters,
        ssrc: SSRC,
        write_stream: Arc<dyn TrackLocalWriter + Send + Sync>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        TrackLocalContext {
            id: id.into(),
            params,
            ssrc,
            mtu: None,
            write_stream,
            engine,
        }
    }

    /// with_mtu overrides the outbound packet size.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// codec_parameters returns the codecs the transport offers, with their
    /// payload types.
    pub fn codec_parameters(&self) -> &[RTCRtpCodecParameters] {
        &self.params.codecs
    }

    pub fn ssrc(&self) -> SSRC {
        self.ssrc
    }

    /// mtu is the largest RTP packet the track may write, header included.
    pub fn mtu(&self) -> usize {
        self.mtu.unwrap_or(RTP_OUTBOUND_MTU)
    }

    /// write_stream returns the write_stream for this TrackLocal. The implementer writes the outbound
    /// media packets to it
    pub fn write_stream(&self) -> Arc<dyn TrackLocalWriter + Send + Sync> {
        Arc::clone(&self.write_stream)
    }

    /// engine is the media engine that owns the transport. Tracks create
    /// their encoders through it.
    pub fn engine(&self) -> Arc<dyn MediaEngine> {
        Arc::clone(&self.engine)
    }

    /// id is a unique identifier that is used for both bind/unbind
    pub fn id(&self) -> &str {
        self.id.as_str()
    }
}

/// TrackLocal is an interface that controls how the user can send media
/// through a connection.
#[async_trait]
pub trait TrackLocal {
    /// bind attaches the track to a transport and returns the codec it
    /// will send with.
    async fn bind(&self, t: &TrackLocalContext) -> Result<RTCRtpCodecParameters>;

    /// unbind releases everything `bind` created. Calling it again is a no-op.
    async fn unbind(&self, t: &TrackLocalContext) -> Result<()>;

    /// id is the unique identifier for this Track. This should be unique for the
    /// stream, but doesn't have to globally unique. A common example would be 'audio' or 'video'
    /// and stream_id would be 'desktop' or 'webcam'
    fn id(&self) -> &str;

    /// stream_id is the group this track belongs too. This must be unique
    fn stream_id(&self) -> &str;

    /// kind controls if this TrackLocal is audio or video
    fn kind(&self) -> RTPCodecType;

    fn as_any(&self) -> &dyn Any;
}
