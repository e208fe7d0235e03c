use std::sync::atomic::Ordering;

use portable_atomic::AtomicBool;
use tokio::sync::Mutex;

use super::*;
use crate::engine::EncoderConfig;
use crate::error::Error;
use crate::media::encoder::FrameEncoder;
use crate::media::packetizer::{PacketDescriptor, Packetizer};
use crate::media::{AudioParameters, MediaParameters, RawFrame, VideoParameters};

/// TrackLocalState is the bind lifecycle of a [`TrackLocalStaticFrame`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackLocalState {
    Unbound,
    Bound,
    Closed,
}

/// Sizes of the scratch buffers allocated by the current bind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScratchCapacity {
    pub encode_buffer: usize,
    pub packet_buffer: usize,
    pub max_packets: usize,
    pub mtu: usize,
}

/// Encoder settings requested while unbound, applied on the next bind.
#[derive(Debug, Default, Clone)]
struct EncoderSettings {
    bitrate: Option<u32>,
    framerate: Option<u32>,
    keyframe_pending: bool,
}

struct FrameBinding {
    context_id: String,
    codec: RTCRtpCodecParameters,
    encoder: FrameEncoder,
    packetizer: Packetizer,
    write_stream: Arc<dyn TrackLocalWriter + Send + Sync>,
    encode_buf: Vec<u8>,
    packet_buf: Vec<u8>,
    descriptors: Vec<PacketDescriptor>,
}

impl fmt::Debug for FrameBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBinding")
            .field("context_id", &self.context_id)
            .field("codec", &self.codec)
            .field("encoder", &self.encoder)
            .field("packetizer", &self.packetizer)
            .field("encode_buf", &self.encode_buf.len())
            .field("packet_buf", &self.packet_buf.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct TrackLocalStaticFrameInternal {
    binding: Option<FrameBinding>,
    settings: EncoderSettings,
    closed: bool,
}

/// TrackLocalStaticFrame is a TrackLocal that accepts raw frames, encodes
/// them with the media engine and sends them as RTP.
/// If you already hold encoded data use `write_encoded_data`.
#[derive(Debug)]
pub struct TrackLocalStaticFrame {
    codec: RTCRtpCodecCapability,
    id: String,
    stream_id: String,
    params: MediaParameters,
    enabled: AtomicBool,
    internal: Mutex<TrackLocalStaticFrameInternal>,
}

impl TrackLocalStaticFrame {
    /// returns a TrackLocalStaticFrame, rejecting parameters no encoder
    /// could be created for.
    pub fn new(
        codec: RTCRtpCodecCapability,
        id: String,
        stream_id: String,
        params: MediaParameters,
    ) -> Result<Self> {
        params.validate()?;
        if codec.kind() != params.kind() {
            return Err(Error::ErrCodecKindMismatch);
        }

        Ok(TrackLocalStaticFrame {
            codec,
            id,
            stream_id,
            params,
            enabled: AtomicBool::new(true),
            internal: Mutex::new(TrackLocalStaticFrameInternal::default()),
        })
    }

    /// new_video returns a VP8 track.
    pub fn new_video(id: String, stream_id: String, params: VideoParameters) -> Result<Self> {
        let codec = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        };
        Self::new(codec, id, stream_id, MediaParameters::Video(params))
    }

    /// new_audio returns an Opus track.
    pub fn new_audio(id: String, stream_id: String, params: AudioParameters) -> Result<Self> {
        let codec = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: params.channels,
            ..Default::default()
        };
        Self::new(codec, id, stream_id, MediaParameters::Audio(params))
    }

    /// codec gets the Codec of the track
    pub fn codec(&self) -> RTCRtpCodecCapability {
        self.codec.clone()
    }

    pub fn params(&self) -> MediaParameters {
        self.params
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// set_enabled pauses or resumes sending. A disabled track stays bound
    /// and silently drops frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub async fn state(&self) -> TrackLocalState {
        let internal = self.internal.lock().await;
        if internal.closed {
            TrackLocalState::Closed
        } else if internal.binding.is_some() {
            TrackLocalState::Bound
        } else {
            TrackLocalState::Unbound
        }
    }

    /// scratch_capacity reports the buffers of the current bind, if any.
    pub async fn scratch_capacity(&self) -> Option<ScratchCapacity> {
        let internal = self.internal.lock().await;
        internal.binding.as_ref().map(|b| ScratchCapacity {
            encode_buffer: b.encode_buf.len(),
            packet_buffer: b.packet_buf.len(),
            max_packets: b.descriptors.capacity(),
            mtu: b.packetizer.mtu(),
        })
    }

    #[cfg(test)]
    pub(crate) async fn last_packet_descriptors(&self) -> Vec<PacketDescriptor> {
        let internal = self.internal.lock().await;
        internal
            .binding
            .as_ref()
            .map_or_else(Vec::new, |b| b.descriptors.clone())
    }

    /// write_frame encodes a raw frame and writes its packets to the bound
    /// transport, returning the number of packets written.
    ///
    /// A failed packet write abandons the rest of the frame and returns the
    /// error; the track stays bound for the next frame.
    pub async fn write_frame(&self, frame: &RawFrame, force_keyframe: bool) -> Result<usize> {
        let mut internal = self.internal.lock().await;
        let binding = internal.binding.as_mut().ok_or(Error::ErrNotBound)?;

        if !self.enabled() {
            return Ok(0);
        }

        let FrameBinding {
            encoder,
            packetizer,
            write_stream,
            encode_buf,
            packet_buf,
            descriptors,
            ..
        } = binding;

        let info = encoder.encode(frame, force_keyframe, encode_buf)?;
        send_payload(
            packetizer,
            write_stream,
            &encode_buf[..info.size],
            frame.timestamp,
            info.is_keyframe,
            packet_buf,
            descriptors,
        )
        .await
    }

    /// write_encoded_data packetizes an already encoded frame and writes it
    /// to the bound transport. The timestamp is in the 90 kHz transport clock.
    pub async fn write_encoded_data(
        &self,
        data: &[u8],
        timestamp: u64,
        is_keyframe: bool,
    ) -> Result<usize> {
        let mut internal = self.internal.lock().await;
        let binding = internal.binding.as_mut().ok_or(Error::ErrNotBound)?;

        if !self.enabled() {
            return Ok(0);
        }

        send_payload(
            &mut binding.packetizer,
            &binding.write_stream,
            data,
            timestamp,
            is_keyframe,
            &mut binding.packet_buf,
            &mut binding.descriptors,
        )
        .await
    }

    /// request_keyframe makes the next encoded frame a keyframe.
    pub async fn request_keyframe(&self) {
        let mut internal = self.internal.lock().await;
        let internal = &mut *internal;
        match &internal.binding {
            Some(binding) => binding.encoder.request_keyframe(),
            None => internal.settings.keyframe_pending = true,
        }
    }

    pub async fn set_bitrate(&self, bps: u32) -> Result<()> {
        if bps == 0 {
            return Err(Error::ErrInvalidBitrate);
        }
        let mut internal = self.internal.lock().await;
        if let Some(binding) = &internal.binding {
            binding.encoder.set_bitrate(bps)?;
        }
        internal.settings.bitrate = Some(bps);
        Ok(())
    }

    /// set_framerate only applies to video tracks.
    pub async fn set_framerate(&self, fps: u32) -> Result<()> {
        if fps == 0 || !matches!(self.params, MediaParameters::Video(_)) {
            return Err(Error::ErrInvalidFramerate);
        }
        let mut internal = self.internal.lock().await;
        if let Some(binding) = &internal.binding {
            binding.encoder.set_framerate(fps)?;
        }
        internal.settings.framerate = Some(fps);
        Ok(())
    }

    /// close releases the encoder and packetizer. The track can not be
    /// bound again.
    pub async fn close(&self) {
        let mut internal = self.internal.lock().await;
        if internal.closed {
            return;
        }
        internal.closed = true;
        if let Some(binding) = internal.binding.take() {
            log::debug!("track {} closed while bound to {}", self.id, binding.context_id);
        }
    }

    fn negotiate_codec(&self, t: &TrackLocalContext) -> Result<RTCRtpCodecParameters> {
        if let Some(codec) = codec_exact_match(&self.codec, t.codec_parameters()) {
            return Ok(codec);
        }

        // Offer our own codec under a free dynamic payload type.
        let payload_type =
            first_unused_payload_type(t.codec_parameters()).ok_or(Error::ErrCodecNotFound)?;
        log::debug!(
            "track {}: {} not offered, advertising it as payload type {payload_type}",
            self.id,
            self.codec.mime_type
        );
        Ok(RTCRtpCodecParameters {
            capability: self.codec.clone(),
            payload_type,
            stats_id: format!("RTPCodec-{payload_type}"),
        })
    }

    fn create_binding(
        &self,
        t: &TrackLocalContext,
        settings: &EncoderSettings,
    ) -> Result<FrameBinding> {
        let codec = self.negotiate_codec(t)?;
        let clock_rate = if codec.capability.clock_rate != 0 {
            codec.capability.clock_rate
        } else {
            self.codec.clock_rate
        };

        let encoder = FrameEncoder::new(
            t.engine(),
            EncoderConfig {
                mime_type: codec.capability.mime_type.clone(),
                clock_rate,
                params: self.params,
            },
        )?;
        if let Some(bps) = settings.bitrate {
            encoder.set_bitrate(bps)?;
        }
        if let Some(fps) = settings.framerate {
            encoder.set_framerate(fps)?;
        }
        if settings.keyframe_pending {
            encoder.request_keyframe();
        }

        let packetizer = Packetizer::new(t.mtu(), codec.payload_type, t.ssrc(), clock_rate)?;

        let max_output = encoder.max_output_size();
        let encode_buf = vec![0u8; max_output];
        let packet_buf = vec![0u8; packetizer.buffer_size_for(max_output)];
        let descriptors = Vec::with_capacity(packetizer.packet_count(max_output).max(1));

        Ok(FrameBinding {
            context_id: t.id().to_owned(),
            codec,
            encoder,
            packetizer,
            write_stream: t.write_stream(),
            encode_buf,
            packet_buf,
            descriptors,
        })
    }
}

async fn send_payload(
    packetizer: &mut Packetizer,
    write_stream: &Arc<dyn TrackLocalWriter + Send + Sync>,
    payload: &[u8],
    timestamp: u64,
    keyframe: bool,
    packet_buf: &mut [u8],
    descriptors: &mut Vec<PacketDescriptor>,
) -> Result<usize> {
    let n = packetizer.packetize(payload, timestamp, keyframe, packet_buf, descriptors)?;

    for (i, d) in descriptors.iter().enumerate() {
        if let Err(err) = write_stream
            .write(&packet_buf[d.offset..d.offset + d.size])
            .await
        {
            log::warn!("abandoning frame after packet {} of {n}: {err}", i + 1);
            return Err(err);
        }
        log::trace!("wrote packet {}/{n} ({} bytes)", i + 1, d.size);
    }

    Ok(n)
}

#[async_trait]
impl TrackLocal for TrackLocalStaticFrame {
    /// bind is called by the PeerConnection when the track is attached to a
    /// sender. It picks the codec, creates the encoder and packetizer and
    /// sizes the scratch buffers for the encoder's worst-case output.
    async fn bind(&self, t: &TrackLocalContext) -> Result<RTCRtpCodecParameters> {
        let mut internal = self.internal.lock().await;
        if internal.closed {
            return Err(Error::ErrTrackClosed);
        }
        if let Some(binding) = &internal.binding {
            if binding.context_id == t.id() {
                return Ok(binding.codec.clone());
            }
            return Err(Error::ErrTrackAlreadyBound);
        }

        let binding = self.create_binding(t, &internal.settings)?;
        internal.settings.keyframe_pending = false;

        log::debug!(
            "track {} bound to {} with {} (pt {}), {} byte encode buffer, {} byte packet buffer",
            self.id,
            binding.context_id,
            binding.codec.capability.mime_type,
            binding.codec.payload_type,
            binding.encode_buf.len(),
            binding.packet_buf.len()
        );

        let codec = binding.codec.clone();
        internal.binding = Some(binding);
        Ok(codec)
    }

    /// unbind implements the teardown logic when the track is no longer needed. This happens
    /// because a track has been stopped.
    async fn unbind(&self, t: &TrackLocalContext) -> Result<()> {
        let mut internal = self.internal.lock().await;
        let bound_here = internal
            .binding
            .as_ref()
            .is_some_and(|b| b.context_id == t.id());
        if bound_here {
            internal.binding = None;
            log::debug!("track {} unbound from {}", self.id, t.id());
        }
        Ok(())
    }

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn stream_id(&self) -> &str {
        self.stream_id.as_str()
    }

    fn kind(&self) -> RTPCodecType {
        self.params.kind()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
