use std::sync::Arc;

use crate::engine::{EncodedFrameInfo, EncoderConfig, EncoderHandle, MediaEngine};
use crate::error::{Error, Result};
use crate::media::clock::transport_to_micros;
use crate::media::RawFrame;

/// FrameEncoder adapts the media engine's encoder primitives to a single
/// owned object. The engine encoder is destroyed when the adapter drops.
pub struct FrameEncoder {
    engine: Arc<dyn MediaEngine>,
    handle: EncoderHandle,
    config: EncoderConfig,
    max_output_size: usize,
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("max_output_size", &self.max_output_size)
            .finish()
    }
}

impl FrameEncoder {
    pub fn new(engine: Arc<dyn MediaEngine>, config: EncoderConfig) -> Result<Self> {
        let handle = engine
            .create_encoder(&config)
            .map_err(|err| Error::ErrEncoderCreationFailed(err.to_string()))?;

        let max_output_size = engine.encoder_max_output_size(handle);
        if max_output_size == 0 {
            engine.destroy_encoder(handle);
            return Err(Error::ErrEncoderCreationFailed(format!(
                "{} encoder reports no output capacity",
                config.mime_type
            )));
        }

        log::debug!(
            "created {} encoder {handle}, worst-case output {max_output_size} bytes",
            config.mime_type
        );

        Ok(FrameEncoder {
            engine,
            handle,
            config,
            max_output_size,
        })
    }

    pub fn handle(&self) -> EncoderHandle {
        self.handle
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Worst-case size of one encoded frame; scratch buffers are sized to it.
    pub fn max_output_size(&self) -> usize {
        self.max_output_size
    }

    /// encode encodes `frame` into the front of `out`.
    pub fn encode(
        &self,
        frame: &RawFrame,
        force_keyframe: bool,
        out: &mut [u8],
    ) -> Result<EncodedFrameInfo> {
        let info = self
            .engine
            .encode(
                self.handle,
                &frame.data,
                transport_to_micros(frame.timestamp),
                force_keyframe,
                out,
            )
            .map_err(|err| Error::ErrEncodeFailed(err.to_string()))?;

        if info.size > out.len() {
            return Err(Error::ErrEncodedFrameTooLarge {
                size: info.size,
                capacity: out.len(),
            });
        }
        Ok(info)
    }

    pub fn request_keyframe(&self) {
        self.engine.request_keyframe(self.handle);
    }

    pub fn set_bitrate(&self, bps: u32) -> Result<()> {
        self.engine
            .set_encoder_bitrate(self.handle, bps)
            .map_err(|err| Error::ErrEncodeFailed(err.to_string()))
    }

    pub fn set_framerate(&self, fps: u32) -> Result<()> {
        self.engine
            .set_encoder_framerate(self.handle, fps)
            .map_err(|err| Error::ErrEncodeFailed(err.to_string()))
    }
}

impl Drop for FrameEncoder {
    fn drop(&mut self) {
        log::debug!("destroying encoder {}", self.handle);
        self.engine.destroy_encoder(self.handle);
    }
}
