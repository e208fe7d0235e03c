pub mod clock;
pub mod encoder;
pub mod packetizer;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::rtp_transceiver::rtp_codec::RTPCodecType;

/// Channel count limit for audio tracks (mono or stereo).
pub const MAX_AUDIO_CHANNELS: u16 = 2;

/// A RawFrame is one unencoded picture or block of audio samples handed to
/// a send track.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    pub data: Bytes,
    /// Presentation timestamp in the 90 kHz transport clock.
    pub timestamp: u64,
}

/// Encoder settings for a video track.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    /// Target bits per second.
    pub bitrate: u32,
    pub framerate: u32,
}

impl Default for VideoParameters {
    fn default() -> Self {
        VideoParameters {
            width: 640,
            height: 480,
            bitrate: 1_000_000,
            framerate: 30,
        }
    }
}

/// Encoder settings for an audio track.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AudioParameters {
    pub sample_rate: u32,
    pub channels: u16,
    /// Target bits per second.
    pub bitrate: u32,
}

impl Default for AudioParameters {
    fn default() -> Self {
        AudioParameters {
            sample_rate: 48_000,
            channels: 2,
            bitrate: 64_000,
        }
    }
}

/// MediaParameters carries the kind-specific configuration of a track.
/// The variant is the track's kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaParameters {
    Video(VideoParameters),
    Audio(AudioParameters),
}

impl MediaParameters {
    pub fn kind(&self) -> RTPCodecType {
        match self {
            MediaParameters::Video(_) => RTPCodecType::Video,
            MediaParameters::Audio(_) => RTPCodecType::Audio,
        }
    }

    pub fn bitrate(&self) -> u32 {
        match self {
            MediaParameters::Video(v) => v.bitrate,
            MediaParameters::Audio(a) => a.bitrate,
        }
    }

    /// validate rejects parameters no encoder could be created for, so a
    /// bad track fails at construction instead of inside the media engine.
    pub fn validate(&self) -> Result<()> {
        match self {
            MediaParameters::Video(v) => {
                if v.width == 0 {
                    return Err(Error::ErrInvalidVideoWidth);
                }
                if v.height == 0 {
                    return Err(Error::ErrInvalidVideoHeight);
                }
            }
            MediaParameters::Audio(a) => {
                if a.sample_rate == 0 {
                    return Err(Error::ErrInvalidSampleRate);
                }
                if a.channels == 0 {
                    return Err(Error::ErrInvalidChannelCount);
                }
                if a.channels > MAX_AUDIO_CHANNELS {
                    return Err(Error::ErrTooManyChannels);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_media_parameters_validate() {
        let tests = vec![
            (
                "zero width",
                MediaParameters::Video(VideoParameters {
                    width: 0,
                    ..Default::default()
                }),
                Some(Error::ErrInvalidVideoWidth),
            ),
            (
                "zero height",
                MediaParameters::Video(VideoParameters {
                    height: 0,
                    ..Default::default()
                }),
                Some(Error::ErrInvalidVideoHeight),
            ),
            (
                "zero sample rate",
                MediaParameters::Audio(AudioParameters {
                    sample_rate: 0,
                    ..Default::default()
                }),
                Some(Error::ErrInvalidSampleRate),
            ),
            (
                "zero channels",
                MediaParameters::Audio(AudioParameters {
                    channels: 0,
                    ..Default::default()
                }),
                Some(Error::ErrInvalidChannelCount),
            ),
            (
                "three channels",
                MediaParameters::Audio(AudioParameters {
                    channels: 3,
                    ..Default::default()
                }),
                Some(Error::ErrTooManyChannels),
            ),
            (
                "default video",
                MediaParameters::Video(VideoParameters::default()),
                None,
            ),
            (
                "default audio",
                MediaParameters::Audio(AudioParameters::default()),
                None,
            ),
        ];

        for (name, params, expected) in tests {
            let result = params.validate();
            match expected {
                None => assert!(result.is_ok(), "{name}: {result:?}"),
                Some(err) => match result {
                    Err(got) => assert_eq!(got.to_string(), err.to_string(), "{name}"),
                    Ok(()) => panic!("{name}: expected {err}"),
                },
            }
        }
    }

    #[test]
    fn test_media_parameters_kind() {
        assert_eq!(
            MediaParameters::Video(VideoParameters::default()).kind(),
            RTPCodecType::Video
        );
        assert_eq!(
            MediaParameters::Audio(AudioParameters::default()).kind(),
            RTPCodecType::Audio
        );
    }
}
