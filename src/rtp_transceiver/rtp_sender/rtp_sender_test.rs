use bytes::Bytes;

use super::*;
use crate::engine::loopback::{LoopbackEngine, LoopbackEngineConfig};
use crate::engine::MediaEngine;
use crate::media::{RawFrame, VideoParameters};
use crate::peer_connection::configuration::RTCConfiguration;
use crate::track::track_local::track_local_static_frame::{TrackLocalState, TrackLocalStaticFrame};

struct SenderFixture {
    engine: Arc<LoopbackEngine>,
    lifecycle: Arc<ConnectionLifecycle>,
    track: Arc<TrackLocalStaticFrame>,
    sender: RTCRtpSender,
}

async fn new_sender(config: LoopbackEngineConfig) -> Result<SenderFixture> {
    let engine = Arc::new(LoopbackEngine::new(config));
    let handle = engine
        .create_connection(&RTCConfiguration::default())
        .await
        .map_err(|err| Error::new(err.to_string()))?;
    let lifecycle = Arc::new(ConnectionLifecycle::new(
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        handle,
    ));

    let source = engine
        .create_track_source(handle, RTPCodecType::Video)
        .await
        .map_err(|err| Error::new(err.to_string()))?;
    let sender_handle = engine
        .add_track_from_source(handle, source, "video", "webrtc-rs")
        .await
        .map_err(|err| Error::new(err.to_string()))?;

    let track = Arc::new(TrackLocalStaticFrame::new_video(
        "video".to_owned(),
        "webrtc-rs".to_owned(),
        VideoParameters::default(),
    )?);
    let sender = RTCRtpSender::new(
        sender_handle,
        source,
        Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
        Arc::clone(&lifecycle),
    )
    .await?;

    Ok(SenderFixture {
        engine,
        lifecycle,
        track,
        sender,
    })
}

fn frame(timestamp: u64) -> RawFrame {
    RawFrame {
        data: Bytes::from(vec![0x55u8; 100_000]),
        timestamp,
    }
}

#[tokio::test]
async fn test_rtp_sender_binds_track() -> Result<()> {
    let f = new_sender(LoopbackEngineConfig::default()).await?;

    assert_eq!(f.sender.kind(), RTPCodecType::Video);
    assert!(!f.sender.is_stopped());
    assert_eq!(f.track.state().await, TrackLocalState::Bound);

    let codec = f.sender.codec().await.expect("bound codec");
    assert_eq!(codec.capability.mime_type, "video/VP8");
    assert_eq!(codec.payload_type, 96);

    let track = f.sender.track().await.expect("sender track");
    assert_eq!(track.id(), "video");
    assert_eq!(track.stream_id(), "webrtc-rs");
    Ok(())
}

#[tokio::test]
async fn test_rtp_sender_counters() -> Result<()> {
    let f = new_sender(LoopbackEngineConfig::default()).await?;

    // keyframe: 1 Mbit/s at 30 fps, doubled
    let n = f.track.write_frame(&frame(0), false).await?;
    assert_eq!(n, 8);
    let m = f.track.write_frame(&frame(3000), false).await?;
    assert_eq!(m, 4);

    let counters = &f.sender.counters;
    assert_eq!(counters.packets_sent.load(Ordering::SeqCst), 12);
    assert_eq!(counters.frames_sent.load(Ordering::SeqCst), 2);
    assert_eq!(f.sender.header_bytes_sent(), 12 * RTP_HEADER_SIZE as u64);
    assert_eq!(
        counters.bytes_sent.load(Ordering::SeqCst) - f.sender.header_bytes_sent(),
        8332 + 4166
    );
    Ok(())
}

#[tokio::test]
async fn test_rtp_sender_stop_is_idempotent() -> Result<()> {
    let f = new_sender(LoopbackEngineConfig::default()).await?;
    let handle = f.lifecycle.handle()?;
    assert_eq!(f.engine.live_sources(handle), 1);

    f.sender.stop().await?;
    f.sender.stop().await?;

    assert!(f.sender.is_stopped());
    assert!(f.sender.track().await.is_none());
    assert!(f.sender.codec().await.is_none());
    assert_eq!(f.track.state().await, TrackLocalState::Unbound);
    assert_eq!(f.engine.live_sources(handle), 0);
    assert_eq!(f.engine.live_encoders(), 0);

    let removals = f
        .engine
        .op_log()
        .iter()
        .filter(|op| op.starts_with("remove_track"))
        .count();
    assert_eq!(removals, 1);

    let result = f.track.write_frame(&frame(0), false).await;
    assert!(matches!(result, Err(Error::ErrNotBound)));
    Ok(())
}

#[tokio::test]
async fn test_rtp_sender_teardown_after_close() -> Result<()> {
    let f = new_sender(LoopbackEngineConfig::default()).await?;
    assert!(f.lifecycle.try_claim_close());
    let calls = f.engine.call_count();

    f.sender.teardown().await?;
    // stop after close must not reach the engine either
    f.sender.stop().await?;

    assert!(f.sender.is_stopped());
    assert_eq!(f.track.state().await, TrackLocalState::Unbound);
    assert_eq!(f.engine.live_encoders(), 0);
    assert!(!f
        .engine
        .op_log()
        .iter()
        .any(|op| op.starts_with("remove_track")));
    // destroying the encoder is the only engine call
    assert_eq!(f.engine.call_count(), calls + 1);
    Ok(())
}

#[tokio::test]
async fn test_rtp_sender_write_failure() -> Result<()> {
    let f = new_sender(LoopbackEngineConfig {
        fail_write_after: Some(3),
        ..Default::default()
    })
    .await?;

    let result = f.track.write_frame(&frame(0), false).await;
    assert!(matches!(result, Err(Error::ErrRtpWriteFailed(_))), "{result:?}");
    assert_eq!(f.sender.counters.packets_sent.load(Ordering::SeqCst), 3);
    assert_eq!(f.sender.counters.frames_sent.load(Ordering::SeqCst), 0);
    assert_eq!(f.track.state().await, TrackLocalState::Bound);
    Ok(())
}
