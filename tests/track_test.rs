//! Integration tests for frame tracks attached to peer connections

use std::sync::Arc;

use bytes::Bytes;
use rtcpeer::engine::loopback::{LoopbackEngine, LoopbackEngineConfig};
use rtcpeer::engine::MediaEngine;
use rtcpeer::media::{RawFrame, VideoParameters};
use rtcpeer::peer_connection::configuration::RTCConfiguration;
use rtcpeer::peer_connection::RTCPeerConnection;
use rtcpeer::track::track_local::track_local_static_frame::{
    TrackLocalState, TrackLocalStaticFrame,
};
use rtcpeer::track::track_local::TrackLocal;
use rtcpeer::{Error, Result};
use waitgroup::WaitGroup;

async fn new_peer(engine: &Arc<LoopbackEngine>) -> Result<RTCPeerConnection> {
    RTCPeerConnection::new(
        Arc::clone(engine) as Arc<dyn MediaEngine>,
        RTCConfiguration::default(),
    )
    .await
}

fn video_track() -> Result<Arc<TrackLocalStaticFrame>> {
    Ok(Arc::new(TrackLocalStaticFrame::new_video(
        "video".to_owned(),
        "webrtc-rs".to_owned(),
        VideoParameters::default(),
    )?))
}

fn frame(timestamp: u64) -> RawFrame {
    RawFrame {
        data: Bytes::from(vec![0x10u8; 640 * 480 * 3 / 2]),
        timestamp,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_track_concurrent_writers() -> Result<()> {
    let engine = Arc::new(LoopbackEngine::default());
    let pc = new_peer(&engine).await?;
    let track = video_track()?;
    let sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;

    let wg = WaitGroup::new();
    for w in 0..4u64 {
        let track = Arc::clone(&track);
        let worker = wg.worker();
        tokio::spawn(async move {
            let _d = worker;
            for i in 0..25u64 {
                track
                    .write_frame(&frame((w * 25 + i) * 3000), false)
                    .await
                    .unwrap();
            }
        });
    }
    wg.wait().await;

    let stats = pc.get_stats().await?;
    let rtp = stats
        .outbound_rtp()
        .find(|s| s.id == sender.id())
        .expect("outbound stats");
    assert_eq!(rtp.frames_sent, 100);
    // one keyframe, the rest delta frames
    assert_eq!(rtp.packets_sent, 8 + 99 * 4);

    pc.close().await
}

#[tokio::test]
async fn test_track_moves_between_connections() -> Result<()> {
    let engine = Arc::new(LoopbackEngine::default());
    let first = new_peer(&engine).await?;
    let second = new_peer(&engine).await?;
    let track = video_track()?;

    let sender = first
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;
    assert!(track.write_frame(&frame(0), false).await? > 0);

    // Still bound to the first connection.
    assert!(matches!(
        second
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await,
        Err(Error::ErrTrackAlreadyBound)
    ));

    first.remove_track(&sender).await?;
    assert_eq!(track.state().await, TrackLocalState::Unbound);
    assert!(matches!(
        track.write_frame(&frame(3000), false).await,
        Err(Error::ErrNotBound)
    ));

    second
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;
    // A fresh encoder: the first frame is a keyframe again.
    assert_eq!(track.write_frame(&frame(6000), false).await?, 8);

    first.close().await?;
    second.close().await?;
    assert_eq!(track.state().await, TrackLocalState::Unbound);
    assert_eq!(engine.live_encoders(), 0);
    Ok(())
}

#[tokio::test]
async fn test_track_write_failure_keeps_sending() -> Result<()> {
    let engine = Arc::new(LoopbackEngine::new(LoopbackEngineConfig {
        fail_write_after: Some(4),
        ..Default::default()
    }));
    let pc = new_peer(&engine).await?;
    let track = video_track()?;
    pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;

    let result = track.write_frame(&frame(0), false).await;
    assert!(matches!(result, Err(Error::ErrRtpWriteFailed(_))), "{result:?}");
    assert_eq!(track.state().await, TrackLocalState::Bound);

    pc.close().await?;
    assert!(matches!(
        track.write_frame(&frame(3000), false).await,
        Err(Error::ErrNotBound)
    ));
    Ok(())
}
