use portable_atomic::AtomicUsize;
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::*;
use crate::engine::loopback::{LoopbackEngine, LoopbackEngineConfig};
use crate::engine::MediaEngine;
use crate::peer_connection::configuration::RTCConfiguration;

async fn new_channel(
    label: &str,
    init: RTCDataChannelInit,
) -> Result<(Arc<LoopbackEngine>, Arc<ConnectionLifecycle>, RTCDataChannel)> {
    new_channel_with(LoopbackEngineConfig::default(), label, init).await
}

async fn new_channel_with(
    config: LoopbackEngineConfig,
    label: &str,
    init: RTCDataChannelInit,
) -> Result<(Arc<LoopbackEngine>, Arc<ConnectionLifecycle>, RTCDataChannel)> {
    let engine = Arc::new(LoopbackEngine::new(config));
    let handle = engine
        .create_connection(&RTCConfiguration::default())
        .await
        .map_err(|err| Error::new(err.to_string()))?;
    let lifecycle = Arc::new(ConnectionLifecycle::new(
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        handle,
    ));
    let channel = engine
        .create_data_channel(handle, label, &init)
        .await
        .map_err(|err| Error::new(err.to_string()))?;

    let dc = RTCDataChannel::new(
        label.to_owned(),
        &init,
        channel,
        Arc::clone(&lifecycle),
        Arc::new(DataChannelCounters::default()),
    );
    Ok((engine, lifecycle, dc))
}

#[tokio::test]
async fn test_data_channel_init_defaults() -> Result<()> {
    let (_, _, dc) = new_channel("data", RTCDataChannelInit::default()).await?;
    assert_eq!(dc.label(), "data");
    assert!(dc.ordered());
    assert_eq!(dc.protocol(), "");
    assert_eq!(dc.max_retransmits(), None);
    assert_eq!(dc.max_packet_lifetime(), None);
    assert!(!dc.negotiated());
    assert_eq!(dc.ready_state(), RTCDataChannelState::Connecting);

    let init = RTCDataChannelInit {
        ordered: Some(false),
        max_retransmits: Some(3),
        protocol: Some("chat".to_owned()),
        negotiated: Some(7),
        ..Default::default()
    };
    let (_, _, dc) = new_channel("chat", init).await?;
    assert!(!dc.ordered());
    assert_eq!(dc.max_retransmits(), Some(3));
    assert_eq!(dc.protocol(), "chat");
    assert!(dc.negotiated());
    Ok(())
}

#[tokio::test]
async fn test_data_channel_send_requires_open() -> Result<()> {
    let (_, _, dc) = new_channel("data", RTCDataChannelInit::default()).await?;

    let result = dc.send(&Bytes::from_static(b"hello")).await;
    assert!(matches!(result, Err(Error::ErrDataChannelNotOpen)));

    assert!(dc.do_open().await);
    assert!(!dc.do_open().await, "open twice");
    assert_eq!(dc.ready_state(), RTCDataChannelState::Open);

    assert_eq!(dc.send(&Bytes::from_static(b"hello")).await?, 5);
    assert_eq!(dc.send_text("hi").await?, 2);
    assert_eq!(dc.messages_sent(), 2);
    assert_eq!(dc.bytes_sent(), 7);
    assert_eq!(dc.counters.opened.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_data_channel_on_open() -> Result<()> {
    let (_, _, dc) = new_channel("data", RTCDataChannelInit::default()).await?;

    let (open_tx, mut open_rx) = mpsc::channel::<()>(2);
    let tx = open_tx.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = tx.send(()).await;
        })
    }))
    .await;

    dc.do_open().await;
    assert!(open_rx.recv().await.is_some());

    // registered after open: fires right away
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = open_tx.send(()).await;
        })
    }))
    .await;
    let fired = tokio::time::timeout(Duration::from_secs(1), open_rx.recv()).await;
    assert!(matches!(fired, Ok(Some(()))));
    Ok(())
}

#[tokio::test]
async fn test_data_channel_close() -> Result<()> {
    let (engine, _lifecycle, dc) = new_channel("data", RTCDataChannelInit::default()).await?;
    dc.do_open().await;

    let closes = Arc::new(AtomicUsize::new(0));
    let closes2 = Arc::clone(&closes);
    dc.on_close(Box::new(move || {
        let closes3 = Arc::clone(&closes2);
        Box::pin(async move {
            closes3.fetch_add(1, Ordering::SeqCst);
        })
    }))
    .await;

    dc.close().await?;
    dc.close().await?;
    assert!(!dc.mark_closed());

    assert_eq!(dc.ready_state(), RTCDataChannelState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(dc.counters.closed.load(Ordering::SeqCst), 1);

    let close_calls = engine
        .op_log()
        .iter()
        .filter(|op| op.starts_with("close_data_channel"))
        .count();
    assert_eq!(close_calls, 1);

    let result = dc.send_text("late").await;
    assert!(matches!(result, Err(Error::ErrDataChannelNotOpen)));
    Ok(())
}

#[tokio::test]
async fn test_data_channel_close_failure() -> Result<()> {
    let (_, _, dc) = new_channel_with(
        LoopbackEngineConfig {
            fail_data_channel_close: true,
            ..Default::default()
        },
        "data",
        RTCDataChannelInit::default(),
    )
    .await?;
    dc.do_open().await;

    let result = dc.close().await;
    assert!(
        matches!(result, Err(Error::ErrDataChannelCloseFailed(_))),
        "{result:?}"
    );
    assert_eq!(dc.ready_state(), RTCDataChannelState::Closed);
    assert_eq!(dc.counters.closed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_data_channel_teardown_is_silent() -> Result<()> {
    let (_, lifecycle, dc) = new_channel("data", RTCDataChannelInit::default()).await?;
    dc.do_open().await;

    let closes = Arc::new(AtomicUsize::new(0));
    let closes2 = Arc::clone(&closes);
    dc.on_close(Box::new(move || {
        let closes3 = Arc::clone(&closes2);
        Box::pin(async move {
            closes3.fetch_add(1, Ordering::SeqCst);
        })
    }))
    .await;

    assert!(lifecycle.try_claim_close());
    assert!(dc.mark_closed());
    dc.close().await?;

    assert_eq!(dc.ready_state(), RTCDataChannelState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert_eq!(dc.counters.closed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_data_channel_after_connection_close() -> Result<()> {
    let (engine, lifecycle, dc) = new_channel("data", RTCDataChannelInit::default()).await?;
    dc.do_open().await;

    assert!(lifecycle.try_claim_close());
    let calls = engine.call_count();

    let result = dc.send_text("late").await;
    assert!(matches!(result, Err(Error::ErrConnectionClosed)));

    dc.close().await?;
    assert_eq!(dc.ready_state(), RTCDataChannelState::Closed);
    assert_eq!(engine.call_count(), calls);
    Ok(())
}
