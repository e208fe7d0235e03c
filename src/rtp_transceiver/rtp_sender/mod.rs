#[cfg(test)]
mod rtp_sender_test;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use portable_atomic::{AtomicBool, AtomicU64};
use tokio::sync::Mutex;

use crate::engine::{SenderHandle, SourceHandle};
use crate::error::{flatten_errs, Error, Result};
use crate::media::packetizer::RTP_HEADER_SIZE;
use crate::peer_connection::lifecycle::ConnectionLifecycle;
use crate::rtp_transceiver::rtp_codec::{default_codecs, RTCRtpCodecParameters, RTCRtpParameters, RTPCodecType};
use crate::rtp_transceiver::SSRC;
use crate::track::track_local::{TrackLocal, TrackLocalContext, TrackLocalWriter};

/// Per-sender transmit counters reported by `get_stats`.
#[derive(Debug, Default)]
pub(crate) struct SenderCounters {
    pub(crate) packets_sent: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) frames_sent: AtomicU64,
}

/// RTPSenderWriter is the write stream a bound track writes its packets to.
/// It forwards them to the engine's transport for one sender.
#[derive(Debug)]
pub(crate) struct RTPSenderWriter {
    sender: SenderHandle,
    lifecycle: Arc<ConnectionLifecycle>,
    counters: Arc<SenderCounters>,
}

#[async_trait]
impl TrackLocalWriter for RTPSenderWriter {
    async fn write(&self, b: &[u8]) -> Result<usize> {
        let handle = self.lifecycle.handle()?;
        let n = self
            .lifecycle
            .engine()
            .write_rtp(handle, self.sender, b)
            .await
            .map_err(|err| Error::ErrRtpWriteFailed(err.to_string()))?;

        self.counters.packets_sent.fetch_add(1, Ordering::SeqCst);
        self.counters.bytes_sent.fetch_add(b.len() as u64, Ordering::SeqCst);
        // The marker bit closes a frame.
        if b.len() > 1 && b[1] & 0x80 != 0 {
            self.counters.frames_sent.fetch_add(1, Ordering::SeqCst);
        }
        Ok(n)
    }
}

/// RTPSender allows an application to control how a given Track is encoded and transmitted to a remote peer
pub struct RTCRtpSender {
    pub(crate) id: String,
    pub(crate) handle: SenderHandle,
    pub(crate) source: SourceHandle,
    pub(crate) kind: RTPCodecType,
    pub(crate) ssrc: SSRC,

    pub(crate) track: Mutex<Option<Arc<dyn TrackLocal + Send + Sync>>>,
    pub(crate) context: TrackLocalContext,
    pub(crate) codec: Mutex<Option<RTCRtpCodecParameters>>,

    stopped: AtomicBool,
    pub(crate) counters: Arc<SenderCounters>,
    lifecycle: Arc<ConnectionLifecycle>,
}

impl std::fmt::Debug for RTCRtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTCRtpSender")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl RTCRtpSender {
    /// new creates the sender for an engine sender and binds `track` to it.
    /// The engine objects are owned by the caller until this returns Ok.
    pub(crate) async fn new(
        handle: SenderHandle,
        source: SourceHandle,
        track: Arc<dyn TrackLocal + Send + Sync>,
        lifecycle: Arc<ConnectionLifecycle>,
    ) -> Result<Self> {
        let kind = track.kind();
        let ssrc = rand::random::<u32>();
        let counters = Arc::new(SenderCounters::default());
        let write_stream = Arc::new(RTPSenderWriter {
            sender: handle,
            lifecycle: Arc::clone(&lifecycle),
            counters: Arc::clone(&counters),
        });
        let context = TrackLocalContext::new(
            format!("RTCRtpSender-{}-{ssrc:08x}", handle.0),
            RTCRtpParameters {
                codecs: default_codecs(kind),
            },
            ssrc,
            write_stream,
            Arc::clone(lifecycle.engine()),
        );

        let codec = track.bind(&context).await?;
        log::debug!(
            "{handle} sending track {} with {} (ssrc {ssrc})",
            track.id(),
            codec.capability.mime_type
        );

        Ok(RTCRtpSender {
            id: context.id().to_owned(),
            handle,
            source,
            kind,
            ssrc,
            track: Mutex::new(Some(track)),
            context,
            codec: Mutex::new(Some(codec)),
            stopped: AtomicBool::new(false),
            counters,
            lifecycle,
        })
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    pub fn ssrc(&self) -> SSRC {
        self.ssrc
    }

    /// track returns the RTCRtpTransceiver track, or nil
    pub async fn track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        let track = self.track.lock().await;
        track.clone()
    }

    /// codec is the codec negotiated when the track was bound.
    pub async fn codec(&self) -> Option<RTCRtpCodecParameters> {
        let codec = self.codec.lock().await;
        codec.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn header_bytes_sent(&self) -> u64 {
        self.counters.packets_sent.load(Ordering::SeqCst) * RTP_HEADER_SIZE as u64
    }

    /// stop irreversibly stops the RTPSender: the track is unbound, the
    /// engine sender removed and its track source released.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut errs = vec![];
        if let Err(err) = self.unbind_track().await {
            errs.push(err);
        }

        // After close the engine has already released everything.
        if let Ok(handle) = self.lifecycle.handle() {
            let engine = self.lifecycle.engine();
            if let Err(err) = engine.remove_track(handle, self.handle).await {
                errs.push(Error::new(format!("failed to remove {}: {err}", self.handle)));
            }
            engine.release_track_source(handle, self.source);
        }

        flatten_errs(errs)
    }

    /// teardown stops the sender as part of closing the connection, without
    /// calling into the engine for the connection.
    pub(crate) async fn teardown(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.unbind_track().await
    }

    async fn unbind_track(&self) -> Result<()> {
        let track = self.track.lock().await.take();
        self.codec.lock().await.take();
        match track {
            Some(track) => track.unbind(&self.context).await,
            None => Ok(()),
        }
    }
}
