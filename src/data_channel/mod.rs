#[cfg(test)]
mod data_channel_test;

pub mod data_channel_init;
pub mod data_channel_state;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use data_channel_init::RTCDataChannelInit;
use data_channel_state::RTCDataChannelState;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize};
use tokio::sync::Mutex;

use crate::engine::{DataChannelHandle, RemoteDataChannelInfo};
use crate::error::{Error, Result};
use crate::peer_connection::lifecycle::ConnectionLifecycle;

/// Labels and protocols are bounded by the 16-bit length field of the
/// channel open message.
pub(crate) const DATA_CHANNEL_STRING_LIMIT: usize = u16::MAX as usize;

pub type OnOpenHdlrFn =
    Box<dyn (FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

pub type OnCloseHdlrFn =
    Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// Per-connection data channel counters reported by `get_stats`.
#[derive(Default, Debug)]
pub(crate) struct DataChannelCounters {
    pub(crate) requested: AtomicU32,
    pub(crate) accepted: AtomicU32,
    pub(crate) opened: AtomicU32,
    pub(crate) closed: AtomicU32,
}

/// RTCDataChannel is a bidirectional message channel multiplexed on the
/// connection's transport. Framing and reliability are implemented by the
/// media engine; this type tracks the ready state and forwards sends.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCDataChannel
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-rtcdatachannel
pub struct RTCDataChannel {
    pub(crate) stats_id: String,
    pub(crate) label: String,
    pub(crate) ordered: bool,
    pub(crate) max_packet_lifetime: Option<u16>,
    pub(crate) max_retransmits: Option<u16>,
    pub(crate) protocol: String,
    pub(crate) negotiated: Option<u16>,
    pub(crate) handle: DataChannelHandle,
    pub(crate) ready_state: AtomicU8,
    opened_once: AtomicBool,

    messages_sent: AtomicUsize,
    bytes_sent: AtomicUsize,

    on_open_handler: Mutex<Option<OnOpenHdlrFn>>,
    on_close_handler: Mutex<Option<OnCloseHdlrFn>>,

    lifecycle: Arc<ConnectionLifecycle>,
    counters: Arc<DataChannelCounters>,
}

impl std::fmt::Debug for RTCDataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTCDataChannel")
            .field("label", &self.label)
            .field("handle", &self.handle)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl RTCDataChannel {
    pub(crate) fn new(
        label: String,
        init: &RTCDataChannelInit,
        handle: DataChannelHandle,
        lifecycle: Arc<ConnectionLifecycle>,
        counters: Arc<DataChannelCounters>,
    ) -> Self {
        RTCDataChannel {
            stats_id: format!(
                "DataChannel-{}",
                SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos())
            ),
            label,
            ordered: init.ordered.unwrap_or(true),
            max_packet_lifetime: init.max_packet_life_time,
            max_retransmits: init.max_retransmits,
            protocol: init.protocol.clone().unwrap_or_default(),
            negotiated: init.negotiated,
            handle,
            ready_state: AtomicU8::new(RTCDataChannelState::Connecting as u8),
            opened_once: AtomicBool::new(false),
            messages_sent: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
            on_open_handler: Mutex::new(None),
            on_close_handler: Mutex::new(None),
            lifecycle,
            counters,
        }
    }

    /// Builds the local object for a channel announced by the remote peer.
    pub(crate) fn from_remote(
        info: RemoteDataChannelInfo,
        lifecycle: Arc<ConnectionLifecycle>,
        counters: Arc<DataChannelCounters>,
    ) -> Self {
        let init = RTCDataChannelInit {
            ordered: Some(info.ordered),
            max_retransmits: info.max_retransmits,
            protocol: Some(info.protocol),
            ..Default::default()
        };
        RTCDataChannel::new(info.label, &init, info.handle, lifecycle, counters)
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// ordered reports whether messages are delivered in send order.
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    pub fn max_packet_lifetime(&self) -> Option<u16> {
        self.max_packet_lifetime
    }

    pub fn max_retransmits(&self) -> Option<u16> {
        self.max_retransmits
    }

    pub fn protocol(&self) -> &str {
        self.protocol.as_str()
    }

    pub fn negotiated(&self) -> bool {
        self.negotiated.is_some()
    }

    pub fn ready_state(&self) -> RTCDataChannelState {
        self.ready_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn messages_sent(&self) -> usize {
        self.messages_sent.load(Ordering::SeqCst)
    }

    pub(crate) fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// on_open sets an event handler which is invoked once the channel can
    /// carry messages. It fires immediately if the channel is already open.
    pub async fn on_open(&self, f: OnOpenHdlrFn) {
        let mut handler = self.on_open_handler.lock().await;
        if self.ready_state() == RTCDataChannelState::Open {
            tokio::spawn(async move {
                f().await;
            });
        } else {
            *handler = Some(f);
        }
    }

    /// on_close sets an event handler which is invoked when the channel is
    /// closed, locally or by connection teardown.
    pub async fn on_close(&self, f: OnCloseHdlrFn) {
        let mut handler = self.on_close_handler.lock().await;
        *handler = Some(f);
    }

    /// Moves a connecting channel to open. Returns false if it was not
    /// connecting.
    pub(crate) async fn do_open(&self) -> bool {
        if self
            .ready_state
            .compare_exchange(
                RTCDataChannelState::Connecting as u8,
                RTCDataChannelState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        if !self.opened_once.swap(true, Ordering::SeqCst) {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
        }
        log::debug!("data channel {} ({}) open", self.label, self.handle);

        let handler = self.on_open_handler.lock().await.take();
        if let Some(f) = handler {
            f().await;
        }
        true
    }

    /// send sends the binary message to the DataChannel peer
    pub async fn send(&self, data: &Bytes) -> Result<usize> {
        self.send_message(data, false).await
    }

    /// send_text sends the text message to the DataChannel peer
    pub async fn send_text(&self, s: impl Into<String>) -> Result<usize> {
        let s = s.into();
        self.send_message(s.as_bytes(), true).await
    }

    async fn send_message(&self, data: &[u8], is_string: bool) -> Result<usize> {
        let handle = self.lifecycle.handle()?;
        if self.ready_state() != RTCDataChannelState::Open {
            return Err(Error::ErrDataChannelNotOpen);
        }

        let n = self
            .lifecycle
            .engine()
            .send_data_channel_message(handle, self.handle, data, is_string)
            .await
            .map_err(|err| Error::ErrDataChannelSendFailed(err.to_string()))?;

        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }

    /// close closes the DataChannel. It may be called regardless of whether
    /// the DataChannel object was created by this peer or the remote peer.
    pub async fn close(&self) -> Result<()> {
        let prev = self
            .ready_state
            .swap(RTCDataChannelState::Closing as u8, Ordering::SeqCst);
        if prev == RTCDataChannelState::Closing as u8 || prev == RTCDataChannelState::Closed as u8
        {
            self.ready_state.store(prev, Ordering::SeqCst);
            return Ok(());
        }

        // A torn-down connection already released the channel with its handle.
        let result = match self.lifecycle.handle() {
            Ok(handle) => self
                .lifecycle
                .engine()
                .close_data_channel(handle, self.handle)
                .await
                .map_err(|err| Error::ErrDataChannelCloseFailed(err.to_string())),
            Err(_) => Ok(()),
        };

        if self.mark_closed() && !self.lifecycle.is_closed() {
            let mut handler = self.on_close_handler.lock().await;
            if let Some(f) = &mut *handler {
                f().await;
            }
        }
        result
    }

    /// mark_closed moves the channel to `closed` without notifying
    /// subscribers. Connection teardown uses it directly. Returns false if
    /// the channel was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let prev = self
            .ready_state
            .swap(RTCDataChannelState::Closed as u8, Ordering::SeqCst);
        if prev == RTCDataChannelState::Closed as u8 {
            return false;
        }
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        true
    }
}
