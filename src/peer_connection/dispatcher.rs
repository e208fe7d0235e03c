use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, Mutex};

use crate::data_channel::data_channel_state::RTCDataChannelState;
use crate::data_channel::RTCDataChannel;
use crate::engine::{EngineEvent, RemoteDataChannelInfo, RemoteTrackInfo};
use crate::ice_transport::ice_candidate::RTCIceCandidateInit;
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::peer_connection::peer_connection_internal::PeerConnectionInternal;
use crate::peer_connection::peer_connection_state::RTCPeerConnectionState;
use crate::peer_connection::signaling_state::RTCSignalingState;
use crate::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use crate::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use crate::rtp_transceiver::RTCRtpTransceiver;
use crate::track::track_remote::TrackRemote;

pub type OnSignalingStateChangeHdlrFn = Box<
    dyn (FnMut(RTCSignalingState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnICEConnectionStateChangeHdlrFn = Box<
    dyn (FnMut(RTCIceConnectionState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnICEGatheringStateChangeHdlrFn = Box<
    dyn (FnMut(RTCIceGatheringState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnPeerConnectionStateChangeHdlrFn = Box<
    dyn (FnMut(RTCPeerConnectionState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// Receives each local candidate, then `None` once gathering has finished.
pub type OnLocalCandidateHdlrFn = Box<
    dyn (FnMut(Option<RTCIceCandidateInit>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnDataChannelHdlrFn = Box<
    dyn (FnMut(Arc<RTCDataChannel>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnTrackHdlrFn = Box<
    dyn (FnMut(
            Arc<TrackRemote>,
            Arc<RTCRtpReceiver>,
            Arc<RTCRtpTransceiver>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnNegotiationNeededHdlrFn =
    Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// Receives the estimated available send bandwidth in bits per second.
pub type OnBandwidthEstimateHdlrFn =
    Box<dyn (FnMut(u64) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// Subscriber slots. Setting a handler replaces the previous one.
#[derive(Default)]
pub(crate) struct PeerConnectionHandlers {
    pub(crate) on_signaling_state_change: ArcSwapOption<Mutex<OnSignalingStateChangeHdlrFn>>,
    pub(crate) on_ice_connection_state_change:
        ArcSwapOption<Mutex<OnICEConnectionStateChangeHdlrFn>>,
    pub(crate) on_ice_gathering_state_change: ArcSwapOption<Mutex<OnICEGatheringStateChangeHdlrFn>>,
    pub(crate) on_peer_connection_state_change:
        ArcSwapOption<Mutex<OnPeerConnectionStateChangeHdlrFn>>,
    pub(crate) on_ice_candidate: ArcSwapOption<Mutex<OnLocalCandidateHdlrFn>>,
    pub(crate) on_track: ArcSwapOption<Mutex<OnTrackHdlrFn>>,
    pub(crate) on_data_channel: ArcSwapOption<Mutex<OnDataChannelHdlrFn>>,
    pub(crate) on_negotiation_needed: ArcSwapOption<Mutex<OnNegotiationNeededHdlrFn>>,
    pub(crate) on_bandwidth_estimate: ArcSwapOption<Mutex<OnBandwidthEstimateHdlrFn>>,
}

/// spawn_dispatcher starts the task that delivers every notification of one
/// connection, in the order it was queued. Signaling transitions made by
/// local calls arrive on `local_rx`, everything else from the engine.
///
/// The task ends once the engine has dropped its sinks or the connection is
/// gone.
pub(crate) fn spawn_dispatcher(
    internal: Weak<PeerConnectionInternal>,
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut local_rx: mpsc::UnboundedReceiver<RTCSignalingState>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                Some(state) = local_rx.recv() => {
                    let Some(internal) = internal.upgrade() else {
                        break;
                    };
                    internal.do_signaling_state_change(state).await;
                }
                event = engine_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let Some(internal) = internal.upgrade() else {
                        break;
                    };
                    internal.dispatch(event).await;
                }
            }
        }
        log::trace!("dispatcher exited");
    });
}

impl PeerConnectionInternal {
    pub(crate) async fn dispatch(self: &Arc<Self>, event: EngineEvent) {
        if self.lifecycle.is_closed() {
            log::debug!("dropping {} notification on closed connection", event.category());
            return;
        }

        match event {
            EngineEvent::ConnectionStateChange(state) => {
                self.do_peer_connection_state_change(state).await
            }
            EngineEvent::IceCandidate(candidate) => self.do_ice_candidate(candidate).await,
            EngineEvent::IceConnectionStateChange(state) => {
                self.do_ice_connection_state_change(state).await
            }
            EngineEvent::IceGatheringStateChange(state) => {
                self.do_ice_gathering_state_change(state).await
            }
            EngineEvent::SignalingStateChange(state) => {
                // Signaling is driven by local description calls.
                let current = self.signaling_state();
                if state != current {
                    log::debug!("engine reports signaling state {state}, connection is {current}");
                }
            }
            EngineEvent::Track(info) => self.do_track(info).await,
            EngineEvent::DataChannel(info) => self.do_data_channel(info).await,
            EngineEvent::NegotiationNeeded => self.trigger_negotiation_needed(),
            EngineEvent::BandwidthEstimate(bps) => self.do_bandwidth_estimate(bps).await,
        }
    }

    pub(crate) async fn do_signaling_state_change(&self, state: RTCSignalingState) {
        if self.lifecycle.is_closed() {
            return;
        }
        log::info!("signaling state changed to {state}");
        if let Some(handler) = &*self.handlers.on_signaling_state_change.load() {
            let mut f = handler.lock().await;
            f(state).await;
        }
    }

    async fn do_peer_connection_state_change(&self, state: RTCPeerConnectionState) {
        self.peer_connection_state.store(state as u8, Ordering::SeqCst);
        log::info!("peer connection state changed: {state}");

        if state == RTCPeerConnectionState::Connected {
            let data_channels = { self.data_channels.lock().await.clone() };
            for dc in data_channels {
                if dc.ready_state() == RTCDataChannelState::Connecting {
                    dc.do_open().await;
                }
            }
        }

        if let Some(handler) = &*self.handlers.on_peer_connection_state_change.load() {
            let mut f = handler.lock().await;
            f(state).await;
        }
    }

    async fn do_ice_connection_state_change(&self, state: RTCIceConnectionState) {
        self.ice_connection_state.store(state as u8, Ordering::SeqCst);
        log::info!("ICE connection state changed: {state}");
        if let Some(handler) = &*self.handlers.on_ice_connection_state_change.load() {
            let mut f = handler.lock().await;
            f(state).await;
        }
    }

    async fn do_ice_gathering_state_change(&self, state: RTCIceGatheringState) {
        self.ice_gathering_state.store(state as u8, Ordering::SeqCst);
        log::info!("ICE gathering state changed: {state}");
        if state == RTCIceGatheringState::Complete {
            self.resolve_gathering_complete().await;
        }
        if let Some(handler) = &*self.handlers.on_ice_gathering_state_change.load() {
            let mut f = handler.lock().await;
            f(state).await;
        }
    }

    async fn do_ice_candidate(&self, candidate: Option<RTCIceCandidateInit>) {
        if let Some(handler) = &*self.handlers.on_ice_candidate.load() {
            let mut f = handler.lock().await;
            f(candidate).await;
        } else {
            log::trace!("no on_ice_candidate handler, dropping {candidate:?}");
        }
    }

    async fn do_track(&self, info: RemoteTrackInfo) {
        let track = Arc::new(TrackRemote::new(&info));
        let receiver = Arc::new(RTCRtpReceiver::new(Arc::clone(&track)));
        let transceiver = RTCRtpTransceiver::new(
            info.kind,
            RTCRtpTransceiverDirection::Recvonly,
            None,
            Some(Arc::clone(&receiver)),
        );
        if let Some(mid) = &info.mid {
            transceiver.set_mid(mid.into());
        }
        {
            let mut transceivers = self.rtp_transceivers.lock().await;
            transceivers.push(Arc::clone(&transceiver));
        }

        log::debug!(
            "incoming {} track {} on {}",
            info.kind,
            info.id,
            receiver.handle()
        );
        if let Some(handler) = &*self.handlers.on_track.load() {
            let mut f = handler.lock().await;
            f(track, receiver, transceiver).await;
        } else {
            log::warn!("on_track unset, unable to handle incoming media streams");
        }
    }

    async fn do_data_channel(&self, info: RemoteDataChannelInfo) {
        let dc = Arc::new(RTCDataChannel::from_remote(
            info,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.data_channel_counters),
        ));
        self.data_channel_counters
            .accepted
            .fetch_add(1, Ordering::SeqCst);
        {
            let mut data_channels = self.data_channels.lock().await;
            data_channels.push(Arc::clone(&dc));
        }

        if let Some(handler) = &*self.handlers.on_data_channel.load() {
            let mut f = handler.lock().await;
            f(Arc::clone(&dc)).await;
        } else {
            log::warn!("on_data_channel unset, remote channel {} ignored", dc.label());
        }

        if self.peer_connection_state() == RTCPeerConnectionState::Connected {
            dc.do_open().await;
        }
    }

    async fn do_bandwidth_estimate(&self, bps: u64) {
        log::trace!("bandwidth estimate {bps} bps");
        if let Some(handler) = &*self.handlers.on_bandwidth_estimate.load() {
            let mut f = handler.lock().await;
            f(bps).await;
        }
    }
}
