
pub mod configuration;
pub mod dispatcher;
pub(crate) mod lifecycle;
pub mod offer_answer_options;
pub(crate) mod peer_connection_internal;
pub mod peer_connection_state;
pub mod policy;
pub mod sdp;
pub mod signaling_state;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};

use crate::data_channel::data_channel_init::RTCDataChannelInit;
use crate::data_channel::{RTCDataChannel, DATA_CHANNEL_STRING_LIMIT};
use crate::engine::MediaEngine;
use crate::error::{flatten_errs, Error, Result};
use crate::ice_transport::ice_candidate::RTCIceCandidateInit;
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::peer_connection::configuration::RTCConfiguration;
use crate::peer_connection::dispatcher::*;
use crate::peer_connection::lifecycle::ConnectionLifecycle;
use crate::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use crate::peer_connection::peer_connection_internal::PeerConnectionInternal;
use crate::peer_connection::peer_connection_state::RTCPeerConnectionState;
use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::sdp::session_description::{check_sdp_size, RTCSessionDescription};
use crate::peer_connection::signaling_state::{
    next_signaling_state, RTCSignalingState, StateChangeOp,
};
use crate::rtp_transceiver::rtp_codec::RTPCodecType;
use crate::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use crate::rtp_transceiver::rtp_sender::RTCRtpSender;
use crate::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use crate::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use crate::stats::{
    DataChannelStats, OutboundRTPStats, PeerConnectionStats, RTCStatsType, StatsCollector,
    StatsReport, StatsReportType, TransportStats,
};
use crate::track::track_local::TrackLocal;

/// PeerConnection represents a WebRTC connection that establishes a
/// peer-to-peer communications with another PeerConnection instance in a
/// browser, or to another endpoint implementing the required protocols.
///
/// Codecs, ICE and the secure transport are provided by a [`MediaEngine`];
/// the connection owns the engine's native connection, tracks the four state
/// dimensions and dispatches engine notifications to the handlers set with
/// the `on_*` methods.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCPeerConnection
/// [W3C]: https://w3c.github.io/webrtc-pc/#interface-definition
pub struct RTCPeerConnection {
    stats_id: String,
    configuration: RTCConfiguration,
    pub(crate) internal: Arc<PeerConnectionInternal>,
}

impl std::fmt::Debug for RTCPeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTCPeerConnection")
            .field("stats_id", &self.stats_id)
            .field("signaling_state", &self.signaling_state())
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

impl RTCPeerConnection {
    /// creates a PeerConnection with the given configuration. The
    /// configuration is validated before the engine is asked for anything.
    pub async fn new(
        engine: Arc<dyn MediaEngine>,
        configuration: RTCConfiguration,
    ) -> Result<Self> {
        configuration.validate()?;

        let handle = engine
            .create_connection(&configuration)
            .await
            .map_err(|err| Error::ErrConnectionCreationFailed(err.to_string()))?;

        // From here on the lifecycle owns the handle; dropping it on an
        // error path destroys the native connection.
        let lifecycle = Arc::new(ConnectionLifecycle::new(engine, handle));

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        lifecycle.register_callbacks(&engine_tx)?;
        // Only the registered sinks keep the channel open.
        drop(engine_tx);

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let internal = Arc::new(PeerConnectionInternal::new(lifecycle, local_tx));
        spawn_dispatcher(Arc::downgrade(&internal), engine_rx, local_rx);

        let stats_id = format!(
            "PeerConnection-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos())
        );
        log::debug!("created {stats_id} on {handle}");

        Ok(RTCPeerConnection {
            stats_id,
            configuration,
            internal,
        })
    }

    /// on_signaling_state_change sets an event handler which is invoked when the
    /// peer connection's signaling state changes
    pub fn on_signaling_state_change(&self, f: OnSignalingStateChangeHdlrFn) {
        self.internal
            .handlers
            .on_signaling_state_change
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_data_channel sets an event handler which is invoked when a data
    /// channel message arrives from a remote peer.
    pub fn on_data_channel(&self, f: OnDataChannelHdlrFn) {
        self.internal
            .handlers
            .on_data_channel
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_negotiation_needed sets an event handler which is invoked when
    /// a change has occurred which requires session negotiation
    pub fn on_negotiation_needed(&self, f: OnNegotiationNeededHdlrFn) {
        self.internal
            .handlers
            .on_negotiation_needed
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_ice_candidate sets an event handler which is invoked when a new ICE
    /// candidate is found.
    /// ICE candidate gathering only begins when SetLocalDescription or
    /// SetRemoteDescription is called.
    /// Take note that the handler will be called with a nil pointer when
    /// gathering is finished.
    pub fn on_ice_candidate(&self, f: OnLocalCandidateHdlrFn) {
        self.internal
            .handlers
            .on_ice_candidate
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_ice_gathering_state_change sets an event handler which is invoked when the
    /// ICE candidate gathering state has changed.
    pub fn on_ice_gathering_state_change(&self, f: OnICEGatheringStateChangeHdlrFn) {
        self.internal
            .handlers
            .on_ice_gathering_state_change
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_track sets an event handler which is called when remote track
    /// arrives from a remote peer.
    pub fn on_track(&self, f: OnTrackHdlrFn) {
        self.internal
            .handlers
            .on_track
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_ice_connection_state_change sets an event handler which is called
    /// when an ICE connection state is changed.
    pub fn on_ice_connection_state_change(&self, f: OnICEConnectionStateChangeHdlrFn) {
        self.internal
            .handlers
            .on_ice_connection_state_change
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_peer_connection_state_change sets an event handler which is called
    /// when the PeerConnectionState has changed
    pub fn on_peer_connection_state_change(&self, f: OnPeerConnectionStateChangeHdlrFn) {
        self.internal
            .handlers
            .on_peer_connection_state_change
            .store(Some(Arc::new(Mutex::new(f))));
    }

    pub fn on_bandwidth_estimate(&self, f: OnBandwidthEstimateHdlrFn) {
        self.internal
            .handlers
            .on_bandwidth_estimate
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// get_configuration returns a PeerConnection Configuration
    pub fn get_configuration(&self) -> &RTCConfiguration {
        &self.configuration
    }

    pub fn get_stats_id(&self) -> &str {
        self.stats_id.as_str()
    }

    /// create_offer starts the PeerConnection and generates the localDescription
    /// <https://w3c.github.io/webrtc-pc/#dom-rtcpeerconnection-createoffer>
    pub async fn create_offer(
        &self,
        options: Option<RTCOfferOptions>,
    ) -> Result<RTCSessionDescription> {
        let handle = self.internal.lifecycle.handle()?;
        let options = options.unwrap_or_default();

        let sdp = self
            .internal
            .lifecycle
            .engine()
            .create_offer(handle, &options)
            .await
            .map_err(|err| Error::ErrCreateOfferFailed(err.to_string()))?;

        if self.internal.lifecycle.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }
        let desc = RTCSessionDescription::offer(sdp)?;

        {
            let mut descriptions = self.internal.descriptions.lock().await;
            descriptions.last_offer.clone_from(&desc.sdp);
        }
        log::debug!("created offer of {} bytes", desc.sdp.len());

        Ok(desc)
    }

    /// create_answer starts the PeerConnection and generates the localDescription
    pub async fn create_answer(
        &self,
        options: Option<RTCAnswerOptions>,
    ) -> Result<RTCSessionDescription> {
        let handle = self.internal.lifecycle.handle()?;

        {
            let descriptions = self.internal.descriptions.lock().await;
            if descriptions.remote().is_none() {
                return Err(Error::ErrNoRemoteDescription);
            }
        }
        let signaling_state = self.signaling_state();
        if signaling_state != RTCSignalingState::HaveRemoteOffer
            && signaling_state != RTCSignalingState::HaveLocalPranswer
        {
            return Err(Error::ErrIncorrectSignalingState);
        }

        let options = options.unwrap_or_default();
        let sdp = self
            .internal
            .lifecycle
            .engine()
            .create_answer(handle, &options)
            .await
            .map_err(|err| Error::ErrCreateAnswerFailed(err.to_string()))?;

        if self.internal.lifecycle.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }
        let desc = RTCSessionDescription::answer(sdp)?;

        {
            let mut descriptions = self.internal.descriptions.lock().await;
            descriptions.last_answer.clone_from(&desc.sdp);
        }
        log::debug!("created answer of {} bytes", desc.sdp.len());

        Ok(desc)
    }

    /// set_description applies `desc` through the engine and commits the
    /// signaling transition. Only `description_ops` is held while the engine
    /// runs, so one description change completes before the next one reads
    /// the signaling state.
    async fn set_description(&self, desc: &RTCSessionDescription, op: StateChangeOp) -> Result<()> {
        let _ops = self.internal.description_ops.lock().await;
        let handle = self.internal.lifecycle.handle()?;
        check_sdp_size(&desc.sdp)?;

        let cur = self.signaling_state();
        let next = next_signaling_state(cur, op, desc.sdp_type)?;

        let engine = self.internal.lifecycle.engine();
        let result = match op {
            StateChangeOp::SetLocal => {
                engine
                    .set_local_description(handle, desc.sdp_type, &desc.sdp)
                    .await
            }
            StateChangeOp::SetRemote => {
                engine
                    .set_remote_description(handle, desc.sdp_type, &desc.sdp)
                    .await
            }
        };
        result.map_err(|err| Error::ErrSetDescriptionFailed(err.to_string()))?;

        if self.internal.lifecycle.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }

        if self
            .internal
            .signaling_state
            .compare_exchange(cur as u8, next as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("signaling state changed while applying {} {op}", desc.sdp_type);
            return Err(Error::ErrIncorrectSignalingState);
        }

        {
            let mut descriptions = self.internal.descriptions.lock().await;
            match (op, desc.sdp_type) {
                (StateChangeOp::SetLocal, RTCSdpType::Rollback) => {
                    descriptions.pending_local = None;
                }
                (StateChangeOp::SetRemote, RTCSdpType::Rollback) => {
                    descriptions.pending_remote = None;
                }
                (StateChangeOp::SetLocal, _) => descriptions.pending_local = Some(desc.clone()),
                (StateChangeOp::SetRemote, _) => {
                    descriptions.pending_remote = Some(desc.clone())
                }
            }
            if next == RTCSignalingState::Stable && desc.sdp_type != RTCSdpType::Rollback {
                descriptions.commit();
            }
        }

        log::debug!("{op}({}) moved signaling from {cur} to {next}", desc.sdp_type);
        if next != cur {
            self.internal.enqueue_signaling_state_change(next).await;
        }
        if next == RTCSignalingState::Stable {
            self.internal.on_signaling_stable();
        }

        Ok(())
    }

    /// set_local_description sets the SessionDescription of the local peer.
    /// An empty description of type offer or answer applies the last one
    /// this connection created.
    pub async fn set_local_description(&self, mut desc: RTCSessionDescription) -> Result<()> {
        if self.internal.lifecycle.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }

        // JSEP 5.4
        if desc.sdp.is_empty() && desc.sdp_type != RTCSdpType::Rollback {
            let descriptions = self.internal.descriptions.lock().await;
            desc.sdp = match desc.sdp_type {
                RTCSdpType::Answer | RTCSdpType::Pranswer => descriptions.last_answer.clone(),
                RTCSdpType::Offer => descriptions.last_offer.clone(),
                _ => return Err(Error::ErrPeerConnSDPTypeInvalidValueSetLocalDescription),
            };
            if desc.sdp.is_empty() {
                return Err(Error::ErrPeerConnSDPTypeInvalidValueSetLocalDescription);
            }
        }

        let is_rollback = desc.sdp_type == RTCSdpType::Rollback;
        self.set_description(&desc, StateChangeOp::SetLocal).await?;

        if !is_rollback {
            self.internal.start_gathering_once().await;
        }
        Ok(())
    }

    /// local_description returns PendingLocalDescription if it is not null and
    /// otherwise it returns CurrentLocalDescription.
    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.local().cloned()
    }

    /// set_remote_description sets the SessionDescription of the remote peer
    pub async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        if self.internal.lifecycle.is_closed() {
            return Err(Error::ErrConnectionClosed);
        }
        self.set_description(&desc, StateChangeOp::SetRemote).await
    }

    /// remote_description returns pending_remote_description if it is not null and
    /// otherwise it returns current_remote_description.
    pub async fn remote_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.remote().cloned()
    }

    /// current_local_description is the local description negotiated the
    /// last time the connection was stable.
    pub async fn current_local_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.current_local.clone()
    }

    /// pending_local_description is the local description of the
    /// negotiation in progress, if any.
    pub async fn pending_local_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.pending_local.clone()
    }

    pub async fn current_remote_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.current_remote.clone()
    }

    pub async fn pending_remote_description(&self) -> Option<RTCSessionDescription> {
        let descriptions = self.internal.descriptions.lock().await;
        descriptions.pending_remote.clone()
    }

    /// add_ice_candidate accepts an ICE candidate string and adds it
    /// to the existing set of candidates.
    pub async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        let handle = self.internal.lifecycle.handle()?;
        {
            let descriptions = self.internal.descriptions.lock().await;
            if descriptions.remote().is_none() {
                return Err(Error::ErrNoRemoteDescription);
            }
        }

        self.internal
            .lifecycle
            .engine()
            .add_ice_candidate(handle, &candidate)
            .await
            .map_err(|err| {
                log::warn!("rejected remote candidate {:?}: {err}", candidate.candidate);
                Error::ErrAddICECandidateFailed(err.to_string())
            })
    }

    /// ice_connection_state returns the ICE connection state of the
    /// PeerConnection instance.
    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.internal.ice_connection_state()
    }

    /// signaling_state attribute returns the signaling state of the
    /// PeerConnection instance.
    pub fn signaling_state(&self) -> RTCSignalingState {
        self.internal.signaling_state()
    }

    /// ice_gathering_state attribute returns the ICE gathering state of the
    /// PeerConnection instance.
    pub fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.internal.ice_gathering_state()
    }

    /// connection_state attribute returns the connection state of the
    /// PeerConnection instance.
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.internal.peer_connection_state()
    }

    /// get_senders returns the RTPSenders that are currently attached to this PeerConnection
    pub async fn get_senders(&self) -> Vec<Arc<RTCRtpSender>> {
        let mut senders = vec![];
        let rtp_transceivers = { self.internal.rtp_transceivers.lock().await.clone() };
        for transceiver in rtp_transceivers {
            if let Some(sender) = transceiver.sender().await {
                if !sender.is_stopped() {
                    senders.push(sender);
                }
            }
        }
        senders
    }

    /// get_receivers returns the RTPReceivers that are currently attached to this PeerConnection
    pub async fn get_receivers(&self) -> Vec<Arc<RTCRtpReceiver>> {
        let mut receivers = vec![];
        let rtp_transceivers = { self.internal.rtp_transceivers.lock().await.clone() };
        for transceiver in rtp_transceivers {
            if let Some(receiver) = transceiver.receiver().await {
                receivers.push(receiver);
            }
        }
        receivers
    }

    /// get_transceivers returns the RtpTransceiver that are currently attached to this PeerConnection
    pub async fn get_transceivers(&self) -> Vec<Arc<RTCRtpTransceiver>> {
        let rtp_transceivers = self.internal.rtp_transceivers.lock().await;
        rtp_transceivers.clone()
    }

    /// add_track adds a Track to the PeerConnection. The engine creates a
    /// capture source for the track's kind and a sender fed by it; the track
    /// is bound to the sender before this returns.
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>> {
        let lifecycle = &self.internal.lifecycle;
        let handle = lifecycle.handle()?;
        let engine = Arc::clone(lifecycle.engine());
        let kind = track.kind();

        let source = engine
            .create_track_source(handle, kind)
            .await
            .map_err(|err| Error::ErrTrackSourceFailed(err.to_string()))?;

        let sender_handle = match engine
            .add_track_from_source(handle, source, track.id(), track.stream_id())
            .await
        {
            Ok(sender_handle) => sender_handle,
            Err(err) => {
                engine.release_track_source(handle, source);
                return Err(Error::ErrTrackSourceFailed(err.to_string()));
            }
        };

        let sender = match RTCRtpSender::new(
            sender_handle,
            source,
            Arc::clone(&track),
            Arc::clone(lifecycle),
        )
        .await
        {
            Ok(sender) => Arc::new(sender),
            Err(err) => {
                if let Err(remove_err) = engine.remove_track(handle, sender_handle).await {
                    log::warn!("failed to remove {sender_handle} after bind error: {remove_err}");
                }
                engine.release_track_source(handle, source);
                return Err(err);
            }
        };

        let transceiver = RTCRtpTransceiver::new(
            kind,
            RTCRtpTransceiverDirection::Sendrecv,
            Some(Arc::clone(&sender)),
            None,
        );
        transceiver.set_mid(self.internal.next_mid());
        {
            let mut rtp_transceivers = self.internal.rtp_transceivers.lock().await;
            rtp_transceivers.push(Arc::clone(&transceiver));
        }

        // close() may have run while the engine calls were in flight and
        // missed this transceiver.
        if lifecycle.is_closed() {
            transceiver.teardown().await?;
            return Err(Error::ErrConnectionClosed);
        }

        log::debug!("added {kind} track {} as {}", track.id(), sender.id());
        self.internal.trigger_negotiation_needed();

        Ok(sender)
    }

    /// remove_track removes a Track from the PeerConnection
    pub async fn remove_track(&self, sender: &Arc<RTCRtpSender>) -> Result<()> {
        self.internal.lifecycle.handle()?;

        let mut transceiver = None;
        {
            let rtp_transceivers = self.internal.rtp_transceivers.lock().await;
            for t in &*rtp_transceivers {
                if let Some(s) = t.sender().await {
                    if Arc::ptr_eq(&s, sender) {
                        transceiver = Some(Arc::clone(t));
                        break;
                    }
                }
            }
        }
        let Some(transceiver) = transceiver else {
            return Err(Error::ErrSenderNotCreatedByConnection);
        };

        if sender.is_stopped() {
            return Ok(());
        }
        sender.stop().await?;

        let direction = if transceiver.direction().has_recv() {
            RTCRtpTransceiverDirection::Recvonly
        } else {
            RTCRtpTransceiverDirection::Inactive
        };
        transceiver.set_direction_internal(direction);

        self.internal.trigger_negotiation_needed();
        Ok(())
    }

    /// add_transceiver_from_kind Create a new RtpTransceiver and adds it to the
    /// set of transceivers. No track is attached.
    pub async fn add_transceiver_from_kind(
        &self,
        kind: RTPCodecType,
        init: Option<RTCRtpTransceiverInit>,
    ) -> Result<Arc<RTCRtpTransceiver>> {
        let handle = self.internal.lifecycle.handle()?;
        if kind == RTPCodecType::Unspecified {
            return Err(Error::ErrTransceiverKindUnspecified);
        }
        let direction = init.unwrap_or_default().direction;

        self.internal
            .lifecycle
            .engine()
            .add_transceiver(handle, kind, direction)
            .await
            .map_err(|err| Error::ErrAddTransceiverFailed(err.to_string()))?;

        let transceiver = RTCRtpTransceiver::new(kind, direction, None, None);
        transceiver.set_mid(self.internal.next_mid());
        {
            let mut rtp_transceivers = self.internal.rtp_transceivers.lock().await;
            rtp_transceivers.push(Arc::clone(&transceiver));
        }

        self.internal.trigger_negotiation_needed();
        Ok(transceiver)
    }

    /// create_data_channel creates a new DataChannel object with the given label
    /// and optional DataChannelInit used to configure properties of the
    /// underlying channel such as data reliability.
    pub async fn create_data_channel(
        &self,
        label: &str,
        options: Option<RTCDataChannelInit>,
    ) -> Result<Arc<RTCDataChannel>> {
        let handle = self.internal.lifecycle.handle()?;
        let init = options.unwrap_or_default();

        // https://w3c.github.io/webrtc-pc/#peer-to-peer-data-api (Step #4)
        if label.len() > DATA_CHANNEL_STRING_LIMIT {
            return Err(Error::ErrStringSizeLimit);
        }
        // https://w3c.github.io/webrtc-pc/#peer-to-peer-data-api (Step #12)
        if init
            .protocol
            .as_ref()
            .is_some_and(|p| p.len() > DATA_CHANNEL_STRING_LIMIT)
        {
            return Err(Error::ErrProtocolTooLarge);
        }

        let dc_handle = self
            .internal
            .lifecycle
            .engine()
            .create_data_channel(handle, label, &init)
            .await
            .map_err(|err| Error::ErrDataChannelCreationFailed(err.to_string()))?;

        let counters = Arc::clone(&self.internal.data_channel_counters);
        counters.requested.fetch_add(1, Ordering::SeqCst);
        let dc = Arc::new(RTCDataChannel::new(
            label.to_owned(),
            &init,
            dc_handle,
            Arc::clone(&self.internal.lifecycle),
            counters,
        ));

        let first = {
            let mut data_channels = self.internal.data_channels.lock().await;
            data_channels.push(Arc::clone(&dc));
            data_channels.len() == 1
        };

        if self.connection_state() == RTCPeerConnectionState::Connected {
            dc.do_open().await;
        }

        // https://w3c.github.io/webrtc-pc/#peer-to-peer-data-api (Step #19)
        if first {
            self.internal.trigger_negotiation_needed();
        }

        Ok(dc)
    }

    /// gathering_complete_promise returns a channel that is closed when
    /// gathering is complete. Useful when candidates cannot be trickled.
    pub async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        self.internal.gathering_complete_promise().await
    }

    /// get_stats return data providing statistics about the overall connection
    pub async fn get_stats(&self) -> Result<StatsReport> {
        let handle = self.internal.lifecycle.handle()?;
        let engine_stats = self
            .internal
            .lifecycle
            .engine()
            .get_stats(handle)
            .await
            .map_err(|err| Error::ErrStatsFailed(err.to_string()))?;

        let mut collector = StatsCollector::new();
        let counters = &self.internal.data_channel_counters;
        collector.insert(
            self.stats_id.clone(),
            StatsReportType::PeerConnection(PeerConnectionStats {
                timestamp: crate::stats::timestamp_millis(),
                stats_type: RTCStatsType::PeerConnection,
                id: self.stats_id.clone(),
                data_channels_closed: counters.closed.load(Ordering::SeqCst),
                data_channels_opened: counters.opened.load(Ordering::SeqCst),
                data_channels_accepted: counters.accepted.load(Ordering::SeqCst),
                data_channels_requested: counters.requested.load(Ordering::SeqCst),
            }),
        );

        let transport_id = format!("Transport-{}", handle.0);
        collector.insert(
            transport_id.clone(),
            StatsReportType::Transport(TransportStats::new(transport_id, engine_stats)),
        );

        let rtp_transceivers = { self.internal.rtp_transceivers.lock().await.clone() };
        for transceiver in rtp_transceivers {
            let Some(sender) = transceiver.sender().await else {
                continue;
            };
            let track_identifier = match sender.track().await {
                Some(track) => track.id().to_owned(),
                None => String::new(),
            };
            let header_bytes_sent = sender.header_bytes_sent();
            let bytes_sent = sender.counters.bytes_sent.load(Ordering::SeqCst);
            collector.insert(
                sender.id().to_owned(),
                StatsReportType::OutboundRTP(OutboundRTPStats {
                    timestamp: crate::stats::timestamp_millis(),
                    stats_type: RTCStatsType::OutboundRTP,
                    id: sender.id().to_owned(),
                    ssrc: sender.ssrc(),
                    kind: sender.kind().to_string(),
                    packets_sent: sender.counters.packets_sent.load(Ordering::SeqCst),
                    bytes_sent: bytes_sent.saturating_sub(header_bytes_sent),
                    header_bytes_sent,
                    frames_sent: sender.counters.frames_sent.load(Ordering::SeqCst),
                    track_identifier,
                    mid: transceiver.mid(),
                }),
            );
        }

        let data_channels = { self.internal.data_channels.lock().await.clone() };
        for dc in data_channels {
            let stats = DataChannelStats::from(&dc);
            collector.insert(stats.id.clone(), StatsReportType::DataChannel(stats));
        }

        Ok(collector.into_report())
    }

    /// close ends the PeerConnection. Callbacks are unregistered before the
    /// engine closes and destroys the native connection, so no handler runs
    /// once this has started. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let lifecycle = &self.internal.lifecycle;

        // https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-close (step #1, #2)
        if !lifecycle.try_claim_close() {
            return Ok(());
        }
        let handle = lifecycle.raw_handle();
        log::debug!("closing {handle}");

        let mut close_errs = vec![];

        lifecycle.unregister_callbacks(handle);
        self.internal.close_local_notifications().await;

        // https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-close (step #3)
        self.internal
            .signaling_state
            .store(RTCSignalingState::Closed as u8, Ordering::SeqCst);

        // https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-close (step #4)
        {
            let rtp_transceivers = { self.internal.rtp_transceivers.lock().await.clone() };
            for t in rtp_transceivers {
                if let Err(err) = t.teardown().await {
                    close_errs.push(Error::new(format!("rtp_transceivers: {err}")));
                }
            }
        }

        // https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-close (step #5)
        {
            let data_channels = { self.internal.data_channels.lock().await.clone() };
            for dc in data_channels {
                dc.mark_closed();
            }
        }

        if let Err(err) = lifecycle.release(handle).await {
            close_errs.push(err);
        }

        self.internal
            .ice_connection_state
            .store(RTCIceConnectionState::Closed as u8, Ordering::SeqCst);
        self.internal
            .ice_gathering_state
            .store(RTCIceGatheringState::Complete as u8, Ordering::SeqCst);
        self.internal
            .peer_connection_state
            .store(RTCPeerConnectionState::Closed as u8, Ordering::SeqCst);
        self.internal.resolve_gathering_complete().await;

        lifecycle.clear_handle();
        log::info!("{} closed", self.stats_id);

        flatten_errs(close_errs)
    }
}
