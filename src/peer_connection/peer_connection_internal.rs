use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use portable_atomic::{AtomicBool, AtomicU8, AtomicUsize};
use smol_str::SmolStr;
use tokio::sync::{mpsc, Mutex};

use crate::data_channel::{DataChannelCounters, RTCDataChannel};
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::peer_connection::dispatcher::PeerConnectionHandlers;
use crate::peer_connection::lifecycle::ConnectionLifecycle;
use crate::peer_connection::peer_connection_state::{
    NegotiationNeededState, RTCPeerConnectionState,
};
use crate::peer_connection::sdp::session_description::RTCSessionDescription;
use crate::peer_connection::signaling_state::RTCSignalingState;
use crate::rtp_transceiver::RTCRtpTransceiver;

/// Session descriptions of the current and the in-progress negotiation.
#[derive(Debug, Default)]
pub(crate) struct Descriptions {
    pub(crate) pending_local: Option<RTCSessionDescription>,
    pub(crate) current_local: Option<RTCSessionDescription>,
    pub(crate) pending_remote: Option<RTCSessionDescription>,
    pub(crate) current_remote: Option<RTCSessionDescription>,
    pub(crate) last_offer: String,
    pub(crate) last_answer: String,
}

impl Descriptions {
    pub(crate) fn local(&self) -> Option<&RTCSessionDescription> {
        self.pending_local.as_ref().or(self.current_local.as_ref())
    }

    pub(crate) fn remote(&self) -> Option<&RTCSessionDescription> {
        self.pending_remote.as_ref().or(self.current_remote.as_ref())
    }

    /// commit moves both pending descriptions to current once signaling is
    /// stable again.
    pub(crate) fn commit(&mut self) {
        if let Some(local) = self.pending_local.take() {
            self.current_local = Some(local);
        }
        if let Some(remote) = self.pending_remote.take() {
            self.current_remote = Some(remote);
        }
    }
}

/// State shared by an `RTCPeerConnection`, its dispatcher task and the
/// negotiation-needed operations it spawns.
pub(crate) struct PeerConnectionInternal {
    pub(crate) lifecycle: Arc<ConnectionLifecycle>,

    pub(crate) signaling_state: AtomicU8,
    pub(crate) ice_connection_state: AtomicU8,
    pub(crate) ice_gathering_state: AtomicU8,
    pub(crate) peer_connection_state: AtomicU8,
    gathering_started: AtomicBool,

    pub(crate) descriptions: Mutex<Descriptions>,
    /// Serializes description changes across their engine call. Never held
    /// together with the other locks.
    pub(crate) description_ops: Mutex<()>,
    pub(crate) rtp_transceivers: Mutex<Vec<Arc<RTCRtpTransceiver>>>,
    pub(crate) data_channels: Mutex<Vec<Arc<RTCDataChannel>>>,
    pub(crate) data_channel_counters: Arc<DataChannelCounters>,
    next_mid: AtomicUsize,

    negotiation_needed_state: AtomicU8,
    is_negotiation_needed: AtomicBool,
    /// a notification was held back because signaling was not stable
    negotiation_pending: AtomicBool,

    pub(crate) handlers: PeerConnectionHandlers,
    local_tx: Mutex<Option<mpsc::UnboundedSender<RTCSignalingState>>>,
    gathering_complete_txs: Mutex<Vec<mpsc::Sender<()>>>,
}

impl PeerConnectionInternal {
    pub(crate) fn new(
        lifecycle: Arc<ConnectionLifecycle>,
        local_tx: mpsc::UnboundedSender<RTCSignalingState>,
    ) -> Self {
        PeerConnectionInternal {
            lifecycle,
            signaling_state: AtomicU8::new(RTCSignalingState::Stable as u8),
            ice_connection_state: AtomicU8::new(RTCIceConnectionState::New as u8),
            ice_gathering_state: AtomicU8::new(RTCIceGatheringState::New as u8),
            peer_connection_state: AtomicU8::new(RTCPeerConnectionState::New as u8),
            gathering_started: AtomicBool::new(false),
            descriptions: Mutex::new(Descriptions::default()),
            description_ops: Mutex::new(()),
            rtp_transceivers: Mutex::new(vec![]),
            data_channels: Mutex::new(vec![]),
            data_channel_counters: Arc::new(DataChannelCounters::default()),
            next_mid: AtomicUsize::new(0),
            negotiation_needed_state: AtomicU8::new(NegotiationNeededState::Empty as u8),
            is_negotiation_needed: AtomicBool::new(false),
            negotiation_pending: AtomicBool::new(false),
            handlers: PeerConnectionHandlers::default(),
            local_tx: Mutex::new(Some(local_tx)),
            gathering_complete_txs: Mutex::new(vec![]),
        }
    }

    pub(crate) fn signaling_state(&self) -> RTCSignalingState {
        self.signaling_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.ice_connection_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.ice_gathering_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn peer_connection_state(&self) -> RTCPeerConnectionState {
        self.peer_connection_state.load(Ordering::SeqCst).into()
    }

    /// Allocates the mid of the next locally created transceiver.
    pub(crate) fn next_mid(&self) -> SmolStr {
        SmolStr::from(self.next_mid.fetch_add(1, Ordering::SeqCst).to_string())
    }

    /// Queues a signaling notification behind any engine notification
    /// already waiting in the dispatcher.
    pub(crate) async fn enqueue_signaling_state_change(&self, state: RTCSignalingState) {
        let local_tx = self.local_tx.lock().await;
        if let Some(tx) = &*local_tx {
            if tx.send(state).is_err() {
                log::debug!("dispatcher gone, signaling state {state} not delivered");
            }
        }
    }

    pub(crate) async fn close_local_notifications(&self) {
        self.local_tx.lock().await.take();
    }

    /// Starts candidate gathering the first time a local description is
    /// applied. Gathering failures surface through the gathering state, not
    /// to the caller.
    pub(crate) async fn start_gathering_once(&self) {
        if self.gathering_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = self.lifecycle.handle() else {
            return;
        };
        if let Err(err) = self.lifecycle.engine().gather_candidates(handle).await {
            log::warn!("failed to start candidate gathering on {handle}: {err}");
        }
    }

    pub(crate) async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut txs = self.gathering_complete_txs.lock().await;
        // The state is stored before resolve takes this lock, so a promise
        // created after completion is resolved right here.
        if self.ice_gathering_state() == RTCIceGatheringState::Complete
            || self.lifecycle.is_closed()
        {
            drop(tx);
        } else {
            txs.push(tx);
        }
        rx
    }

    pub(crate) async fn resolve_gathering_complete(&self) {
        let mut txs = self.gathering_complete_txs.lock().await;
        txs.clear();
    }

    /// Called whenever signaling returns to stable.
    pub(crate) fn on_signaling_stable(self: &Arc<Self>) {
        self.is_negotiation_needed.store(false, Ordering::SeqCst);
        if self.negotiation_pending.swap(false, Ordering::SeqCst) {
            self.trigger_negotiation_needed();
        }
    }

    fn do_negotiation_needed_inner(&self) -> bool {
        // https://w3c.github.io/webrtc-pc/#updating-the-negotiation-needed-flag
        // non-canon step 1
        let state: NegotiationNeededState =
            self.negotiation_needed_state.load(Ordering::SeqCst).into();
        match state {
            NegotiationNeededState::Run => {
                self.negotiation_needed_state
                    .store(NegotiationNeededState::Queue as u8, Ordering::SeqCst);
                false
            }
            NegotiationNeededState::Queue => false,
            NegotiationNeededState::Empty => {
                self.negotiation_needed_state
                    .store(NegotiationNeededState::Run as u8, Ordering::SeqCst);
                true
            }
        }
    }

    /// trigger_negotiation_needed schedules a negotiation-needed check unless
    /// one is already running, in which case a single rerun is queued.
    pub(crate) fn trigger_negotiation_needed(self: &Arc<Self>) {
        if !self.do_negotiation_needed_inner() {
            return;
        }

        let internal: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(internal) = internal.upgrade() else {
                    break;
                };
                if !internal.negotiation_needed_op().await {
                    break;
                }
            }
        });
    }

    fn after_negotiation_needed_op(&self) -> bool {
        let old_state = self.negotiation_needed_state.swap(
            NegotiationNeededState::Empty as u8,
            Ordering::SeqCst,
        );
        if old_state == NegotiationNeededState::Queue as u8 {
            self.do_negotiation_needed_inner()
        } else {
            false
        }
    }

    /// Returns true when the op has to run again.
    async fn negotiation_needed_op(&self) -> bool {
        // Step 2.1
        if self.lifecycle.is_closed() {
            self.negotiation_needed_state
                .store(NegotiationNeededState::Empty as u8, Ordering::SeqCst);
            return false;
        }

        // Step 2.3
        if self.signaling_state() != RTCSignalingState::Stable {
            self.negotiation_pending.store(true, Ordering::SeqCst);
            return self.after_negotiation_needed_op();
        }

        // Step 2.5
        if self.is_negotiation_needed.load(Ordering::SeqCst) {
            return self.after_negotiation_needed_op();
        }

        let handler = self.handlers.on_negotiation_needed.load_full();
        let Some(handler) = handler else {
            log::trace!("negotiation needed, no handler set");
            return self.after_negotiation_needed_op();
        };

        // Step 2.6
        self.is_negotiation_needed.store(true, Ordering::SeqCst);

        // Step 2.7
        log::debug!("negotiation needed");
        {
            let mut f = handler.lock().await;
            f().await;
        }

        self.after_negotiation_needed_op()
    }
}
