//! An in-process [`MediaEngine`] with no network underneath.
//!
//! `LoopbackEngine` writes and reads a small SDP dialect (just enough lines
//! for two instances to negotiate with each other), pretends ICE succeeds as
//! soon as an answer is applied and "encodes" frames by copying a
//! bitrate-bounded prefix of the raw input. Every primitive call is counted
//! and logged so tests can assert on exactly what the core asked for.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use portable_atomic::AtomicUsize;

use super::*;
use crate::stats::EngineStats;

/// Largest Opus packet (RFC 6716, section 3.2.1).
pub const OPUS_MAX_PACKET_SIZE: usize = 1275;

const DEFAULT_MAX_VIDEO_OUTPUT_SIZE: usize = 100_000;

/// LoopbackEngineConfig tunes the encoder model and injects failures.
#[derive(Debug, Clone)]
pub struct LoopbackEngineConfig {
    /// Worst-case encoded video frame.
    pub max_video_output_size: usize,
    /// Worst-case encoded audio frame.
    pub max_audio_output_size: usize,
    /// Bytes of filler appended to every generated description.
    pub sdp_padding: usize,
    /// write_rtp fails once this many packets have been written.
    pub fail_write_after: Option<usize>,
    /// create_encoder fails.
    pub fail_encoder_creation: bool,
    /// close_data_channel fails.
    pub fail_data_channel_close: bool,
    /// set_local_description and set_remote_description wait this long
    /// before applying, like an engine doing real work.
    pub description_delay: Option<Duration>,
}

impl Default for LoopbackEngineConfig {
    fn default() -> Self {
        LoopbackEngineConfig {
            max_video_output_size: DEFAULT_MAX_VIDEO_OUTPUT_SIZE,
            max_audio_output_size: OPUS_MAX_PACKET_SIZE,
            sdp_padding: 0,
            fail_write_after: None,
            fail_encoder_creation: false,
            fail_data_channel_close: false,
            description_delay: None,
        }
    }
}

#[derive(Debug)]
struct LocalSender {
    handle: SenderHandle,
    kind: RTPCodecType,
    track_id: String,
    stream_id: String,
}

#[derive(Debug)]
struct LocalTransceiver {
    kind: RTPCodecType,
    direction: RTCRtpTransceiverDirection,
}

#[derive(Debug)]
struct LocalDataChannel {
    handle: DataChannelHandle,
    label: String,
    ordered: bool,
    max_retransmits: Option<u16>,
    protocol: String,
    closed: bool,
}

#[derive(Debug, Default)]
struct ConnectionEntry {
    closed: bool,
    destroyed: bool,
    sinks: HashMap<CallbackCategory, EventSink>,
    sources: HashMap<SourceHandle, RTPCodecType>,
    senders: Vec<LocalSender>,
    transceivers: Vec<LocalTransceiver>,
    data_channels: Vec<LocalDataChannel>,
    local: Option<(RTCSdpType, String)>,
    remote: Option<(RTCSdpType, String)>,
    remote_candidates: Vec<String>,
    connected: bool,
    stats: EngineStats,
}

impl ConnectionEntry {
    fn sink(&self, category: CallbackCategory) -> Option<EventSink> {
        self.sinks.get(&category).cloned()
    }

    fn queue(&self, events: &mut Vec<(EventSink, EngineEvent)>, event: EngineEvent) {
        match self.sink(event.category()) {
            Some(sink) => events.push((sink, event)),
            None => log::trace!("no sink registered for {}", event.category()),
        }
    }

    fn has_media(&self) -> bool {
        !self.senders.is_empty() || !self.transceivers.is_empty() || !self.data_channels.is_empty()
    }
}

#[derive(Debug)]
struct EncoderEntry {
    kind: RTPCodecType,
    max_output_size: usize,
    bitrate: u32,
    framerate: u32,
    frames: u64,
    keyframe_requested: bool,
}

#[derive(Debug, Default)]
struct LoopbackInternal {
    next_handle: u64,
    connections: HashMap<ConnectionHandle, ConnectionEntry>,
    encoders: HashMap<EncoderHandle, EncoderEntry>,
    op_log: Vec<String>,
    packets_written: usize,
}

impl LoopbackInternal {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn connection(&mut self, handle: ConnectionHandle) -> EngineResult<&mut ConnectionEntry> {
        match self.connections.get_mut(&handle) {
            Some(c) if c.destroyed => Err(EngineError::UnknownHandle),
            Some(c) if c.closed => Err(EngineError::InvalidState("connection closed".to_owned())),
            Some(c) => Ok(c),
            None => Err(EngineError::UnknownHandle),
        }
    }
}

/// LoopbackEngine is a [`MediaEngine`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct LoopbackEngine {
    config: LoopbackEngineConfig,
    calls: AtomicUsize,
    internal: Mutex<LoopbackInternal>,
}

impl LoopbackEngine {
    pub fn new(config: LoopbackEngineConfig) -> Self {
        LoopbackEngine {
            config,
            calls: AtomicUsize::new(0),
            internal: Mutex::new(LoopbackInternal::default()),
        }
    }

    /// call_count is the number of primitives invoked so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// op_log lists the primitives invoked so far, oldest first.
    pub fn op_log(&self) -> Vec<String> {
        self.internal.lock().op_log.clone()
    }

    pub fn registered_callback_count(&self, handle: ConnectionHandle) -> usize {
        self.internal
            .lock()
            .connections
            .get(&handle)
            .map_or(0, |c| c.sinks.len())
    }

    pub fn is_destroyed(&self, handle: ConnectionHandle) -> bool {
        self.internal
            .lock()
            .connections
            .get(&handle)
            .map_or(true, |c| c.destroyed)
    }

    /// live_encoders counts encoders created and not yet destroyed.
    pub fn live_encoders(&self) -> usize {
        self.internal.lock().encoders.len()
    }

    /// live_sources counts track sources not yet released on `handle`.
    pub fn live_sources(&self, handle: ConnectionHandle) -> usize {
        self.internal
            .lock()
            .connections
            .get(&handle)
            .map_or(0, |c| c.sources.len())
    }

    /// remote_description is the SDP text last applied with
    /// set_remote_description on `handle`.
    pub fn remote_description(&self, handle: ConnectionHandle) -> Option<String> {
        self.internal
            .lock()
            .connections
            .get(&handle)
            .and_then(|c| c.remote.as_ref().map(|(_, sdp)| sdp.clone()))
    }

    pub fn remote_candidates(&self, handle: ConnectionHandle) -> Vec<String> {
        self.internal
            .lock()
            .connections
            .get(&handle)
            .map_or_else(Vec::new, |c| c.remote_candidates.clone())
    }

    fn record(&self, internal: &mut LoopbackInternal, op: String) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        log::trace!("loopback: {op}");
        internal.op_log.push(op);
    }

    fn emit(events: Vec<(EventSink, EngineEvent)>) {
        for (sink, event) in events {
            if !sink.emit(event) {
                log::debug!("loopback: {} event dropped, receiver gone", sink.category());
            }
        }
    }

    fn write_description(&self, handle: ConnectionHandle, entry: &ConnectionEntry, answer: bool) -> String {
        let mut sdp = String::new();
        let _ = writeln!(sdp, "v=0");
        let _ = writeln!(sdp, "o=- {} 2 IN IP4 127.0.0.1", handle.0);
        let _ = writeln!(sdp, "s=-");
        let _ = writeln!(sdp, "t=0 0");

        if answer {
            // Mirror the offer's sections, attaching local senders by kind.
            let remote = entry.remote.as_ref().map(|(_, s)| s.as_str()).unwrap_or_default();
            let mut unused: Vec<&LocalSender> = entry.senders.iter().collect();
            for section in parse_sections(remote) {
                match section.kind.as_str() {
                    "application" => {
                        write_application_section(&mut sdp, &section.mid, &[]);
                    }
                    kind => {
                        let kind = RTPCodecType::from(kind);
                        let sender = unused
                            .iter()
                            .position(|s| s.kind == kind)
                            .map(|i| unused.remove(i));
                        let direction = answer_direction(section.direction, sender.is_some());
                        write_media_section(&mut sdp, kind, &section.mid, direction, sender);
                    }
                }
            }
        } else {
            let mut mid = 0usize;
            for sender in &entry.senders {
                write_media_section(
                    &mut sdp,
                    sender.kind,
                    &mid.to_string(),
                    RTCRtpTransceiverDirection::Sendrecv,
                    Some(sender),
                );
                mid += 1;
            }
            for t in &entry.transceivers {
                write_media_section(&mut sdp, t.kind, &mid.to_string(), t.direction, None);
                mid += 1;
            }
            let open: Vec<&LocalDataChannel> =
                entry.data_channels.iter().filter(|dc| !dc.closed).collect();
            if !open.is_empty() {
                write_application_section(&mut sdp, &mid.to_string(), &open);
            }
        }

        if self.config.sdp_padding > 0 {
            let _ = writeln!(sdp, "a=x-padding:{}", "x".repeat(self.config.sdp_padding));
        }
        sdp
    }
}

/// Direction an answerer uses for an offered section.
fn answer_direction(
    offered: RTCRtpTransceiverDirection,
    has_sender: bool,
) -> RTCRtpTransceiverDirection {
    match (offered.has_recv() && has_sender, offered.has_send()) {
        (true, true) => RTCRtpTransceiverDirection::Sendrecv,
        (true, false) => RTCRtpTransceiverDirection::Sendonly,
        (false, true) => RTCRtpTransceiverDirection::Recvonly,
        (false, false) => RTCRtpTransceiverDirection::Inactive,
    }
}

fn write_media_section(
    sdp: &mut String,
    kind: RTPCodecType,
    mid: &str,
    direction: RTCRtpTransceiverDirection,
    sender: Option<&LocalSender>,
) {
    let (pt, rtpmap) = match kind {
        RTPCodecType::Audio => (111, "opus/48000/2"),
        _ => (96, "VP8/90000"),
    };
    let _ = writeln!(sdp, "m={kind} 9 UDP/TLS/RTP/SAVPF {pt}");
    let _ = writeln!(sdp, "a=mid:{mid}");
    let _ = writeln!(sdp, "a={direction}");
    let _ = writeln!(sdp, "a=rtpmap:{pt} {rtpmap}");
    if let Some(sender) = sender {
        let _ = writeln!(sdp, "a=msid:{} {}", sender.stream_id, sender.track_id);
    }
}

fn write_application_section(sdp: &mut String, mid: &str, channels: &[&LocalDataChannel]) {
    let _ = writeln!(sdp, "m=application 9 UDP/DTLS/SCTP webrtc-datachannel");
    let _ = writeln!(sdp, "a=mid:{mid}");
    for dc in channels {
        let max_retransmits = dc
            .max_retransmits
            .map_or_else(|| "-".to_owned(), |n| n.to_string());
        let protocol = if dc.protocol.is_empty() { "-" } else { dc.protocol.as_str() };
        let _ = writeln!(
            sdp,
            "a=x-dc:{} {} {} {}",
            u8::from(dc.ordered),
            max_retransmits,
            protocol,
            dc.label
        );
    }
}

#[derive(Debug, Default)]
struct Section {
    kind: String,
    mid: String,
    direction: RTCRtpTransceiverDirection,
    msid: Option<(String, String)>,
    channels: Vec<(bool, Option<u16>, String, String)>,
}

fn parse_sections(sdp: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = vec![];
    for line in sdp.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("m=") {
            sections.push(Section {
                kind: rest.split_whitespace().next().unwrap_or_default().to_owned(),
                ..Default::default()
            });
            continue;
        }
        let Some(section) = sections.last_mut() else {
            continue;
        };
        if let Some(mid) = line.strip_prefix("a=mid:") {
            section.mid = mid.to_owned();
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut fields = msid.splitn(2, ' ');
            if let (Some(stream), Some(track)) = (fields.next(), fields.next()) {
                section.msid = Some((stream.to_owned(), track.to_owned()));
            }
        } else if let Some(dc) = line.strip_prefix("a=x-dc:") {
            let fields: Vec<&str> = dc.splitn(4, ' ').collect();
            if let [ordered, max_retransmits, protocol, label] = fields[..] {
                let protocol = if protocol == "-" { "" } else { protocol };
                section.channels.push((
                    ordered == "1",
                    max_retransmits.parse().ok(),
                    protocol.to_owned(),
                    label.to_owned(),
                ));
            }
        } else if let Some(attr) = line.strip_prefix("a=") {
            let direction = RTCRtpTransceiverDirection::from(attr);
            if direction != RTCRtpTransceiverDirection::Unspecified {
                section.direction = direction;
            }
        }
    }
    sections
}

fn validate_description(sdp: &str) -> EngineResult<()> {
    if !sdp.starts_with("v=0") {
        return Err(EngineError::InvalidArgument(
            "description does not start with v=0".to_owned(),
        ));
    }
    Ok(())
}

/// Checks the attribute grammar of RFC 8839 section 5.1, up to `typ`.
fn validate_candidate(candidate: &str) -> EngineResult<()> {
    let candidate = candidate.strip_prefix("candidate:").unwrap_or(candidate);
    let fields: Vec<&str> = candidate.split_whitespace().collect();
    let malformed = |what: &str| EngineError::InvalidArgument(format!("malformed candidate: {what}"));

    if fields.len() < 8 {
        return Err(malformed("too few fields"));
    }
    fields[1].parse::<u16>().map_err(|_| malformed("component"))?;
    if !fields[2].eq_ignore_ascii_case("udp") && !fields[2].eq_ignore_ascii_case("tcp") {
        return Err(malformed("transport"));
    }
    fields[3].parse::<u32>().map_err(|_| malformed("priority"))?;
    fields[5].parse::<u16>().map_err(|_| malformed("port"))?;
    if fields[6] != "typ" {
        return Err(malformed("missing typ"));
    }
    match fields[7] {
        "host" | "srflx" | "prflx" | "relay" => Ok(()),
        _ => Err(malformed("candidate type")),
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_connection(&self, config: &RTCConfiguration) -> EngineResult<ConnectionHandle> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, "create_connection".to_owned());
        let handle = ConnectionHandle(internal.next_handle());
        log::debug!(
            "loopback: {handle} created with {} ice servers",
            config.ice_servers.len()
        );
        internal.connections.insert(handle, ConnectionEntry::default());
        Ok(handle)
    }

    async fn close_connection(&self, handle: ConnectionHandle) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("close_connection {}", handle.0));
        let entry = internal.connection(handle)?;
        entry.closed = true;
        Ok(())
    }

    fn destroy_connection(&self, handle: ConnectionHandle) {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("destroy_connection {}", handle.0));
        if let Some(entry) = internal.connections.get_mut(&handle) {
            if !entry.sinks.is_empty() {
                log::error!("loopback: {handle} destroyed with callbacks registered");
            }
            entry.destroyed = true;
        }
    }

    async fn create_offer(
        &self,
        handle: ConnectionHandle,
        _options: &RTCOfferOptions,
    ) -> EngineResult<String> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("create_offer {}", handle.0));
        let entry = internal.connection(handle)?;
        if !entry.has_media() {
            return Err(EngineError::InvalidState("nothing to negotiate".to_owned()));
        }
        Ok(self.write_description(handle, entry, false))
    }

    async fn create_answer(
        &self,
        handle: ConnectionHandle,
        _options: &RTCAnswerOptions,
    ) -> EngineResult<String> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("create_answer {}", handle.0));
        let entry = internal.connection(handle)?;
        if !matches!(entry.remote, Some((RTCSdpType::Offer, _))) {
            return Err(EngineError::InvalidState("no remote offer".to_owned()));
        }
        Ok(self.write_description(handle, entry, true))
    }

    async fn set_local_description(
        &self,
        handle: ConnectionHandle,
        sdp_type: RTCSdpType,
        sdp: &str,
    ) -> EngineResult<()> {
        if let Some(delay) = self.config.description_delay {
            tokio::time::sleep(delay).await;
        }
        let mut events = vec![];
        {
            let mut internal = self.internal.lock();
            self.record(&mut internal, format!("set_local_description {} {sdp_type}", handle.0));
            let entry = internal.connection(handle)?;
            if sdp_type == RTCSdpType::Rollback {
                entry.local = None;
                return Ok(());
            }
            validate_description(sdp)?;
            entry.local = Some((sdp_type, sdp.to_owned()));
            maybe_connect(entry, &mut events);
        }
        Self::emit(events);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        handle: ConnectionHandle,
        sdp_type: RTCSdpType,
        sdp: &str,
    ) -> EngineResult<()> {
        if let Some(delay) = self.config.description_delay {
            tokio::time::sleep(delay).await;
        }
        let mut events = vec![];
        {
            let mut internal = self.internal.lock();
            self.record(&mut internal, format!("set_remote_description {} {sdp_type}", handle.0));
            internal.connection(handle)?;
            if sdp_type == RTCSdpType::Rollback {
                internal.connection(handle)?.remote = None;
                return Ok(());
            }
            validate_description(sdp)?;

            let sections = parse_sections(sdp);
            let mut announced = vec![];
            for section in &sections {
                if let Some((stream_id, track_id)) = &section.msid {
                    let receiver = ReceiverHandle(internal.next_handle());
                    announced.push(EngineEvent::Track(RemoteTrackInfo {
                        receiver,
                        id: track_id.clone(),
                        stream_id: stream_id.clone(),
                        kind: RTPCodecType::from(section.kind.as_str()),
                        mid: Some(section.mid.clone()),
                    }));
                }
                for (ordered, max_retransmits, protocol, label) in &section.channels {
                    let channel = DataChannelHandle(internal.next_handle());
                    announced.push(EngineEvent::DataChannel(RemoteDataChannelInfo {
                        handle: channel,
                        label: label.clone(),
                        ordered: *ordered,
                        max_retransmits: *max_retransmits,
                        protocol: protocol.clone(),
                    }));
                }
            }

            let entry = internal.connection(handle)?;
            entry.remote = Some((sdp_type, sdp.to_owned()));
            for event in announced {
                entry.queue(&mut events, event);
            }
            maybe_connect(entry, &mut events);
        }
        Self::emit(events);
        Ok(())
    }

    async fn gather_candidates(&self, handle: ConnectionHandle) -> EngineResult<()> {
        let mut events = vec![];
        {
            let mut internal = self.internal.lock();
            self.record(&mut internal, format!("gather_candidates {}", handle.0));
            let entry = internal.connection(handle)?;
            let port = 50_000 + (handle.0 % 10_000);
            let candidate = RTCIceCandidateInit {
                candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {port} typ host"),
                sdp_mid: Some("0".to_owned()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            entry.queue(
                &mut events,
                EngineEvent::IceGatheringStateChange(RTCIceGatheringState::Gathering),
            );
            entry.queue(&mut events, EngineEvent::IceCandidate(Some(candidate)));
            entry.queue(
                &mut events,
                EngineEvent::IceGatheringStateChange(RTCIceGatheringState::Complete),
            );
            entry.queue(&mut events, EngineEvent::IceCandidate(None));
        }
        Self::emit(events);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        handle: ConnectionHandle,
        candidate: &RTCIceCandidateInit,
    ) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("add_ice_candidate {}", handle.0));
        let entry = internal.connection(handle)?;
        if entry.remote.is_none() {
            return Err(EngineError::InvalidState("no remote description".to_owned()));
        }
        if candidate.is_end_of_candidates() {
            return Ok(());
        }
        validate_candidate(&candidate.candidate)?;
        entry.remote_candidates.push(candidate.candidate.clone());
        Ok(())
    }

    async fn create_track_source(
        &self,
        handle: ConnectionHandle,
        kind: RTPCodecType,
    ) -> EngineResult<SourceHandle> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("create_track_source {} {kind}", handle.0));
        if kind == RTPCodecType::Unspecified {
            return Err(EngineError::InvalidArgument("unspecified kind".to_owned()));
        }
        let source = SourceHandle(internal.next_handle());
        internal.connection(handle)?.sources.insert(source, kind);
        Ok(source)
    }

    fn release_track_source(&self, handle: ConnectionHandle, source: SourceHandle) {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("release_track_source {} {}", handle.0, source.0));
        if let Some(entry) = internal.connections.get_mut(&handle) {
            entry.sources.remove(&source);
        }
    }

    async fn add_track_from_source(
        &self,
        handle: ConnectionHandle,
        source: SourceHandle,
        track_id: &str,
        stream_id: &str,
    ) -> EngineResult<SenderHandle> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("add_track_from_source {} {track_id}", handle.0));
        let sender = SenderHandle(internal.next_handle());
        let entry = internal.connection(handle)?;
        let kind = *entry.sources.get(&source).ok_or(EngineError::UnknownHandle)?;
        entry.senders.push(LocalSender {
            handle: sender,
            kind,
            track_id: track_id.to_owned(),
            stream_id: stream_id.to_owned(),
        });
        Ok(sender)
    }

    async fn remove_track(
        &self,
        handle: ConnectionHandle,
        sender: SenderHandle,
    ) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("remove_track {} {}", handle.0, sender.0));
        let entry = internal.connection(handle)?;
        let before = entry.senders.len();
        entry.senders.retain(|s| s.handle != sender);
        if entry.senders.len() == before {
            return Err(EngineError::UnknownHandle);
        }
        Ok(())
    }

    async fn add_transceiver(
        &self,
        handle: ConnectionHandle,
        kind: RTPCodecType,
        direction: RTCRtpTransceiverDirection,
    ) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("add_transceiver {} {kind} {direction}", handle.0));
        internal
            .connection(handle)?
            .transceivers
            .push(LocalTransceiver { kind, direction });
        Ok(())
    }

    async fn write_rtp(
        &self,
        handle: ConnectionHandle,
        sender: SenderHandle,
        packet: &[u8],
    ) -> EngineResult<usize> {
        let mut internal = self.internal.lock();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.config.fail_write_after {
            if internal.packets_written >= limit {
                return Err(EngineError::Transport("injected write failure".to_owned()));
            }
        }
        internal.packets_written += 1;
        let entry = internal.connection(handle)?;
        if !entry.senders.iter().any(|s| s.handle == sender) {
            return Err(EngineError::UnknownHandle);
        }
        entry.stats.packets_sent += 1;
        entry.stats.bytes_sent += packet.len() as u64;
        Ok(packet.len())
    }

    async fn create_data_channel(
        &self,
        handle: ConnectionHandle,
        label: &str,
        init: &RTCDataChannelInit,
    ) -> EngineResult<DataChannelHandle> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("create_data_channel {} {label}", handle.0));
        let channel = DataChannelHandle(internal.next_handle());
        internal.connection(handle)?.data_channels.push(LocalDataChannel {
            handle: channel,
            label: label.to_owned(),
            ordered: init.ordered.unwrap_or(true),
            max_retransmits: init.max_retransmits,
            protocol: init.protocol.clone().unwrap_or_default(),
            closed: false,
        });
        Ok(channel)
    }

    async fn send_data_channel_message(
        &self,
        handle: ConnectionHandle,
        channel: DataChannelHandle,
        data: &[u8],
        _is_string: bool,
    ) -> EngineResult<usize> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("send_data_channel_message {} {}", handle.0, channel.0));
        let entry = internal.connection(handle)?;
        // Remote channels are not tracked locally; only refuse closed ones.
        if entry
            .data_channels
            .iter()
            .any(|dc| dc.handle == channel && dc.closed)
        {
            return Err(EngineError::InvalidState("data channel closed".to_owned()));
        }
        entry.stats.bytes_sent += data.len() as u64;
        Ok(data.len())
    }

    async fn close_data_channel(
        &self,
        handle: ConnectionHandle,
        channel: DataChannelHandle,
    ) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("close_data_channel {} {}", handle.0, channel.0));
        if self.config.fail_data_channel_close {
            return Err(EngineError::Transport(format!("close of channel {}", channel.0)));
        }
        let entry = internal.connection(handle)?;
        if let Some(dc) = entry.data_channels.iter_mut().find(|dc| dc.handle == channel) {
            dc.closed = true;
        }
        Ok(())
    }

    async fn get_stats(&self, handle: ConnectionHandle) -> EngineResult<EngineStats> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("get_stats {}", handle.0));
        let entry = internal.connection(handle)?;
        let mut stats = entry.stats.clone();
        if entry.connected {
            stats.current_round_trip_time = Some(0.0);
        }
        Ok(stats)
    }

    fn register_callback(
        &self,
        handle: ConnectionHandle,
        category: CallbackCategory,
        sink: EventSink,
    ) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("register_callback {} {category}", handle.0));
        if sink.category() != category {
            return Err(EngineError::InvalidArgument(format!(
                "{} sink registered for {category}",
                sink.category()
            )));
        }
        internal.connection(handle)?.sinks.insert(category, sink);
        Ok(())
    }

    fn unregister_callback(&self, handle: ConnectionHandle, category: CallbackCategory) {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("unregister_callback {} {category}", handle.0));
        if let Some(entry) = internal.connections.get_mut(&handle) {
            entry.sinks.remove(&category);
        }
    }

    fn create_encoder(&self, config: &EncoderConfig) -> EngineResult<EncoderHandle> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("create_encoder {}", config.mime_type));
        if self.config.fail_encoder_creation {
            return Err(EngineError::Unsupported(config.mime_type.clone()));
        }
        let (max_output_size, framerate) = match config.params {
            MediaParameters::Video(v) => (self.config.max_video_output_size, v.framerate.max(1)),
            // 20 ms frames
            MediaParameters::Audio(_) => (self.config.max_audio_output_size, 50),
        };
        let encoder = EncoderHandle(internal.next_handle());
        internal.encoders.insert(
            encoder,
            EncoderEntry {
                kind: config.params.kind(),
                max_output_size,
                bitrate: config.params.bitrate(),
                framerate,
                frames: 0,
                keyframe_requested: false,
            },
        );
        Ok(encoder)
    }

    fn encoder_max_output_size(&self, encoder: EncoderHandle) -> usize {
        self.internal
            .lock()
            .encoders
            .get(&encoder)
            .map_or(0, |e| e.max_output_size)
    }

    fn encode(
        &self,
        encoder: EncoderHandle,
        frame: &[u8],
        _timestamp_us: u64,
        force_keyframe: bool,
        out: &mut [u8],
    ) -> EngineResult<EncodedFrameInfo> {
        let mut internal = self.internal.lock();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = internal
            .encoders
            .get_mut(&encoder)
            .ok_or(EngineError::UnknownHandle)?;
        if frame.is_empty() {
            return Err(EngineError::InvalidArgument("empty frame".to_owned()));
        }

        let is_keyframe = entry.kind == RTPCodecType::Video
            && (entry.frames == 0 || force_keyframe || entry.keyframe_requested);
        entry.keyframe_requested = false;
        entry.frames += 1;

        let mut budget = (entry.bitrate / 8 / entry.framerate).max(1) as usize;
        if is_keyframe {
            budget *= 2;
        }
        let size = budget
            .min(frame.len())
            .min(entry.max_output_size)
            .min(out.len());
        out[..size].copy_from_slice(&frame[..size]);

        Ok(EncodedFrameInfo { size, is_keyframe })
    }

    fn request_keyframe(&self, encoder: EncoderHandle) {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("request_keyframe {}", encoder.0));
        if let Some(entry) = internal.encoders.get_mut(&encoder) {
            entry.keyframe_requested = true;
        }
    }

    fn set_encoder_bitrate(&self, encoder: EncoderHandle, bps: u32) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("set_encoder_bitrate {} {bps}", encoder.0));
        if bps == 0 {
            return Err(EngineError::InvalidArgument("zero bitrate".to_owned()));
        }
        let entry = internal
            .encoders
            .get_mut(&encoder)
            .ok_or(EngineError::UnknownHandle)?;
        entry.bitrate = bps;
        Ok(())
    }

    fn set_encoder_framerate(&self, encoder: EncoderHandle, fps: u32) -> EngineResult<()> {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("set_encoder_framerate {} {fps}", encoder.0));
        let entry = internal
            .encoders
            .get_mut(&encoder)
            .ok_or(EngineError::UnknownHandle)?;
        if entry.kind != RTPCodecType::Video {
            return Err(EngineError::Unsupported("framerate on audio encoder".to_owned()));
        }
        if fps == 0 {
            return Err(EngineError::InvalidArgument("zero framerate".to_owned()));
        }
        entry.framerate = fps;
        Ok(())
    }

    fn destroy_encoder(&self, encoder: EncoderHandle) {
        let mut internal = self.internal.lock();
        self.record(&mut internal, format!("destroy_encoder {}", encoder.0));
        internal.encoders.remove(&encoder);
    }
}

/// Reports ICE and the connection as connected the first time an answer
/// completes a negotiation round.
fn maybe_connect(entry: &mut ConnectionEntry, events: &mut Vec<(EventSink, EngineEvent)>) {
    let answered = matches!(
        (&entry.local, &entry.remote),
        (Some((RTCSdpType::Answer, _)), Some(_)) | (Some(_), Some((RTCSdpType::Answer, _)))
    );
    if !answered || entry.connected {
        return;
    }
    entry.connected = true;

    entry.queue(
        events,
        EngineEvent::IceConnectionStateChange(RTCIceConnectionState::Checking),
    );
    entry.queue(
        events,
        EngineEvent::ConnectionStateChange(RTCPeerConnectionState::Connecting),
    );
    entry.queue(
        events,
        EngineEvent::IceConnectionStateChange(RTCIceConnectionState::Connected),
    );
    entry.queue(
        events,
        EngineEvent::ConnectionStateChange(RTCPeerConnectionState::Connected),
    );
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::*;
    use crate::media::VideoParameters;

    async fn connection(engine: &LoopbackEngine) -> ConnectionHandle {
        engine
            .create_connection(&RTCConfiguration::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_validate_candidate() {
        let tests = vec![
            ("candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host", true),
            ("1 1 UDP 2130706431 10.0.0.1 9 typ srflx raddr 0.0.0.0 rport 0", true),
            ("candidate:1 1 udp 2130706431 127.0.0.1 50000 host", false),
            ("candidate:1 1 udp prio 127.0.0.1 50000 typ host", false),
            ("candidate:1 1 sctp 1 127.0.0.1 50000 typ host", false),
            ("candidate:1 1 udp 1 127.0.0.1 99999 typ host", false),
            ("candidate:1 1 udp 1 127.0.0.1 5000 typ bogus", false),
            ("garbage", false),
        ];
        for (candidate, ok) in tests {
            assert_eq!(validate_candidate(candidate).is_ok(), ok, "{candidate}");
        }
    }

    #[tokio::test]
    async fn test_offer_requires_media() {
        let engine = LoopbackEngine::default();
        let handle = connection(&engine).await;

        let result = engine.create_offer(handle, &RTCOfferOptions::default()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));

        engine
            .create_data_channel(handle, "chat", &RTCDataChannelInit::default())
            .await
            .unwrap();
        let offer = engine
            .create_offer(handle, &RTCOfferOptions::default())
            .await
            .unwrap();
        assert!(offer.starts_with("v=0"));
        assert!(offer.contains("m=application"));
        assert!(offer.contains("a=x-dc:1 - - chat"));
    }

    #[tokio::test]
    async fn test_remote_description_announces_tracks() {
        let engine = LoopbackEngine::default();
        let offerer = connection(&engine).await;
        let answerer = connection(&engine).await;

        let source = engine
            .create_track_source(offerer, RTPCodecType::Video)
            .await
            .unwrap();
        engine
            .add_track_from_source(offerer, source, "video", "webcam")
            .await
            .unwrap();
        let offer = engine
            .create_offer(offerer, &RTCOfferOptions::default())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .register_callback(
                answerer,
                CallbackCategory::Track,
                EventSink::new(CallbackCategory::Track, tx),
            )
            .unwrap();
        engine
            .set_remote_description(answerer, RTCSdpType::Offer, &offer)
            .await
            .unwrap();

        match rx.recv().await {
            Some(EngineEvent::Track(info)) => {
                assert_eq!(info.id, "video");
                assert_eq!(info.stream_id, "webcam");
                assert_eq!(info.kind, RTPCodecType::Video);
                assert_eq!(info.mid.as_deref(), Some("0"));
            }
            other => panic!("expected track event, got {other:?}"),
        }

        let answer = engine
            .create_answer(answerer, &RTCAnswerOptions::default())
            .await
            .unwrap();
        assert!(answer.contains("a=mid:0"));
        assert!(answer.contains("a=recvonly"));
    }

    #[tokio::test]
    async fn test_rejects_malformed_description() {
        let engine = LoopbackEngine::default();
        let handle = connection(&engine).await;
        let result = engine
            .set_remote_description(handle, RTCSdpType::Offer, "not sdp")
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let engine = LoopbackEngine::default();
        let handle = connection(&engine).await;
        engine.close_connection(handle).await.unwrap();
        engine.destroy_connection(handle);

        assert!(engine.is_destroyed(handle));
        let result = engine.gather_candidates(handle).await;
        assert!(matches!(result, Err(EngineError::UnknownHandle)));
    }

    #[test]
    fn test_encoder_model() {
        let engine = LoopbackEngine::new(LoopbackEngineConfig {
            max_video_output_size: 50_000,
            ..Default::default()
        });
        let encoder = engine
            .create_encoder(&EncoderConfig {
                mime_type: "video/VP8".to_owned(),
                clock_rate: 90000,
                params: MediaParameters::Video(VideoParameters {
                    bitrate: 240_000,
                    framerate: 30,
                    ..Default::default()
                }),
            })
            .unwrap();
        assert_eq!(engine.encoder_max_output_size(encoder), 50_000);

        let frame = vec![128u8; 10_000];
        let mut out = vec![0u8; 50_000];

        // 240 kbps at 30 fps is 1000 bytes per frame, doubled for keyframes
        let info = engine.encode(encoder, &frame, 0, false, &mut out).unwrap();
        assert_eq!(info, EncodedFrameInfo { size: 2000, is_keyframe: true });
        let info = engine.encode(encoder, &frame, 33_333, false, &mut out).unwrap();
        assert_eq!(info, EncodedFrameInfo { size: 1000, is_keyframe: false });

        engine.request_keyframe(encoder);
        let info = engine.encode(encoder, &frame, 66_666, false, &mut out).unwrap();
        assert!(info.is_keyframe);
        assert!(out[..info.size].iter().all(|b| *b == 128));

        assert!(engine.encode(encoder, &[], 0, false, &mut out).is_err());

        engine.destroy_encoder(encoder);
        assert_eq!(engine.live_encoders(), 0);
    }
}
