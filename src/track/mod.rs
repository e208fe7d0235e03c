pub mod track_local;
pub mod track_remote;

/// Default size of an outbound RTP packet, header included. Small enough to
/// survive tunneled paths without IP fragmentation.
pub const RTP_OUTBOUND_MTU: usize = 1200;
