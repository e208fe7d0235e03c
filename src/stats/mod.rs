use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize, Serializer};
use smol_str::SmolStr;

use crate::data_channel::data_channel_state::RTCDataChannelState;
use crate::data_channel::RTCDataChannel;
use crate::rtp_transceiver::SSRC;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RTCStatsType {
    #[serde(rename = "data-channel")]
    DataChannel,
    #[serde(rename = "outbound-rtp")]
    OutboundRTP,
    #[serde(rename = "peer-connection")]
    PeerConnection,
    #[serde(rename = "transport")]
    Transport,
}

/// EngineStats is the transport-level snapshot reported by the media engine.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Seconds, when a candidate pair has been selected.
    pub current_round_trip_time: Option<f64>,
    /// Bits per second.
    pub available_outgoing_bitrate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsReportType {
    DataChannel(DataChannelStats),
    OutboundRTP(OutboundRTPStats),
    PeerConnection(PeerConnectionStats),
    Transport(TransportStats),
}

/// StatsReport is a point-in-time snapshot keyed by stats id.
#[derive(Debug, Clone, Default)]
pub struct StatsReport {
    pub reports: HashMap<String, StatsReportType>,
}

impl StatsReport {
    pub fn peer_connection(&self) -> Option<&PeerConnectionStats> {
        self.reports.values().find_map(|r| match r {
            StatsReportType::PeerConnection(s) => Some(s),
            _ => None,
        })
    }

    pub fn transport(&self) -> Option<&TransportStats> {
        self.reports.values().find_map(|r| match r {
            StatsReportType::Transport(s) => Some(s),
            _ => None,
        })
    }

    pub fn outbound_rtp(&self) -> impl Iterator<Item = &OutboundRTPStats> {
        self.reports.values().filter_map(|r| match r {
            StatsReportType::OutboundRTP(s) => Some(s),
            _ => None,
        })
    }
}

impl Serialize for StatsReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.reports.serialize(serializer)
    }
}

/// Accumulates reports while a connection walks its senders and channels.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    reports: HashMap<String, StatsReportType>,
}

impl StatsCollector {
    pub(crate) fn new() -> Self {
        StatsCollector::default()
    }

    pub(crate) fn insert(&mut self, id: String, stats: StatsReportType) {
        self.reports.insert(id, stats);
    }

    pub(crate) fn into_report(self) -> StatsReport {
        StatsReport {
            reports: self.reports,
        }
    }
}

/// Milliseconds since the unix epoch, the unit browsers use for stats
/// timestamps.
pub(crate) fn timestamp_millis() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnectionStats {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub stats_type: RTCStatsType,
    pub id: String,

    pub data_channels_closed: u32,
    pub data_channels_opened: u32,

    // Non-canon
    pub data_channels_accepted: u32,
    pub data_channels_requested: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub stats_type: RTCStatsType,
    pub id: String,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub current_round_trip_time: Option<f64>,
    pub available_outgoing_bitrate: Option<f64>,
}

impl TransportStats {
    pub(crate) fn new(id: String, engine: EngineStats) -> Self {
        TransportStats {
            timestamp: timestamp_millis(),
            stats_type: RTCStatsType::Transport,
            id,
            bytes_sent: engine.bytes_sent,
            bytes_received: engine.bytes_received,
            packets_sent: engine.packets_sent,
            packets_received: engine.packets_received,
            current_round_trip_time: engine.current_round_trip_time,
            available_outgoing_bitrate: engine.available_outgoing_bitrate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRTPStats {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub stats_type: RTCStatsType,
    pub id: String,

    pub ssrc: SSRC,
    /// Either "video" or "audio".
    pub kind: String,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub header_bytes_sent: u64,
    pub frames_sent: u64,

    pub track_identifier: String,
    pub mid: Option<SmolStr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelStats {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub stats_type: RTCStatsType,
    pub id: String,

    pub label: String,
    pub protocol: String,
    pub state: RTCDataChannelState,
    pub messages_sent: usize,
    pub bytes_sent: usize,
}

impl DataChannelStats {
    pub(crate) fn from(data_channel: &RTCDataChannel) -> Self {
        DataChannelStats {
            timestamp: timestamp_millis(),
            stats_type: RTCStatsType::DataChannel,
            id: data_channel.stats_id.clone(),
            label: data_channel.label.clone(),
            protocol: data_channel.protocol.clone(),
            state: data_channel.ready_state(),
            messages_sent: data_channel.messages_sent(),
            bytes_sent: data_channel.bytes_sent(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stats_report_json() {
        let mut collector = StatsCollector::new();
        collector.insert(
            "PeerConnection".to_owned(),
            StatsReportType::PeerConnection(PeerConnectionStats {
                timestamp: 1.0,
                stats_type: RTCStatsType::PeerConnection,
                id: "PeerConnection".to_owned(),
                data_channels_closed: 1,
                data_channels_opened: 2,
                data_channels_accepted: 0,
                data_channels_requested: 2,
            }),
        );
        collector.insert(
            "Transport".to_owned(),
            StatsReportType::Transport(TransportStats::new(
                "Transport".to_owned(),
                EngineStats {
                    bytes_sent: 10,
                    ..Default::default()
                },
            )),
        );
        let report = collector.into_report();

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["PeerConnection"]["type"], "peer-connection");
        assert_eq!(json["PeerConnection"]["dataChannelsOpened"], 2);
        assert_eq!(json["Transport"]["type"], "transport");
        assert_eq!(json["Transport"]["bytesSent"], 10);

        assert_eq!(report.peer_connection().map(|s| s.data_channels_closed), Some(1));
        assert_eq!(report.transport().map(|s| s.bytes_sent), Some(10));
        assert_eq!(report.outbound_rtp().count(), 0);
    }
}
