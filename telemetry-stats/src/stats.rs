//! Immutable, serializable snapshots of the accumulated statistics.

use serde::{Deserialize, Serialize};

/// Fields shared by every per-stream and aggregate snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// The stream's SSRC, or `-1` for an aggregate or the malformed-SSRC
    /// bucket.
    pub ssrc: i64,
    /// Total RTP bytes.
    pub bytes: u64,
    /// Total RTP packets.
    pub packets: u64,
    /// Bits per second over the current window.
    pub bitrate: i64,
    /// Packets per second over the current window.
    pub packet_rate: i64,
    /// Most recently reported jitter in milliseconds.
    pub jitter: Option<f64>,
    /// Most recently measured round-trip time in milliseconds.
    pub rtt: Option<u64>,
}

/// Retransmission counters, identical in shape for both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetransmissionStats {
    pub bytes_retransmitted: u64,
    pub packets_retransmitted: u64,
    pub bytes_not_retransmitted: u64,
    pub packets_not_retransmitted: u64,
    pub packets_missing_from_cache: u64,
}

/// Snapshot of one received RTP stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStreamStats {
    #[serde(flatten)]
    pub stream: StreamStats,
    #[serde(flatten)]
    pub retransmission: RetransmissionStats,

    /// Highest sequence number received so far.
    pub highest_seq: Option<u16>,
    /// Cumulative packets judged lost.
    pub packets_lost: i64,
    /// Fraction of packets lost over the current window, in `[0, 1]`.
    pub loss_rate: f64,
}

/// Snapshot of one sent RTP stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStreamStats {
    #[serde(flatten)]
    pub stream: StreamStats,
    #[serde(flatten)]
    pub retransmission: RetransmissionStats,

    /// Highest sequence number sent so far.
    pub highest_sent: Option<u16>,
    /// Fraction lost from the most recent receiver report, in `[0, 1]`.
    pub last_fraction_lost: Option<f64>,
    /// Estimated loss toward the remote receiver, in `[0, 1]`.
    pub loss_rate: f64,
}

/// Snapshot of the receive direction as a whole, folded over all live
/// per-SSRC streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReceiveStats {
    #[serde(flatten)]
    pub stream: StreamStats,
    #[serde(flatten)]
    pub retransmission: RetransmissionStats,

    /// Sum of the children's cumulative lost packets.
    pub packets_lost: i64,
    /// Windowed lost over windowed expected across all children.
    pub loss_rate: f64,
    /// Lowest jitter ever reported for this direction.
    pub min_jitter: Option<f64>,
    /// Highest jitter ever reported for this direction.
    pub max_jitter: Option<f64>,
}

/// Snapshot of the send direction as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSendStats {
    #[serde(flatten)]
    pub stream: StreamStats,
    #[serde(flatten)]
    pub retransmission: RetransmissionStats,

    /// Mean of the children's current loss rates.
    pub loss_rate: f64,
    /// Lowest jitter ever reported for this direction.
    pub min_jitter: Option<f64>,
    /// Highest jitter ever reported for this direction.
    pub max_jitter: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_snapshot_serializes_camel_case() {
        let stats = ReceiveStreamStats {
            stream: StreamStats {
                ssrc: 1234,
                bytes: 5000,
                packets: 50,
                bitrate: 40000,
                packet_rate: 50,
                jitter: Some(1.5),
                rtt: Some(70),
            },
            retransmission: RetransmissionStats {
                bytes_retransmitted: 100,
                packets_retransmitted: 1,
                bytes_not_retransmitted: 0,
                packets_not_retransmitted: 0,
                packets_missing_from_cache: 2,
            },
            highest_seq: Some(49),
            packets_lost: 3,
            loss_rate: 0.05,
        };

        let json = serde_json::to_string(&stats).expect("should serialize");
        assert!(json.contains("\"ssrc\":1234"));
        assert!(json.contains("\"packetRate\":50"));
        assert!(json.contains("\"bytesRetransmitted\":100"));
        assert!(json.contains("\"packetsMissingFromCache\":2"));
        assert!(json.contains("\"highestSeq\":49"));
        assert!(json.contains("\"packetsLost\":3"));
        assert!(json.contains("\"lossRate\":0.05"));

        let back: ReceiveStreamStats = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back, stats);
    }

    #[test]
    fn test_absent_values_serialize_as_null() {
        let stats = SendStreamStats {
            stream: StreamStats {
                ssrc: -1,
                bytes: 0,
                packets: 0,
                bitrate: 0,
                packet_rate: 0,
                jitter: None,
                rtt: None,
            },
            retransmission: RetransmissionStats {
                bytes_retransmitted: 0,
                packets_retransmitted: 0,
                bytes_not_retransmitted: 0,
                packets_not_retransmitted: 0,
                packets_missing_from_cache: 0,
            },
            highest_sent: None,
            last_fraction_lost: None,
            loss_rate: 0.0,
        };

        let json = serde_json::to_string(&stats).expect("should serialize");
        assert!(json.contains("\"ssrc\":-1"));
        assert!(json.contains("\"jitter\":null"));
        assert!(json.contains("\"highestSent\":null"));
        assert!(json.contains("\"lastFractionLost\":null"));
    }
}
