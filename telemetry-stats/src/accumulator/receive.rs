//! Receive-side stream statistics with packet-loss estimation.

use crate::accumulator::StreamAccumulator;
use crate::stats::ReceiveStreamStats;
use shared::rate::{RateStatistics, SCALE_PER_SEC};
use shared::seqnum::seq_delta;
use std::time::{Duration, Instant};

/// How far behind the highest seen sequence number a late arrival may be
/// and still cancel a previously counted loss. Kept verbatim from the
/// reference system.
const LATE_ARRIVAL_WINDOW: i32 = 10;

/// Statistics for one received RTP stream.
///
/// Loss is estimated from gaps in the sequence numbers: a packet that skips
/// ahead counts the skipped sequence numbers as lost, and a packet arriving
/// up to [`LATE_ARRIVAL_WINDOW`] behind the highest seen number cancels one
/// previously counted loss. A retransmitted packet therefore ends up
/// counted as received rather than lost; the price is a slight undercount
/// when genuinely duplicate old packets arrive outside a retransmission
/// flow.
#[derive(Debug)]
pub struct ReceiveStreamAccumulator {
    pub stream: StreamAccumulator,
    /// Highest sequence number received so far. Only ever advances, under
    /// the wraparound-aware comparison.
    pub highest_seq: Option<u16>,
    /// Cumulative packets judged lost. The late-arrival correction can
    /// briefly take this below the true figure for pathological input, and
    /// below zero when duplicates outnumber gaps.
    pub packets_lost: i64,
    /// Packets judged lost inside the current window.
    lost_in_window: RateStatistics,
}

impl ReceiveStreamAccumulator {
    pub fn new(ssrc: i64, interval: Duration) -> Self {
        ReceiveStreamAccumulator {
            stream: StreamAccumulator::new(ssrc, interval),
            highest_seq: None,
            packets_lost: 0,
            lost_in_window: RateStatistics::new(interval, SCALE_PER_SEC),
        }
    }

    /// Records a received RTP packet with sequence number `seq` and `len`
    /// bytes.
    pub fn rtp_received(&mut self, seq: u16, len: usize, now: Instant) {
        match self.highest_seq {
            None => {
                // First packet; no loss judgement possible yet.
                self.highest_seq = Some(seq);
            }
            Some(highest) => {
                let diff = seq_delta(seq, highest);
                if diff > 0 {
                    self.highest_seq = Some(seq);
                    if diff > 1 {
                        let gap = i64::from(diff) - 1;
                        self.packets_lost += gap;
                        self.lost_in_window.update(gap, now);
                    }
                } else if diff > -LATE_ARRIVAL_WINDOW {
                    // A packet counted as lost when it was skipped has now
                    // arrived (retransmission or reordering).
                    self.packets_lost -= 1;
                    self.lost_in_window.update(-1, now);
                }
                // Older than the correction window: already resolved.
            }
        }
        self.stream.packet_processed(len, now, true);
    }

    /// Records a received RTCP packet of `len` bytes.
    pub fn rtcp_received(&mut self, len: usize, now: Instant) {
        self.stream.packet_processed(len, now, false);
    }

    /// Packets judged lost inside the current window, floored at zero: the
    /// backward correction may outlive the gap it cancels when the gap has
    /// already slid out of the window.
    pub fn current_lost(&mut self, now: Instant) -> i64 {
        self.lost_in_window.accumulated_count(now).max(0)
    }

    /// Fraction of packets lost over the current window, in `[0, 1]`.
    pub fn loss_rate(&mut self, now: Instant) -> f64 {
        let lost = self.current_lost(now);
        let expected = lost + self.stream.current_packets(now);
        if expected == 0 {
            0.0
        } else {
            lost as f64 / expected as f64
        }
    }

    pub fn snapshot(&mut self, now: Instant) -> ReceiveStreamStats {
        ReceiveStreamStats {
            stream: self.stream.snapshot(now),
            retransmission: self.stream.retransmission_snapshot(),
            highest_seq: self.highest_seq,
            packets_lost: self.packets_lost,
            loss_rate: self.loss_rate(now),
        }
    }
}
