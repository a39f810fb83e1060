//! Send-side stream statistics with RTCP-assisted loss estimation.

use crate::accumulator::StreamAccumulator;
use crate::stats::SendStreamStats;
use shared::rate::{RateStatistics, SCALE_PER_SEC};
use shared::seqnum::seq_delta;
use std::time::{Duration, Instant};

/// Same correction window as the receive side, applied to gaps in the
/// locally generated sequence.
const LATE_ARRIVAL_WINDOW: i32 = 10;

/// A receiver report older than this no longer informs the loss estimate.
/// Kept verbatim from the reference system.
const REPORT_HORIZON: Duration = Duration::from_secs(8);

/// Statistics for one sent RTP stream.
///
/// The remote end reports loss through RTCP Receiver Reports. Packets this
/// end never actually sent (gaps in the outgoing sequence, e.g. dropped by
/// a local policy) would show up in that report as loss, so the locally
/// observed "not sent" fraction is subtracted from the reported fraction
/// before it is exposed as [`loss_rate`](Self::loss_rate).
#[derive(Debug)]
pub struct SendStreamAccumulator {
    pub stream: StreamAccumulator,
    /// Highest sequence number sent so far. Only ever advances, under the
    /// wraparound-aware comparison.
    pub highest_sent: Option<u16>,
    /// Sequence numbers skipped by the local sender inside the current
    /// window.
    not_sent_in_window: RateStatistics,
    /// Fraction lost from the most recent receiver report, scaled to
    /// `[0, 1]`.
    pub last_fraction_lost: Option<f64>,
    last_report_at: Option<Instant>,
}

impl SendStreamAccumulator {
    pub fn new(ssrc: i64, interval: Duration) -> Self {
        SendStreamAccumulator {
            stream: StreamAccumulator::new(ssrc, interval),
            highest_sent: None,
            not_sent_in_window: RateStatistics::new(interval, SCALE_PER_SEC),
            last_fraction_lost: None,
            last_report_at: None,
        }
    }

    /// Records a sent RTP packet with sequence number `seq` and `len`
    /// bytes.
    pub fn rtp_sent(&mut self, seq: u16, len: usize, now: Instant) {
        match self.highest_sent {
            None => {
                self.highest_sent = Some(seq);
            }
            Some(highest) => {
                let diff = seq_delta(seq, highest);
                if diff > 0 {
                    self.highest_sent = Some(seq);
                    if diff > 1 {
                        self.not_sent_in_window.update(i64::from(diff) - 1, now);
                    }
                } else if diff > -LATE_ARRIVAL_WINDOW {
                    // A sequence number counted as skipped went out after
                    // all.
                    self.not_sent_in_window.update(-1, now);
                }
            }
        }
        self.stream.packet_processed(len, now, true);
    }

    /// Records a sent RTCP packet of `len` bytes.
    pub fn rtcp_sent(&mut self, len: usize, now: Instant) {
        self.stream.packet_processed(len, now, false);
    }

    /// Stores the "fraction lost" field of a received RTCP Receiver
    /// Report. The 8-bit field expresses loss as `fraction_lost / 256`.
    pub fn receiver_report_received(&mut self, fraction_lost: u8, now: Instant) {
        self.last_fraction_lost = Some(f64::from(fraction_lost) / 256.0);
        self.last_report_at = Some(now);
    }

    /// Fraction of this end's packets skipped rather than sent, over the
    /// current window.
    fn not_sent_fraction(&mut self, now: Instant) -> f64 {
        let not_sent = self.not_sent_in_window.accumulated_count(now).max(0);
        let total = not_sent + self.stream.current_packets(now);
        if total == 0 {
            0.0
        } else {
            not_sent as f64 / total as f64
        }
    }

    /// Estimated loss between this sender and the remote receiver, in
    /// `[0, 1]`.
    ///
    /// Without a receiver report in the last [`REPORT_HORIZON`] this is
    /// `0.0`: no information is reported as no loss rather than as stale
    /// numbers.
    pub fn loss_rate(&mut self, now: Instant) -> f64 {
        let (fraction_lost, report_at) = match (self.last_fraction_lost, self.last_report_at) {
            (Some(fraction), Some(at)) => (fraction, at),
            _ => return 0.0,
        };
        if now.saturating_duration_since(report_at) > REPORT_HORIZON {
            return 0.0;
        }
        (fraction_lost - self.not_sent_fraction(now)).max(0.0)
    }

    pub fn snapshot(&mut self, now: Instant) -> SendStreamStats {
        SendStreamStats {
            stream: self.stream.snapshot(now),
            retransmission: self.stream.retransmission_snapshot(),
            highest_sent: self.highest_sent,
            last_fraction_lost: self.last_fraction_lost,
            loss_rate: self.loss_rate(now),
        }
    }
}
