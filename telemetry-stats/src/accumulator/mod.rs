//! Per-stream statistics accumulators.
//!
//! One accumulator exists per SSRC and direction, updated as packet events
//! occur and read through snapshots. [`StreamAccumulator`] carries the
//! state both directions share; [`ReceiveStreamAccumulator`] and
//! [`SendStreamAccumulator`] embed it and add their direction's loss
//! estimator.

mod receive;
mod send;

pub use receive::ReceiveStreamAccumulator;
pub use send::SendStreamAccumulator;

use crate::stats::{RetransmissionStats, StreamStats};
use shared::rate::{RateStatistics, SCALE_BITS_PER_SEC, SCALE_PER_SEC};
use std::time::{Duration, Instant};

/// Default averaging window for all rate statistics.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Retransmission bookkeeping, identical in shape for both directions.
///
/// Pure counters, independent of the loss estimators.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetransmissionCounters {
    pub bytes_retransmitted: u64,
    pub packets_retransmitted: u64,
    /// Bytes of packets found in the local cache but intentionally not
    /// retransmitted.
    pub bytes_not_retransmitted: u64,
    pub packets_not_retransmitted: u64,
    /// Requested retransmissions that missed the local cache.
    pub packets_missing_from_cache: u64,
}

impl RetransmissionCounters {
    fn snapshot(&self) -> RetransmissionStats {
        RetransmissionStats {
            bytes_retransmitted: self.bytes_retransmitted,
            packets_retransmitted: self.packets_retransmitted,
            bytes_not_retransmitted: self.bytes_not_retransmitted,
            packets_not_retransmitted: self.packets_not_retransmitted,
            packets_missing_from_cache: self.packets_missing_from_cache,
        }
    }
}

/// State common to receive-side and send-side stream statistics: total and
/// windowed byte/packet counters, jitter, round-trip time and
/// retransmission counters.
#[derive(Debug)]
pub struct StreamAccumulator {
    /// The stream's SSRC. Valid SSRCs are `0..=u32::MAX`; `-1` marks the
    /// bucket that collects events with a malformed SSRC, and the
    /// per-direction aggregates.
    pub ssrc: i64,
    /// Total RTP bytes.
    pub bytes: u64,
    /// Total RTP packets.
    pub packets: u64,
    bitrate: RateStatistics,
    packet_rate: RateStatistics,
    /// Most recently reported jitter in milliseconds.
    pub jitter: Option<f64>,
    /// Most recently measured round-trip time in milliseconds.
    pub rtt: Option<u64>,
    pub retransmission: RetransmissionCounters,
}

impl StreamAccumulator {
    pub fn new(ssrc: i64, interval: Duration) -> Self {
        StreamAccumulator {
            ssrc,
            bytes: 0,
            packets: 0,
            bitrate: RateStatistics::new(interval, SCALE_BITS_PER_SEC),
            packet_rate: RateStatistics::new(interval, SCALE_PER_SEC),
            jitter: None,
            rtt: None,
            retransmission: RetransmissionCounters::default(),
        }
    }

    /// Folds a processed packet of `len` bytes into the counters. The bytes
    /// always feed the bitrate window; the byte and packet totals and the
    /// packet-rate window move only when `rtp` is true, so RTCP traffic
    /// contributes to bitrate but never to the totals, the packet rate or
    /// loss accounting.
    pub fn packet_processed(&mut self, len: usize, now: Instant, rtp: bool) {
        self.bitrate.update(len as i64, now);
        if rtp {
            self.bytes += len as u64;
            self.packets += 1;
            self.packet_rate.update(1, now);
        }
    }

    pub fn packet_retransmitted(&mut self, len: usize) {
        self.retransmission.packets_retransmitted += 1;
        self.retransmission.bytes_retransmitted += len as u64;
    }

    pub fn packet_not_retransmitted(&mut self, len: usize) {
        self.retransmission.packets_not_retransmitted += 1;
        self.retransmission.bytes_not_retransmitted += len as u64;
    }

    pub fn packet_cache_miss(&mut self) {
        self.retransmission.packets_missing_from_cache += 1;
    }

    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = Some(jitter);
    }

    pub fn set_rtt(&mut self, rtt: u64) {
        self.rtt = Some(rtt);
    }

    /// Bits per second over the current window.
    pub fn bitrate(&mut self, now: Instant) -> i64 {
        self.bitrate.rate(now)
    }

    /// Packets per second over the current window.
    pub fn packet_rate(&mut self, now: Instant) -> i64 {
        self.packet_rate.rate(now)
    }

    /// RTP packets inside the current window, the denominator base of the
    /// loss-rate estimators.
    pub fn current_packets(&mut self, now: Instant) -> i64 {
        self.packet_rate.accumulated_count(now)
    }

    pub fn snapshot(&mut self, now: Instant) -> StreamStats {
        StreamStats {
            ssrc: self.ssrc,
            bytes: self.bytes,
            packets: self.packets,
            bitrate: self.bitrate(now),
            packet_rate: self.packet_rate(now),
            jitter: self.jitter,
            rtt: self.rtt,
        }
    }

    pub(crate) fn retransmission_snapshot(&self) -> RetransmissionStats {
        self.retransmission.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtcp_bytes_count_toward_bitrate_only() {
        let mut acc = StreamAccumulator::new(1, DEFAULT_INTERVAL);
        let now = Instant::now();

        acc.packet_processed(1000, now, true);
        acc.packet_processed(200, now, false);

        assert_eq!(acc.bytes, 1000);
        assert_eq!(acc.packets, 1);
        assert_eq!(acc.bitrate(now), 9600);
        assert_eq!(acc.packet_rate(now), 1);
        assert_eq!(acc.current_packets(now), 1);
    }

    #[test]
    fn test_retransmission_counters() {
        let mut acc = StreamAccumulator::new(1, DEFAULT_INTERVAL);

        acc.packet_retransmitted(500);
        acc.packet_retransmitted(600);
        acc.packet_not_retransmitted(700);
        acc.packet_cache_miss();

        assert_eq!(acc.retransmission.packets_retransmitted, 2);
        assert_eq!(acc.retransmission.bytes_retransmitted, 1100);
        assert_eq!(acc.retransmission.packets_not_retransmitted, 1);
        assert_eq!(acc.retransmission.bytes_not_retransmitted, 700);
        assert_eq!(acc.retransmission.packets_missing_from_cache, 1);
    }

    #[test]
    fn test_rates_decay_outside_window() {
        let mut acc = StreamAccumulator::new(1, DEFAULT_INTERVAL);
        let now = Instant::now();

        acc.packet_processed(1000, now, true);
        let later = now + Duration::from_millis(1500);
        assert_eq!(acc.bitrate(later), 0);
        assert_eq!(acc.current_packets(later), 0);
        // Totals are monotonic.
        assert_eq!(acc.bytes, 1000);
        assert_eq!(acc.packets, 1);
    }

    #[test]
    fn test_snapshot_fields() {
        let mut acc = StreamAccumulator::new(42, DEFAULT_INTERVAL);
        let now = Instant::now();

        acc.packet_processed(100, now, true);
        acc.set_jitter(2.5);
        acc.set_rtt(80);

        let stats = acc.snapshot(now);
        assert_eq!(stats.ssrc, 42);
        assert_eq!(stats.bytes, 100);
        assert_eq!(stats.packets, 1);
        assert_eq!(stats.jitter, Some(2.5));
        assert_eq!(stats.rtt, Some(80));
    }
}
