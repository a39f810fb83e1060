//! Routing of packet events to per-SSRC accumulators and the per-direction
//! aggregate views.

use crate::accumulator::{
    DEFAULT_INTERVAL, ReceiveStreamAccumulator, SendStreamAccumulator, StreamAccumulator,
};
use crate::stats::{AggregateReceiveStats, AggregateSendStats, ReceiveStreamStats, SendStreamStats};
use log::error;
use shared::error::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key under which events with a malformed (negative) SSRC are collected,
/// and the SSRC reported by the aggregate views. Malformed events still
/// count toward the aggregate instead of being dropped.
pub const MALFORMED_SSRC: i64 = -1;

/// Direction of a stream relative to this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Receive,
    Send,
}

/// Lowest and highest jitter ever reported for one direction.
#[derive(Debug, Default)]
struct JitterExtremes {
    min: Option<f64>,
    max: Option<f64>,
}

impl JitterExtremes {
    fn record(&mut self, jitter: f64) {
        self.min = Some(self.min.map_or(jitter, |min| min.min(jitter)));
        self.max = Some(self.max.map_or(jitter, |max| max.max(jitter)));
    }
}

struct ReceiveDirection {
    children: HashMap<i64, ReceiveStreamAccumulator>,
    aggregate: StreamAccumulator,
    jitter_extremes: JitterExtremes,
}

struct SendDirection {
    children: HashMap<i64, SendStreamAccumulator>,
    aggregate: StreamAccumulator,
    jitter_extremes: JitterExtremes,
    /// SSRCs scheduled for removal, with the instant after which they may
    /// go. Swept opportunistically on receiver-report events.
    removals: HashMap<i64, Instant>,
}

/// Registry of per-SSRC statistics for one media stream.
///
/// Packet events are routed to the right per-SSRC accumulator (created
/// lazily on first event) and folded into that direction's aggregate under
/// a single per-direction lock, so a reader of the aggregate never observes
/// a torn update. Events for different SSRCs of different directions
/// proceed concurrently; events for the same direction serialize on its
/// lock.
pub struct StatsAggregator {
    interval: Duration,
    receive: Mutex<ReceiveDirection>,
    send: Mutex<SendDirection>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    /// An aggregator whose rate statistics average over `interval`. The
    /// same interval is the grace period of deferred send-side removal.
    pub fn with_interval(interval: Duration) -> Self {
        StatsAggregator {
            interval,
            receive: Mutex::new(ReceiveDirection {
                children: HashMap::new(),
                aggregate: StreamAccumulator::new(MALFORMED_SSRC, interval),
                jitter_extremes: JitterExtremes::default(),
            }),
            send: Mutex::new(SendDirection {
                children: HashMap::new(),
                aggregate: StreamAccumulator::new(MALFORMED_SSRC, interval),
                jitter_extremes: JitterExtremes::default(),
                removals: HashMap::new(),
            }),
        }
    }

    /// Records a received RTP packet.
    pub fn rtp_received(&self, ssrc: i64, seq: u16, len: usize, now: Instant) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.receive.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| ReceiveStreamAccumulator::new(ssrc, interval))
            .rtp_received(seq, len, now);
        dir.aggregate.packet_processed(len, now, true);
        Ok(())
    }

    /// Records a sent RTP packet.
    pub fn rtp_sent(&self, ssrc: i64, seq: u16, len: usize, now: Instant) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .rtp_sent(seq, len, now);
        dir.aggregate.packet_processed(len, now, true);
        Ok(())
    }

    /// Records a received RTCP packet. Its bytes count toward the child's
    /// bitrate only, but the aggregate counts it as a full packet so
    /// control traffic shows up in the aggregate packet rate.
    pub fn rtcp_received(&self, ssrc: i64, len: usize, now: Instant) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.receive.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| ReceiveStreamAccumulator::new(ssrc, interval))
            .rtcp_received(len, now);
        dir.aggregate.packet_processed(len, now, true);
        Ok(())
    }

    /// Records a sent RTCP packet, with the same aggregate treatment as
    /// [`rtcp_received`](Self::rtcp_received).
    pub fn rtcp_sent(&self, ssrc: i64, len: usize, now: Instant) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .rtcp_sent(len, now);
        dir.aggregate.packet_processed(len, now, true);
        Ok(())
    }

    /// Records that a packet of the sent stream `ssrc` was retransmitted.
    pub fn packet_retransmitted(&self, ssrc: i64, len: usize) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .stream
            .packet_retransmitted(len);
        dir.aggregate.packet_retransmitted(len);
        Ok(())
    }

    /// Records that a requested retransmission was found in the local cache
    /// but intentionally skipped.
    pub fn packet_not_retransmitted(&self, ssrc: i64, len: usize) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .stream
            .packet_not_retransmitted(len);
        dir.aggregate.packet_not_retransmitted(len);
        Ok(())
    }

    /// Records that a requested retransmission missed the local cache.
    pub fn packet_cache_miss(&self, ssrc: i64) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .stream
            .packet_cache_miss();
        dir.aggregate.packet_cache_miss();
        Ok(())
    }

    /// Records the "fraction lost" field of an RTCP Receiver Report for the
    /// sent stream `ssrc`, and sweeps any send-side stats whose scheduled
    /// removal time has passed.
    pub fn receiver_report_received(&self, ssrc: i64, fraction_lost: u8, now: Instant) -> Result<()> {
        let ssrc = coerce_ssrc(ssrc);
        let mut dir = self.send.lock()?;
        let interval = self.interval;
        dir.children
            .entry(ssrc)
            .or_insert_with(|| SendStreamAccumulator::new(ssrc, interval))
            .receiver_report_received(fraction_lost, now);

        if !dir.removals.is_empty() {
            let dir = &mut *dir;
            dir.removals.retain(|ssrc, after| {
                if *after <= now {
                    dir.children.remove(ssrc);
                    false
                } else {
                    true
                }
            });
        }
        Ok(())
    }

    /// Records a new jitter value for `ssrc` in the given direction. The
    /// aggregate always takes the value; a per-SSRC accumulator is updated
    /// only if one already exists.
    pub fn jitter_updated(&self, ssrc: i64, direction: StreamDirection, jitter: f64) -> Result<()> {
        match direction {
            StreamDirection::Receive => {
                let mut dir = self.receive.lock()?;
                dir.aggregate.set_jitter(jitter);
                dir.jitter_extremes.record(jitter);
                if let Some(child) = dir.children.get_mut(&ssrc) {
                    child.stream.set_jitter(jitter);
                }
            }
            StreamDirection::Send => {
                let mut dir = self.send.lock()?;
                dir.aggregate.set_jitter(jitter);
                dir.jitter_extremes.record(jitter);
                if let Some(child) = dir.children.get_mut(&ssrc) {
                    child.stream.set_jitter(jitter);
                }
            }
        }
        Ok(())
    }

    /// Records a new round-trip time, measured for the whole stream. Both
    /// direction aggregates take the value; per-SSRC accumulators are
    /// updated only where they already exist, and a malformed SSRC updates
    /// no per-SSRC state at all.
    pub fn rtt_updated(&self, ssrc: i64, rtt: u64) -> Result<()> {
        {
            let mut dir = self.receive.lock()?;
            dir.aggregate.set_rtt(rtt);
            if ssrc >= 0 {
                if let Some(child) = dir.children.get_mut(&ssrc) {
                    child.stream.set_rtt(rtt);
                }
            }
        }
        {
            let mut dir = self.send.lock()?;
            dir.aggregate.set_rtt(rtt);
            if ssrc >= 0 {
                if let Some(child) = dir.children.get_mut(&ssrc) {
                    child.stream.set_rtt(rtt);
                }
            }
        }
        Ok(())
    }

    /// Removes the receive-side statistics for `ssrc` immediately.
    pub fn remove_receive(&self, ssrc: i64) -> Result<()> {
        self.receive.lock()?.children.remove(&ssrc);
        Ok(())
    }

    /// Schedules the send-side statistics for `ssrc` for removal once the
    /// averaging interval has passed, leaving them alive long enough for an
    /// in-flight receiver report to land.
    pub fn schedule_send_removal(&self, ssrc: i64, now: Instant) -> Result<()> {
        self.send.lock()?.removals.insert(ssrc, now + self.interval);
        Ok(())
    }

    /// Snapshot of one received stream, or `None` if no events have been
    /// recorded for it.
    pub fn receive_snapshot(&self, ssrc: i64, now: Instant) -> Result<Option<ReceiveStreamStats>> {
        let mut dir = self.receive.lock()?;
        Ok(dir.children.get_mut(&ssrc).map(|child| child.snapshot(now)))
    }

    /// Snapshot of one sent stream, or `None` if no events have been
    /// recorded for it.
    pub fn send_snapshot(&self, ssrc: i64, now: Instant) -> Result<Option<SendStreamStats>> {
        let mut dir = self.send.lock()?;
        Ok(dir.children.get_mut(&ssrc).map(|child| child.snapshot(now)))
    }

    /// Snapshots of all live received streams.
    pub fn receive_snapshots(&self, now: Instant) -> Result<Vec<ReceiveStreamStats>> {
        let mut dir = self.receive.lock()?;
        Ok(dir
            .children
            .values_mut()
            .map(|child| child.snapshot(now))
            .collect())
    }

    /// Snapshots of all live sent streams.
    pub fn send_snapshots(&self, now: Instant) -> Result<Vec<SendStreamStats>> {
        let mut dir = self.send.lock()?;
        Ok(dir
            .children
            .values_mut()
            .map(|child| child.snapshot(now))
            .collect())
    }

    /// Snapshot of the receive direction as a whole. The loss figures are
    /// folded over the live children at read time.
    pub fn aggregate_receive_snapshot(&self, now: Instant) -> Result<AggregateReceiveStats> {
        let mut dir = self.receive.lock()?;
        let dir = &mut *dir;

        let mut packets_lost = 0i64;
        let mut window_lost = 0i64;
        let mut window_packets = 0i64;
        for child in dir.children.values_mut() {
            packets_lost += child.packets_lost;
            window_lost += child.current_lost(now);
            window_packets += child.stream.current_packets(now);
        }
        let expected = window_lost + window_packets;
        let loss_rate = if expected == 0 {
            0.0
        } else {
            window_lost as f64 / expected as f64
        };

        Ok(AggregateReceiveStats {
            stream: dir.aggregate.snapshot(now),
            retransmission: dir.aggregate.retransmission_snapshot(),
            packets_lost,
            loss_rate,
            min_jitter: dir.jitter_extremes.min,
            max_jitter: dir.jitter_extremes.max,
        })
    }

    /// Snapshot of the send direction as a whole. The loss rate is the mean
    /// of the children's current rates; with no children it is `0.0`.
    pub fn aggregate_send_snapshot(&self, now: Instant) -> Result<AggregateSendStats> {
        let mut dir = self.send.lock()?;
        let dir = &mut *dir;

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for child in dir.children.values_mut() {
            sum += child.loss_rate(now);
            count += 1;
        }
        let loss_rate = if count == 0 { 0.0 } else { sum / count as f64 };

        Ok(AggregateSendStats {
            stream: dir.aggregate.snapshot(now),
            retransmission: dir.aggregate.retransmission_snapshot(),
            loss_rate,
            min_jitter: dir.jitter_extremes.min,
            max_jitter: dir.jitter_extremes.max,
        })
    }
}

fn coerce_ssrc(ssrc: i64) -> i64 {
    if ssrc < 0 {
        error!("invalid SSRC {ssrc}, collecting under {MALFORMED_SSRC}");
        MALFORMED_SSRC
    } else {
        ssrc
    }
}
