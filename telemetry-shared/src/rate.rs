use std::time::{Duration, Instant};

/// Scale factor that turns bytes accumulated over the window into bits per
/// second.
pub const SCALE_BITS_PER_SEC: f32 = 8000.0;

/// Scale factor that turns event counts accumulated over the window into
/// events per second.
pub const SCALE_PER_SEC: f32 = 1000.0;

/// Rate estimator over a trailing time window, backed by per-millisecond
/// circular buckets.
///
/// `update` folds an amount into the bucket for the given instant, `rate`
/// converts the in-window total into a per-second figure, and
/// `accumulated_count` exposes the raw in-window total (used as a loss-rate
/// denominator). Amounts may be negative; the bucket sum stays exact so a
/// backward correction can never desynchronize later reads.
#[derive(Debug)]
pub struct RateStatistics {
    /// One bucket per millisecond of window, plus one for the current
    /// millisecond.
    buckets: Vec<i64>,
    /// Sum of all live buckets.
    accumulated_count: i64,
    /// Millisecond offset of the oldest live bucket, relative to `origin`.
    oldest_time: i64,
    /// Index of the oldest live bucket.
    oldest_index: usize,
    /// Window total to per-second conversion factor, pre-divided by the
    /// window length.
    scale: f32,
    origin: Instant,
}

impl RateStatistics {
    /// Creates an estimator over the given trailing `window`. Windows
    /// shorter than one millisecond are treated as one millisecond.
    ///
    /// `scale` maps the accumulated window total to the value reported by
    /// [`rate`](Self::rate): [`SCALE_BITS_PER_SEC`] for byte counts,
    /// [`SCALE_PER_SEC`] for packet counts.
    pub fn new(window: Duration, scale: f32) -> Self {
        let window_ms = (window.as_millis() as usize).max(1);
        RateStatistics {
            buckets: vec![0; window_ms + 1],
            accumulated_count: 0,
            oldest_time: 0,
            oldest_index: 0,
            scale: scale / window_ms as f32,
            origin: Instant::now(),
        }
    }

    /// Folds `count` into the window at `now`. Input older than the start of
    /// the current window is ignored.
    pub fn update(&mut self, count: i64, now: Instant) {
        let now_ms = self.elapsed_ms(now);
        if now_ms < self.oldest_time {
            return;
        }
        self.erase_old(now_ms);
        let now_offset = (now_ms - self.oldest_time) as usize;
        let mut index = self.oldest_index + now_offset;
        if index >= self.buckets.len() {
            index -= self.buckets.len();
        }
        self.buckets[index] += count;
        self.accumulated_count += count;
    }

    /// Per-second rate over the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> i64 {
        let now_ms = self.elapsed_ms(now);
        self.erase_old(now_ms);
        (self.accumulated_count as f32 * self.scale).round() as i64
    }

    /// Raw total currently inside the window ending at `now`.
    pub fn accumulated_count(&mut self, now: Instant) -> i64 {
        let now_ms = self.elapsed_ms(now);
        self.erase_old(now_ms);
        self.accumulated_count
    }

    fn elapsed_ms(&self, now: Instant) -> i64 {
        now.saturating_duration_since(self.origin).as_millis() as i64
    }

    fn erase_old(&mut self, now_ms: i64) {
        let new_oldest_time = now_ms - self.buckets.len() as i64 + 1;
        if new_oldest_time <= self.oldest_time {
            return;
        }
        // Cancelling positive and negative amounts can leave a zero total
        // with nonzero residue in separate buckets, so every expired bucket
        // is visited instead of stopping once the total reaches zero. A gap
        // longer than the window still costs at most one full revolution.
        let expired = (new_oldest_time - self.oldest_time).min(self.buckets.len() as i64);
        for _ in 0..expired {
            self.accumulated_count -= self.buckets[self.oldest_index];
            self.buckets[self.oldest_index] = 0;
            self.oldest_index += 1;
            if self.oldest_index >= self.buckets.len() {
                self.oldest_index = 0;
            }
        }
        self.oldest_time = new_oldest_time;
    }
}
