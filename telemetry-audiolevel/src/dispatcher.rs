//! Off-thread audio level computation and delivery.

use crate::cache::AudioLevelCache;
use crate::calculator::calculate_level;
use log::{debug, error, warn};
use shared::error::{Error, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// How long the worker thread keeps waiting for new data before it exits.
/// The next buffer fed after that simply starts a fresh worker.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receiver of computed audio levels.
///
/// Called from the dispatcher's worker thread, once per consumed sample
/// block. A panic inside the callback is caught and logged; it does not
/// affect the worker or any configured cache target.
pub trait AudioLevelListener: Send + Sync {
    fn level_changed(&self, level: u8);
}

#[derive(Default)]
struct DispatcherState {
    /// The single pending sample block. A newly fed block replaces an
    /// unconsumed one; there is never a queue.
    pending: Option<Vec<i16>>,
    /// Backing storage of the last consumed block, parked here so the next
    /// `feed` can reuse its allocation.
    spare: Option<Vec<i16>>,
    listener: Option<Arc<dyn AudioLevelListener>>,
    cache: Option<(Arc<AudioLevelCache>, u32)>,
    /// Whether a worker thread currently exists (Running or Idle). The
    /// worker clears this, under the state lock, as its very last act.
    worker_alive: bool,
}

impl DispatcherState {
    fn has_interest(&self) -> bool {
        self.listener.is_some() || self.cache.is_some()
    }
}

struct Inner {
    state: Mutex<DispatcherState>,
    wakeup: Condvar,
}

/// Converts "a buffer of samples is ready" into "a listener is told the
/// level" without ever blocking the calling (audio) thread.
///
/// `feed` only swaps the pending-buffer slot and signals; the level is
/// computed by a dedicated worker thread that is spawned lazily, parks
/// while no data arrives and retires itself after [`IDLE_TIMEOUT`]. The
/// worker moves through three states guarded by one mutex and one condvar:
///
/// - *Dead*: no worker thread. Left when interest (a listener or a cache
///   target) and pending data coexist.
/// - *Running*: the worker owns a taken pending buffer, computes its level
///   outside the lock and delivers it to whichever targets are registered
///   at delivery time.
/// - *Idle*: interest but no data; a bounded wait on the condvar. A timeout
///   with still no data, or the loss of all interest, returns the worker to
///   *Dead*.
pub struct AudioLevelDispatcher {
    inner: Arc<Inner>,
    idle_timeout: Duration,
}

impl Default for AudioLevelDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLevelDispatcher {
    pub fn new() -> Self {
        Self::with_idle_timeout(IDLE_TIMEOUT)
    }

    /// A dispatcher whose worker exits after `idle_timeout` without data.
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        AudioLevelDispatcher {
            inner: Arc::new(Inner {
                state: Mutex::new(DispatcherState::default()),
                wakeup: Condvar::new(),
            }),
            idle_timeout,
        }
    }

    /// Hands a block of mono 16-bit PCM samples to the dispatcher.
    ///
    /// The samples are copied into the single pending slot, replacing any
    /// block still waiting there, and the worker is started or woken. With
    /// no listener and no cache target registered this is a no-op and the
    /// buffer is never copied.
    pub fn feed(&self, samples: &[i16]) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        if !state.has_interest() {
            return Ok(());
        }
        let mut buffer = state
            .pending
            .take()
            .or_else(|| state.spare.take())
            .unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(samples);
        state.pending = Some(buffer);
        self.start_or_wake(state)
    }

    /// Replaces the registered listener. `None` unregisters; once neither a
    /// listener nor a cache target is set, the worker exits at its next
    /// wake point.
    pub fn set_listener(&self, listener: Option<Arc<dyn AudioLevelListener>>) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        state.listener = listener;
        self.start_or_wake(state)
    }

    /// Replaces the cache target: computed levels are written to `cache`
    /// under `source_id`. `None` unregisters, with the same worker-exit
    /// semantics as [`set_listener`](Self::set_listener).
    pub fn set_cache(&self, cache: Option<Arc<AudioLevelCache>>, source_id: u32) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        state.cache = cache.map(|cache| (cache, source_id));
        self.start_or_wake(state)
    }

    /// Whether a worker thread currently exists.
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.inner.state.lock()?.worker_alive)
    }

    /// Spawns the worker if the state calls for one, otherwise wakes any
    /// existing worker so it can re-evaluate (consume new data or exit).
    fn start_or_wake(&self, mut state: MutexGuard<'_, DispatcherState>) -> Result<()> {
        if state.has_interest() && state.pending.is_some() && !state.worker_alive {
            state.worker_alive = true;
            let inner = Arc::clone(&self.inner);
            let idle_timeout = self.idle_timeout;
            let spawned = thread::Builder::new()
                .name("audio-level-dispatcher".to_string())
                .spawn(move || {
                    if let Err(e) = worker_loop(&inner, idle_timeout) {
                        error!("audio level worker failed: {e}");
                    }
                });
            if let Err(e) = spawned {
                state.worker_alive = false;
                return Err(Error::ErrSpawnFailed(e.to_string()));
            }
            debug!("audio level worker started");
        } else {
            self.inner.wakeup.notify_all();
        }
        Ok(())
    }
}

impl Drop for AudioLevelDispatcher {
    fn drop(&mut self) {
        // Clear all interest so a parked worker exits now instead of after
        // its idle timeout.
        if let Ok(mut state) = self.inner.state.lock() {
            state.listener = None;
            state.cache = None;
        }
        self.inner.wakeup.notify_all();
    }
}

fn worker_loop(inner: &Inner, idle_timeout: Duration) -> Result<()> {
    let mut state = inner.state.lock()?;
    loop {
        if !state.has_interest() {
            break;
        }
        if let Some(buffer) = state.pending.take() {
            drop(state);
            let level = calculate_level(&buffer);

            state = inner.state.lock()?;
            // Deliver to whichever targets are registered *now*; either may
            // have been replaced while the level was being computed.
            let listener = state.listener.clone();
            let cache = state.cache.clone();
            if state.pending.is_none() {
                state.spare = Some(buffer);
            }
            drop(state);

            if let Some(listener) = listener {
                if catch_unwind(AssertUnwindSafe(|| listener.level_changed(level))).is_err() {
                    warn!("audio level listener panicked; continuing");
                }
            }
            if let Some((cache, source_id)) = cache {
                cache.put_level(source_id, level);
            }
            state = inner.state.lock()?;
        } else {
            let (guard, timeout) = inner.wakeup.wait_timeout(state, idle_timeout)?;
            state = guard;
            if timeout.timed_out() && state.pending.is_none() {
                break;
            }
        }
    }
    // Still under the state lock: marking the worker gone and deciding to
    // exit are one atomic step, so an interested `feed` either reaches this
    // worker before the mark or observes Dead and spawns a fresh one.
    state.worker_alive = false;
    debug!("audio level worker exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    struct ChannelListener {
        levels: mpsc::Sender<u8>,
    }

    impl AudioLevelListener for ChannelListener {
        fn level_changed(&self, level: u8) {
            let _ = self.levels.send(level);
        }
    }

    /// Listener that reports each level and then blocks until the test
    /// releases it, keeping the worker busy on demand.
    struct GatedListener {
        levels: mpsc::Sender<u8>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl AudioLevelListener for GatedListener {
        fn level_changed(&self, level: u8) {
            let _ = self.levels.send(level);
            let _ = self.gate.lock().unwrap().recv();
        }
    }

    fn loud_block() -> Vec<i16> {
        (0..480).map(|i| if i % 2 == 0 { 32767 } else { -32767 }).collect()
    }

    fn wait_until_inactive(dispatcher: &AudioLevelDispatcher, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if !dispatcher.is_active().unwrap() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_feed_without_interest_spawns_nothing() {
        let dispatcher = AudioLevelDispatcher::new();
        dispatcher.feed(&loud_block()).unwrap();
        dispatcher.feed(&[0; 480]).unwrap();
        assert!(!dispatcher.is_active().unwrap());
    }

    #[test]
    fn test_listener_receives_level() {
        let dispatcher = AudioLevelDispatcher::new();
        let (tx, rx) = mpsc::channel();
        dispatcher
            .set_listener(Some(Arc::new(ChannelListener { levels: tx })))
            .unwrap();

        dispatcher.feed(&loud_block()).unwrap();
        let level = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(level, 0);

        dispatcher.feed(&[0; 480]).unwrap();
        let level = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(level, 127);
    }

    #[test]
    fn test_overwrite_keeps_only_latest_block() {
        let dispatcher = AudioLevelDispatcher::new();
        let (levels_tx, levels_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        dispatcher
            .set_listener(Some(Arc::new(GatedListener {
                levels: levels_tx,
                gate: Mutex::new(gate_rx),
            })))
            .unwrap();

        // First block reaches the listener, which then blocks on the gate.
        dispatcher.feed(&loud_block()).unwrap();
        assert_eq!(levels_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

        // Two more blocks arrive while the worker is stuck delivering: the
        // silent one is overwritten by the loud one before consumption.
        dispatcher.feed(&[0; 480]).unwrap();
        dispatcher.feed(&loud_block()).unwrap();

        gate_tx.send(()).unwrap();
        assert_eq!(levels_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        gate_tx.send(()).unwrap();

        // Nothing else is pending; the silent block was never delivered.
        assert!(
            levels_rx.recv_timeout(Duration::from_millis(300)).is_err(),
            "overwritten block was delivered"
        );
    }

    #[test]
    fn test_worker_exits_after_idle_timeout_and_restarts() {
        let dispatcher = AudioLevelDispatcher::with_idle_timeout(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        dispatcher
            .set_listener(Some(Arc::new(ChannelListener { levels: tx })))
            .unwrap();

        dispatcher.feed(&loud_block()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until_inactive(&dispatcher, Duration::from_secs(2)));

        // The next block restarts a fresh worker.
        dispatcher.feed(&[0; 480]).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 127);
    }

    #[test]
    fn test_worker_exits_when_interest_is_cleared() {
        let dispatcher = AudioLevelDispatcher::new();
        let (tx, rx) = mpsc::channel();
        dispatcher
            .set_listener(Some(Arc::new(ChannelListener { levels: tx })))
            .unwrap();

        dispatcher.feed(&loud_block()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        dispatcher.set_listener(None).unwrap();
        assert!(wait_until_inactive(&dispatcher, Duration::from_secs(2)));
    }

    #[test]
    fn test_cache_target_receives_level() {
        let dispatcher = AudioLevelDispatcher::new();
        let cache = Arc::new(AudioLevelCache::new());
        dispatcher.set_cache(Some(Arc::clone(&cache)), 77).unwrap();

        dispatcher.feed(&loud_block()).unwrap();
        let start = Instant::now();
        while cache.level(77).is_none() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(cache.level(77), Some(0));
    }

    struct PanickyListener {
        panicked: AtomicBool,
        levels: mpsc::Sender<u8>,
    }

    impl AudioLevelListener for PanickyListener {
        fn level_changed(&self, level: u8) {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("listener fault");
            }
            let _ = self.levels.send(level);
        }
    }

    #[test]
    fn test_listener_panic_does_not_kill_worker_or_skip_cache() {
        let dispatcher = AudioLevelDispatcher::new();
        let cache = Arc::new(AudioLevelCache::new());
        let (tx, rx) = mpsc::channel();
        dispatcher
            .set_listener(Some(Arc::new(PanickyListener {
                panicked: AtomicBool::new(false),
                levels: tx,
            })))
            .unwrap();
        dispatcher.set_cache(Some(Arc::clone(&cache)), 5).unwrap();

        // First delivery panics in the listener; the cache write must still
        // happen and the worker must survive.
        dispatcher.feed(&loud_block()).unwrap();
        let start = Instant::now();
        while cache.level(5).is_none() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(cache.level(5), Some(0));

        dispatcher.feed(&[0; 480]).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 127);
    }
}
