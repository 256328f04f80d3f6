// Tick Driver - periodic callback source for the sequencer
// Drivers only hold a Weak reference: dropping the sequencer ends the driver loop

use crate::config::SequencerConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Millisecond time source
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Monotonic wall clock, zero at creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for tests and offline rendering. Clones share the time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms_bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        self.ms_bits.store(ms.to_bits(), Ordering::Relaxed);
    }

    pub fn advance(&self, ms: f64) {
        self.set(self.now_ms() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.ms_bits.load(Ordering::Relaxed))
    }
}

/// Result of one tick callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    /// Playing; more work may come
    Running,
    /// Not playing, nothing to do
    Idle,
    /// Playback ended by itself during this tick
    Finished,
}

/// Something a driver can tick
pub trait TickTarget: Send + Sync {
    /// Current time on the target's clock
    fn now_ms(&self) -> f64;

    /// Periodic entry point. Never fails.
    fn on_tick(&self) -> TickFlow;

    /// Clock time of the next scheduled item, if playing
    fn next_due_ms(&self) -> Option<f64>;
}

/// Replaceable periodic callback strategy
pub trait TickDriver {
    fn start(&mut self, target: Weak<dyn TickTarget>);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Background thread ticking at most every `interval_ms`, earlier when the
/// target reports a closer deadline
pub struct ThreadTickDriver {
    interval_ms: f64,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTickDriver {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms: if interval_ms.is_finite() && interval_ms > 0.0 {
                interval_ms
            } else {
                1.0
            },
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Ticking every `tick_interval_ms` of the config
    pub fn from_config(config: &SequencerConfig) -> Self {
        Self::new(config.tick_interval_ms)
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// How long the loop sleeps after a tick of `target`
    pub fn next_wait_ms(&self, target: &dyn TickTarget) -> f64 {
        Self::wait_ms(target, self.interval_ms)
    }

    fn wait_ms(target: &dyn TickTarget, interval_ms: f64) -> f64 {
        match target.next_due_ms() {
            Some(due) => (due - target.now_ms()).clamp(0.0, interval_ms),
            None => interval_ms,
        }
    }

    fn run(target: Weak<dyn TickTarget>, running: Arc<AtomicBool>, interval_ms: f64) {
        log::debug!("Tick driver started ({} ms)", interval_ms);
        while running.load(Ordering::Acquire) {
            // The strong reference lives only for the callback itself
            let sleep_ms = {
                let Some(target) = target.upgrade() else {
                    log::debug!("Tick target dropped, driver exiting");
                    break;
                };
                target.on_tick();
                Self::wait_ms(target.as_ref(), interval_ms)
            };
            if sleep_ms > 0.0 {
                thread::sleep(Duration::from_secs_f64(sleep_ms / 1000.0));
            } else {
                thread::yield_now();
            }
        }
        running.store(false, Ordering::Release);
        log::debug!("Tick driver stopped");
    }
}

impl TickDriver for ThreadTickDriver {
    fn start(&mut self, target: Weak<dyn TickTarget>) {
        if self.is_running() {
            return;
        }
        // Reap a loop that ended on its own
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let interval_ms = self.interval_ms;
        let spawned = thread::Builder::new()
            .name("sequencer-tick".to_string())
            .spawn(move || Self::run(target, running, interval_ms));
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                log::warn!("Failed to spawn tick thread: {}", e);
            }
        }
    }

    /// Stop the loop and wait for it. Must not be called from inside a tick.
    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                log::warn!("Tick driver stopped from its own thread, not joining");
                return;
            }
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for ThreadTickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Driver fired by hand, e.g. from an audio callback or a test
#[derive(Default)]
pub struct ManualTickDriver {
    target: Mutex<Option<Weak<dyn TickTarget>>>,
}

impl ManualTickDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick the target once. `None` if stopped or the target is gone.
    pub fn fire(&self) -> Option<TickFlow> {
        let target = self.target.lock().as_ref()?.upgrade()?;
        Some(target.on_tick())
    }
}

impl TickDriver for ManualTickDriver {
    fn start(&mut self, target: Weak<dyn TickTarget>) {
        *self.target.lock() = Some(target);
    }

    fn stop(&mut self) {
        *self.target.lock() = None;
    }

    fn is_running(&self) -> bool {
        self.target
            .lock()
            .as_ref()
            .is_some_and(|t| t.strong_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        ticks: AtomicUsize,
    }

    impl TickTarget for Counter {
        fn now_ms(&self) -> f64 {
            0.0
        }

        fn on_tick(&self) -> TickFlow {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            TickFlow::Running
        }

        fn next_due_ms(&self) -> Option<f64> {
            None
        }
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        clock.advance(12.5);
        assert_eq!(shared.now_ms(), 12.5);
        shared.set(3.0);
        assert_eq!(clock.now_ms(), 3.0);
    }

    #[test]
    fn test_manual_driver() {
        let counter = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        });
        let target: Arc<dyn TickTarget> = counter.clone();
        let mut driver = ManualTickDriver::new();
        assert_eq!(driver.fire(), None);

        driver.start(Arc::downgrade(&target));
        assert!(driver.is_running());
        assert_eq!(driver.fire(), Some(TickFlow::Running));
        assert_eq!(counter.ticks.load(Ordering::Relaxed), 1);

        driver.stop();
        assert_eq!(driver.fire(), None);
    }

    #[test]
    fn test_thread_driver_start_stop() {
        let counter = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        });
        let target: Arc<dyn TickTarget> = counter.clone();
        let mut driver = ThreadTickDriver::new(1.0);
        driver.start(Arc::downgrade(&target));
        assert!(driver.is_running());

        thread::sleep(Duration::from_millis(30));
        driver.stop();
        assert!(!driver.is_running());

        let ticks = counter.ticks.load(Ordering::Relaxed);
        assert!(ticks > 0);
        // No more ticks after stop returned
        thread::sleep(Duration::from_millis(10));
        assert_eq!(counter.ticks.load(Ordering::Relaxed), ticks);
    }

    #[test]
    fn test_thread_driver_exits_when_target_dropped() {
        let target: Arc<dyn TickTarget> = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        });
        let mut driver = ThreadTickDriver::new(1.0);
        driver.start(Arc::downgrade(&target));
        drop(target);

        let deadline = Instant::now() + Duration::from_secs(2);
        while driver.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!driver.is_running());
    }
}
