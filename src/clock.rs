use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Millisecond time source injected into both coordinators so interval
/// bookkeeping and retry pacing run without a wall-clock dependency.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}

/// Monotonic clock anchored at construction, the device build.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Hand-driven clock for tests and deterministic simulation. Clones share
/// the same instant; `sleep_ms` advances it so bounded waits and retry
/// delays elapse immediately.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

/// The RTC peripheral seam. Only hour/minute resolution is needed: the
/// wall-clock ground-poll trigger compares HH:MM against a target list.
pub trait WallClock {
    fn now_hhmm(&self) -> (u8, u8);
    /// False while the RTC reports garbage (e.g. lost backup power).
    fn is_valid(&self) -> bool;
    /// False when the oscillator is halted.
    fn is_running(&self) -> bool;
}

#[derive(Debug)]
struct WallTime {
    hour: u8,
    minute: u8,
    valid: bool,
    running: bool,
}

/// Settable RTC stand-in for tests and the simulator.
#[derive(Debug, Clone)]
pub struct ManualWallClock {
    inner: Arc<Mutex<WallTime>>,
}

impl ManualWallClock {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WallTime {
                hour,
                minute,
                valid: true,
                running: true,
            })),
        }
    }

    pub fn set_time(&self, hour: u8, minute: u8) {
        let mut inner = self.inner.lock().unwrap();
        inner.hour = hour;
        inner.minute = minute;
    }

    pub fn set_valid(&self, valid: bool) {
        self.inner.lock().unwrap().valid = valid;
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().unwrap().running = running;
    }
}

impl WallClock for ManualWallClock {
    fn now_hhmm(&self) -> (u8, u8) {
        let inner = self.inner.lock().unwrap();
        (inner.hour, inner.minute)
    }

    fn is_valid(&self) -> bool {
        self.inner.lock().unwrap().valid
    }

    fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }
}
