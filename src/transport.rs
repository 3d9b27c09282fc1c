//! The duplex byte channel the engine runs on, and the clock it reads time
//! from.
//!
//! Socket handling, TLS and failover live behind [`Transport`]; the engine
//! never blocks on its own, it only calls into these two traits.

use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A connected byte stream.
pub trait Transport {
    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read up to `max_bytes`. An empty result means no data is available
    /// right now; implementations may block up to their read timeout first.
    fn read(&mut self, max_bytes: usize) -> io::Result<Bytes>;

    fn is_connected(&self) -> bool;

    /// Write a single heartbeat byte.
    fn send_alive(&mut self, _timeout: Duration) -> io::Result<()> {
        self.write(b"\n")
    }

    /// Upper bound a single `read` may block for.
    fn read_timeout(&self) -> Duration;
}

/// Source of timestamps for heartbeat and deadline decisions.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time. With a non-zero step every `now()` call
/// also advances the clock, which lets deadline loops run to completion
/// without real waiting.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    step: Duration,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: Instant::now(),
                step: Duration::ZERO,
            })),
        }
    }

    /// Advance by `step` on every read of the clock.
    pub fn with_step(self, step: Duration) -> Self {
        self.state().step = step;
        self
    }

    pub fn advance(&self, by: Duration) {
        self.state().now += by;
    }

    /// Current time without stepping.
    pub fn peek(&self) -> Instant {
        self.state().now
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut state = self.state();
        let now = state.now;
        let step = state.step;
        state.now += step;
        now
    }
}
