use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Interval, Timestamp};

/// Source of "now" for a pacing context.
///
/// Production code uses [`SystemClock`]. [`ManualClock`] drives deterministic
/// tests and trace replay.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The platform monotonic clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        super::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::Release);
    }

    pub fn advance(&self, by: Interval) -> Timestamp {
        self.now.fetch_add(by, Ordering::AcqRel) + by
    }
}

impl TimeSource for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}

/// Converts a raw performance-counter reading into engine nanoseconds.
///
/// Split into whole seconds and remainder so `counter * 1e9` never overflows.
/// A zero `frequency` yields zero; readings past `u64::MAX` ns saturate.
pub fn from_counter(counter: u64, frequency: u64) -> Timestamp {
    const NANOS: u64 = 1_000_000_000;
    if frequency == 0 {
        return 0;
    }
    let whole = (counter / frequency).saturating_mul(NANOS);
    let part = u128::from(counter % frequency) * u128::from(NANOS) / u128::from(frequency);
    // part < NANOS
    whole.saturating_add(part as u64)
}
