use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::{Interval, Timestamp};

/// Generic `thread::sleep` granularity is poor; spin a full millisecond.
pub const SPIN_WINDOW: Interval = 1_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

pub fn raw_now() -> Timestamp {
    epoch().elapsed().as_nanos() as Timestamp
}

pub fn coarse_sleep_until(deadline: Timestamp) {
    let now = raw_now();
    if deadline > now {
        std::thread::sleep(Duration::from_nanos(deadline - now));
    }
}
