use std::ptr;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::time::{TimeSpec, TimeValLike};
use nix::time::{clock_gettime, ClockId};

use crate::{Interval, Timestamp};

/// Tail of every sleep that is spun instead of slept.
pub const SPIN_WINDOW: Interval = 200_000;

const CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;

pub fn raw_now() -> Timestamp {
    match clock_gettime(CLOCK) {
        Ok(ts) => ts.num_nanoseconds() as Timestamp,
        Err(err) => {
            // CLOCK_MONOTONIC cannot fail on a supported kernel; returning 0
            // lets the caller's monotonic guard hold the previous value.
            log::error!("clock_gettime failed: {err}");
            0
        }
    }
}

/// Absolute-deadline sleep on the same clock `raw_now` reads.
pub fn coarse_sleep_until(deadline: Timestamp) {
    let ts = TimeSpec::nanoseconds(deadline as i64);
    loop {
        // SAFETY: `ts` outlives the call and the remainder pointer may be null
        // for TIMER_ABSTIME sleeps.
        let ret = unsafe {
            libc::clock_nanosleep(
                CLOCK.as_raw(),
                libc::TIMER_ABSTIME,
                ts.as_ref(),
                ptr::null_mut(),
            )
        };
        match ret {
            0 => return,
            libc::EINTR => continue,
            err => {
                log::warn!("clock_nanosleep failed: {}", Errno::from_raw(err));
                let now = raw_now();
                if deadline > now {
                    std::thread::sleep(Duration::from_nanos(deadline - now));
                }
                return;
            }
        }
    }
}
