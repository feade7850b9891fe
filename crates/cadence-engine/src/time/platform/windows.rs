use std::hint;
use std::sync::OnceLock;

use windows::core::PCWSTR;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};
use windows::Win32::System::Threading::{
    CreateWaitableTimerExW, SetWaitableTimer, WaitForSingleObject,
    CREATE_WAITABLE_TIMER_HIGH_RESOLUTION, INFINITE, TIMER_ALL_ACCESS,
};

use crate::time::from_counter;
use crate::{Interval, Timestamp};

/// High-resolution waitable timers still overshoot by a few hundred µs.
pub const SPIN_WINDOW: Interval = 500_000;

fn qpc_frequency() -> u64 {
    static QPF: OnceLock<u64> = OnceLock::new();
    *QPF.get_or_init(|| {
        let mut qpf = 0i64;
        // SAFETY: plain out-parameter write.
        if let Err(err) = unsafe { QueryPerformanceFrequency(&mut qpf) } {
            log::error!("QueryPerformanceFrequency failed: {err}");
        }
        qpf.max(0) as u64
    })
}

/// Converts a `QueryPerformanceCounter` value into engine nanoseconds.
pub fn timestamp_from_qpc(qpc: u64) -> Timestamp {
    from_counter(qpc, qpc_frequency())
}

pub fn raw_now() -> Timestamp {
    let mut qpc = 0i64;
    // SAFETY: plain out-parameter write.
    if let Err(err) = unsafe { QueryPerformanceCounter(&mut qpc) } {
        log::error!("QueryPerformanceCounter failed: {err}");
        return 0;
    }
    timestamp_from_qpc(qpc.max(0) as u64)
}

pub fn coarse_sleep_until(deadline: Timestamp) {
    // SAFETY: no attributes or name; the handle is closed below.
    let timer = match unsafe {
        CreateWaitableTimerExW(
            None,
            PCWSTR::null(),
            CREATE_WAITABLE_TIMER_HIGH_RESOLUTION,
            TIMER_ALL_ACCESS.0,
        )
    } {
        Ok(timer) => timer,
        Err(err) => {
            log::warn!("CreateWaitableTimerExW failed, spinning instead: {err}");
            while raw_now() < deadline {
                hint::spin_loop();
            }
            return;
        }
    };

    let mut now = raw_now();
    while now < deadline {
        // Negative due time is relative, in 100ns units.
        let due = -(((deadline - now) / 100).max(1) as i64);
        // SAFETY: `timer` is a live waitable timer and `due` outlives the call.
        let armed = unsafe { SetWaitableTimer(timer, &due, 0, None, None, false) };
        if let Err(err) = armed {
            log::warn!("SetWaitableTimer failed: {err}");
            break;
        }
        // SAFETY: `timer` is a live handle.
        unsafe { WaitForSingleObject(timer, INFINITE) };
        now = raw_now();
    }

    // SAFETY: `timer` was created above and is not used afterwards.
    if let Err(err) = unsafe { CloseHandle(timer) } {
        log::warn!("CloseHandle on sleep timer failed: {err}");
    }
}
