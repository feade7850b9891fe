//! C ABI for the cadence engine.
//!
//! Every entity is an opaque reference-counted handle. `*_create` returns a
//! handle owning one reference (null on failure), `*_add_ref` / `*_release`
//! adjust the count, and every function is a no-op on a null handle.
//! Declarations live in `include/cadence.h`.

#![allow(clippy::missing_safety_doc)]

use std::panic::{self, AssertUnwindSafe, UnwindSafe};
use std::ptr;
use std::sync::Arc;

use cadence_engine::adapter::{SubmissionAdapter, SubmissionTiming, TimelineAdapter, TimelineAux};
use cadence_engine::logging::{init_logging, LoggingConfig};
use cadence_engine::pacing::{ContextCore, FrameCore};
use cadence_engine::{
    time, DequeueMode, Frame, ImplicitContext, Interval, MarkType, PacingConfig, PacingContext,
    SectionId, Timestamp,
};
use parking_lot::Mutex;

/// Handle behind `cadence_timeline`.
pub struct TimelineHandle {
    adapter: Mutex<TimelineAdapter>,
}

/// Runs a handle-creating call with logging set up, turning panics and
/// errors into null handles.
fn create<T, F>(what: &str, f: F) -> *const T
where
    F: FnOnce() -> Option<*const T> + UnwindSafe,
{
    init_logging(LoggingConfig::default());
    match panic::catch_unwind(f) {
        Ok(Some(handle)) => handle,
        Ok(None) => ptr::null(),
        Err(_) => {
            log::error!("{what}: panicked during creation");
            ptr::null()
        }
    }
}

fn config_from_env(what: &str) -> Option<PacingConfig> {
    PacingConfig::from_env()
        .map_err(|err| log::error!("{what}: {err}"))
        .ok()
}

unsafe fn write_out<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: non-null out pointers must be valid for writes.
        unsafe { out.write(value) };
    }
}

// ── time ──────────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn cadence_timestamp_now() -> Timestamp {
    time::now()
}

#[unsafe(no_mangle)]
pub extern "C" fn cadence_timestamp_from_counter(counter: u64, frequency: u64) -> Timestamp {
    time::from_counter(counter, frequency)
}

#[cfg(windows)]
#[unsafe(no_mangle)]
pub extern "C" fn cadence_timestamp_from_qpc(qpc: u64) -> Timestamp {
    time::timestamp_from_qpc(qpc)
}

#[unsafe(no_mangle)]
pub extern "C" fn cadence_sleep_until(target: Timestamp) {
    time::sleep_until(target)
}

// ── context ───────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn cadence_context_create() -> *const ContextCore {
    create("cadence_context_create", || {
        let config = config_from_env("cadence_context_create")?;
        match PacingContext::with_config(config) {
            Ok(context) => Some(PacingContext::into_raw(context)),
            Err(err) => {
                log::error!("cadence_context_create: {err}");
                None
            }
        }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_context_add_ref(context: *const ContextCore) {
    if !context.is_null() {
        // SAFETY: non-null handles come from cadence_context_create.
        unsafe { PacingContext::increment_raw(context) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_context_release(context: *const ContextCore) {
    if !context.is_null() {
        // SAFETY: as above; the caller gives up this reference.
        unsafe { PacingContext::decrement_raw(context) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_context_override_queueing_delay(
    context: *const ContextCore,
    section: SectionId,
    interval: Interval,
) {
    if context.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { PacingContext::with_raw(context, |c| c.override_queueing_delay(section, interval)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_context_override_inverse_throughput(
    context: *const ContextCore,
    section: SectionId,
    interval: Interval,
) {
    if context.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe {
        PacingContext::with_raw(context, |c| c.override_inverse_throughput(section, interval))
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_context_clear_overrides(context: *const ContextCore) {
    if context.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { PacingContext::with_raw(context, PacingContext::clear_overrides) }
}

// ── frame ─────────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_create(
    context: *const ContextCore,
    out_target: *mut Timestamp,
) -> *const FrameCore {
    if context.is_null() {
        return ptr::null();
    }
    create(
        "cadence_frame_create",
        AssertUnwindSafe(|| {
            // SAFETY: non-null handles are live.
            let (frame, target) =
                unsafe { PacingContext::with_raw(context, PacingContext::create_frame) };
            // SAFETY: caller-provided out pointer, checked for null.
            unsafe { write_out(out_target, target) };
            Some(Frame::into_raw(frame))
        }),
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_add_ref(frame: *const FrameCore) {
    if !frame.is_null() {
        // SAFETY: non-null handles come from a frame-creating call.
        unsafe { Frame::increment_raw(frame) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_release(frame: *const FrameCore) {
    if !frame.is_null() {
        // SAFETY: as above; the caller gives up this reference.
        unsafe { Frame::decrement_raw(frame) }
    }
}

/// `mark_type`: 0 = begin, 1 = end. Other values are ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_mark(
    frame: *const FrameCore,
    section: SectionId,
    mark_type: u32,
    timestamp: Timestamp,
) {
    if frame.is_null() {
        return;
    }
    let Ok(kind) = MarkType::try_from(mark_type) else {
        log::warn!("cadence_frame_mark: unknown mark type {mark_type}");
        return;
    };
    // SAFETY: non-null handles are live.
    unsafe { Frame::with_raw(frame, |f| f.mark(section, kind, timestamp)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_override_queueing_delay(
    frame: *const FrameCore,
    section: SectionId,
    interval: Interval,
) {
    if frame.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { Frame::with_raw(frame, |f| f.override_queueing_delay(section, interval)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_override_inverse_throughput(
    frame: *const FrameCore,
    section: SectionId,
    interval: Interval,
) {
    if frame.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { Frame::with_raw(frame, |f| f.override_inverse_throughput(section, interval)) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_discard(frame: *const FrameCore) {
    if frame.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { Frame::with_raw(frame, Frame::discard) }
}

/// Target start the frame was created with; 0 for a null handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_predicted_start(frame: *const FrameCore) -> Timestamp {
    if frame.is_null() {
        return 0;
    }
    // SAFETY: non-null handles are live.
    unsafe { Frame::with_raw(frame, Frame::predicted_start) }
}

// ── implicit context ──────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn cadence_implicit_create() -> *const ImplicitContext {
    create("cadence_implicit_create", || {
        let config = config_from_env("cadence_implicit_create")?;
        match ImplicitContext::with_config(config) {
            Ok(implicit) => Some(Arc::into_raw(Arc::new(implicit))),
            Err(err) => {
                log::error!("cadence_implicit_create: {err}");
                None
            }
        }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_implicit_add_ref(implicit: *const ImplicitContext) {
    if !implicit.is_null() {
        // SAFETY: non-null handles come from cadence_implicit_create.
        unsafe { Arc::increment_strong_count(implicit) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_implicit_release(implicit: *const ImplicitContext) {
    if !implicit.is_null() {
        // SAFETY: as above; the caller gives up this reference.
        unsafe { Arc::decrement_strong_count(implicit) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_implicit_reset(implicit: *const ImplicitContext) {
    if implicit.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { (*implicit).reset() }
}

/// Creates and queues a frame. The returned reference belongs to the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_create_implicit(
    implicit: *const ImplicitContext,
    out_target: *mut Timestamp,
) -> *const FrameCore {
    if implicit.is_null() {
        return ptr::null();
    }
    create(
        "cadence_frame_create_implicit",
        AssertUnwindSafe(|| {
            // SAFETY: non-null handles are live.
            let (frame, target) = unsafe { (*implicit).create_frame() };
            // SAFETY: caller-provided out pointer, checked for null.
            unsafe { write_out(out_target, target) };
            Some(Frame::into_raw(frame))
        }),
    )
}

/// Returns a new reference to a queued frame, or null when the queue is empty.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_frame_dequeue_implicit(
    implicit: *const ImplicitContext,
    critical: bool,
) -> *const FrameCore {
    if implicit.is_null() {
        return ptr::null();
    }
    let mode = if critical {
        DequeueMode::Critical
    } else {
        DequeueMode::Ordered
    };
    // SAFETY: non-null handles are live.
    match unsafe { (*implicit).dequeue(mode) } {
        Some(frame) => Frame::into_raw(frame),
        None => ptr::null(),
    }
}

// ── submission timeline ───────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn cadence_timeline_create() -> *const TimelineHandle {
    create("cadence_timeline_create", || {
        let handle = TimelineHandle {
            adapter: Mutex::new(TimelineAdapter::new()),
        };
        Some(Arc::into_raw(Arc::new(handle)))
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_add_ref(timeline: *const TimelineHandle) {
    if !timeline.is_null() {
        // SAFETY: non-null handles come from cadence_timeline_create.
        unsafe { Arc::increment_strong_count(timeline) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_release(timeline: *const TimelineHandle) {
    if !timeline.is_null() {
        // SAFETY: as above; the caller gives up this reference.
        unsafe { Arc::decrement_strong_count(timeline) }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_begin_frame(
    timeline: *const TimelineHandle,
    frame: *const FrameCore,
) {
    if timeline.is_null() || frame.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe {
        Frame::with_raw(frame, |f| (*timeline).adapter.lock().begin_frame(f));
    }
}

/// Fills `out_aux` for the next submission. Returns false outside a frame.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_before_submit(
    timeline: *const TimelineHandle,
    out_aux: *mut TimelineAux,
) -> bool {
    if timeline.is_null() {
        return false;
    }
    // SAFETY: non-null handles are live.
    match unsafe { (*timeline).adapter.lock().before_submit() } {
        Ok(aux) => {
            // SAFETY: caller-provided out pointer, checked for null.
            unsafe { write_out(out_aux, aux) };
            true
        }
        Err(err) => {
            log::warn!("cadence_timeline_before_submit: {err}");
            false
        }
    }
}

/// Reports one completed submission, in queue order.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_record(
    timeline: *const TimelineHandle,
    timing: SubmissionTiming,
) {
    if timeline.is_null() {
        return;
    }
    // SAFETY: non-null handles are live.
    unsafe { (*timeline).adapter.lock().record(timing) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cadence_timeline_end_frame(
    timeline: *const TimelineHandle,
    frame: *const FrameCore,
) -> bool {
    if timeline.is_null() || frame.is_null() {
        return false;
    }
    // SAFETY: non-null handles are live.
    let result = unsafe { Frame::with_raw(frame, |f| (*timeline).adapter.lock().end_frame(f)) };
    match result {
        Ok(()) => true,
        Err(err) => {
            log::warn!("cadence_timeline_end_frame: {err}");
            false
        }
    }
}
