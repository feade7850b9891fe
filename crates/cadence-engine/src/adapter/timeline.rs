use std::sync::Arc;

use super::{SubmissionAdapter, SubmissionTiming, GPU_SECTION, SUBMIT_SECTION};
use crate::error::PacingError;
use crate::pacing::{Frame, MarkType};
use crate::time::{SystemClock, TimeSource};
use crate::{Interval, Timestamp};

#[derive(Debug, Default)]
struct Accumulated {
    begin: Option<Timestamp>,
    end: Option<Timestamp>,
    busy: Interval,
    queueing_delay: Option<Interval>,
}

/// Folds per-submission GPU timestamps into per-frame section data.
///
/// Submissions must be recorded in queue order. Busy time counts only the
/// part of each submission that did not overlap the previous one, so idle
/// gaps and pipelined overlap are both excluded.
#[derive(Debug, Default)]
pub struct GpuTimeline {
    last_finish: Timestamp,
    current: Option<Accumulated>,
}

impl GpuTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        if self.current.is_some() {
            log::warn!("gpu timeline: frame begun twice, dropping partial data");
        }
        self.current = Some(Accumulated::default());
    }

    /// Adds one completed submission.
    ///
    /// Submissions outside a frame still advance the queue's finish time.
    pub fn record(&mut self, timing: SubmissionTiming) {
        if let Some(acc) = self.current.as_mut() {
            acc.begin = Some(acc.begin.map_or(timing.begin, |t| t.min(timing.begin)));
            acc.end = Some(acc.end.map_or(timing.end, |t| t.max(timing.end)));

            let waited = self.last_finish.saturating_sub(timing.submitted);
            acc.queueing_delay = Some(acc.queueing_delay.map_or(waited, |q| q.min(waited)));

            acc.busy = acc
                .busy
                .saturating_add(timing.end.saturating_sub(self.last_finish.max(timing.submitted)));
        }
        self.last_finish = self.last_finish.max(timing.end);
    }

    /// Writes the accumulated GPU section into `frame`.
    ///
    /// Returns `false` when no frame was open.
    pub fn end_frame(&mut self, frame: &Frame) -> bool {
        let Some(acc) = self.current.take() else {
            return false;
        };
        if let Some(begin) = acc.begin {
            frame.mark(GPU_SECTION, MarkType::Begin, begin);
        }
        if let Some(end) = acc.end {
            frame.mark(GPU_SECTION, MarkType::End, end);
        }
        frame.override_inverse_throughput(GPU_SECTION, acc.busy);
        if let Some(delay) = acc.queueing_delay {
            frame.override_queueing_delay(SUBMIT_SECTION, delay);
        }
        true
    }

    pub fn last_finish(&self) -> Timestamp {
        self.last_finish
    }
}

/// Aux object handed to the host for each submission.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimelineAux {
    /// Monotonic submission counter; the host signals it on completion.
    pub sequence: u64,
    /// GPU work for this frame should not start before this time.
    pub not_before: Timestamp,
}

/// Backend-agnostic [`SubmissionAdapter`].
///
/// Marks [`SUBMIT_SECTION`] around the frame's submission path and folds
/// submission timings reported through [`TimelineAdapter::record`] into
/// [`GPU_SECTION`].
pub struct TimelineAdapter {
    clock: Arc<dyn TimeSource>,
    timeline: GpuTimeline,
    sequence: u64,
    frame: Option<Frame>,
}

impl TimelineAdapter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            timeline: GpuTimeline::new(),
            sequence: 0,
            frame: None,
        }
    }

    pub fn record(&mut self, timing: SubmissionTiming) {
        self.timeline.record(timing);
    }

    pub fn timeline(&self) -> &GpuTimeline {
        &self.timeline
    }
}

impl Default for TimelineAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionAdapter for TimelineAdapter {
    type Aux = TimelineAux;

    fn begin_frame(&mut self, frame: &Frame) {
        frame.mark(SUBMIT_SECTION, MarkType::Begin, self.clock.now());
        self.timeline.begin_frame();
        self.frame = Some(frame.clone());
    }

    fn before_submit(&mut self) -> Result<TimelineAux, PacingError> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| PacingError::Adapter("submission outside a frame".to_owned()))?;
        self.sequence += 1;
        Ok(TimelineAux {
            sequence: self.sequence,
            not_before: frame.predicted_start(),
        })
    }

    fn end_frame(&mut self, frame: &Frame) -> Result<(), PacingError> {
        match self.frame.take() {
            Some(open) if Frame::ptr_eq(&open, frame) => {}
            Some(open) => {
                self.frame = Some(open);
                return Err(PacingError::Adapter(format!(
                    "end_frame for {} does not match the open frame",
                    frame.id()
                )));
            }
            None => {
                return Err(PacingError::Adapter(format!(
                    "end_frame for {} without begin_frame",
                    frame.id()
                )));
            }
        }
        self.timeline.end_frame(frame);
        frame.mark(SUBMIT_SECTION, MarkType::End, self.clock.now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::PacingContext;
    use crate::time::ManualClock;

    const MS: u64 = 1_000_000;

    fn timing(submitted: u64, begin: u64, end: u64) -> SubmissionTiming {
        SubmissionTiming {
            submitted: submitted * MS,
            begin: begin * MS,
            end: end * MS,
        }
    }

    fn context() -> (PacingContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let context = PacingContext::builder().clock(clock.clone()).build().unwrap();
        (context, clock)
    }

    // ── GpuTimeline ───────────────────────────────────────────────────────

    #[test]
    fn busy_time_excludes_overlap_and_gaps() {
        let (context, _clock) = context();
        let (frame, _) = context.create_frame();
        let mut tl = GpuTimeline::new();

        tl.record(timing(0, 0, 4)); // previous frame's work
        tl.begin_frame();
        tl.record(timing(2, 4, 7)); // queued behind: busy 4..7
        tl.record(timing(10, 10, 12)); // after an idle gap: busy 10..12
        assert!(tl.end_frame(&frame));
        drop(frame);

        // Busy 3 + 2, not the 8ms span.
        assert_eq!(context.section_stats(GPU_SECTION).unwrap().estimate, Some(5 * MS));
        assert_eq!(tl.last_finish(), 12 * MS);
    }

    #[test]
    fn end_without_begin_is_ignored() {
        let (context, _clock) = context();
        let (frame, _) = context.create_frame();
        let mut tl = GpuTimeline::new();
        assert!(!tl.end_frame(&frame));
    }

    // ── TimelineAdapter ───────────────────────────────────────────────────

    #[test]
    fn adapter_brackets_submission() {
        let (context, clock) = context();
        let mut adapter = TimelineAdapter::with_clock(clock.clone());
        let (frame, target) = context.create_frame();

        adapter.begin_frame(&frame);
        let a = adapter.before_submit().unwrap();
        let b = adapter.before_submit().unwrap();
        assert_eq!(a.not_before, target);
        assert!(b.sequence > a.sequence);

        adapter.record(timing(1, 1, 3));
        clock.set(2 * MS);
        adapter.end_frame(&frame).unwrap();
        drop(frame);

        assert_eq!(context.section_stats(SUBMIT_SECTION).unwrap().estimate, Some(2 * MS));
        assert_eq!(context.section_stats(GPU_SECTION).unwrap().estimate, Some(2 * MS));
    }

    #[test]
    fn submit_outside_frame_is_an_error() {
        let mut adapter = TimelineAdapter::new();
        assert!(matches!(adapter.before_submit(), Err(PacingError::Adapter(_))));
    }

    #[test]
    fn mismatched_end_frame_keeps_open_frame() {
        let (context, _clock) = context();
        let mut adapter = TimelineAdapter::new();
        let (first, _) = context.create_frame();
        let (second, _) = context.create_frame();

        adapter.begin_frame(&first);
        assert!(adapter.end_frame(&second).is_err());
        assert!(adapter.end_frame(&first).is_ok());
        assert!(adapter.end_frame(&first).is_err());
    }
}
