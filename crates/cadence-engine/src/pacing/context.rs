use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::{Frame, FrameId};
use super::history::{Ewma, SectionHistory};
use super::policy::{LatencyPolicy, PacingPolicy, PlanInput};
use super::record::FrameRecord;
use crate::config::PacingConfig;
use crate::error::PacingError;
use crate::time::{CadenceTracker, SystemClock, TimeSource};
use crate::trace::TraceWriter;
use crate::{Interval, SectionId, Timestamp};

/// Shared timing state for one render pipeline.
///
/// Cloning adds a reference; every [`Frame`] created from the context holds
/// one as well. All methods take `&self` and are safe to call from any thread;
/// internal state sits behind a single lock taken once per frame event.
#[derive(Clone)]
pub struct PacingContext {
    core: Arc<ContextCore>,
}

/// Shared state behind a [`PacingContext`]. Opaque outside the crate.
pub struct ContextCore {
    config: PacingConfig,
    clock: Arc<dyn TimeSource>,
    policy: Box<dyn PacingPolicy>,
    state: Mutex<ContextState>,
}

/// Point-in-time view of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionStats {
    pub estimate: Option<Interval>,
    pub median: Option<Interval>,
    pub samples: usize,
    pub queueing_delay_override: Option<Interval>,
    pub inverse_throughput_override: Option<Interval>,
}

/// Point-in-time view of the whole context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStats {
    pub frames_created: u64,
    pub frames_in_flight: usize,
    pub sections: usize,
    pub optimal_latency: Option<Interval>,
    pub cadence: Option<Interval>,
    pub last_frame_start: Option<Timestamp>,
}

enum Retirement {
    Pending,
    Folded(FrameRecord),
    Discarded,
}

struct InFlight {
    predicted_cost: Interval,
    retirement: Retirement,
}

struct ContextState {
    next_frame_id: u64,
    sections: BTreeMap<SectionId, SectionHistory>,
    in_flight: BTreeMap<FrameId, InFlight>,
    reference: Option<FrameRecord>,
    latency: Ewma,
    cadence: CadenceTracker,
    last_frame_start: Option<Timestamp>,
    trace: Option<TraceWriter>,
    leak_warned: bool,
}

/// Builder for contexts that need a non-default clock, policy or config.
pub struct ContextBuilder {
    config: PacingConfig,
    clock: Arc<dyn TimeSource>,
    policy: Option<Box<dyn PacingPolicy>>,
}

impl ContextBuilder {
    pub fn config(mut self, config: PacingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: impl PacingPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    pub fn build(self) -> Result<PacingContext, PacingError> {
        self.config.validate()?;

        let trace = match &self.config.trace_path {
            Some(path) => Some(TraceWriter::create(path)?),
            None => None,
        };
        Ok(self.assemble(trace))
    }

    fn assemble(self, trace: Option<TraceWriter>) -> PacingContext {
        let policy = self.policy.unwrap_or_else(|| {
            Box::new(LatencyPolicy {
                early_bias: self.config.early_bias,
            })
        });

        let state = ContextState {
            next_frame_id: 0,
            sections: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            reference: None,
            latency: Ewma::new(self.config.latency_gain),
            cadence: CadenceTracker::new(self.config.duration_gain),
            last_frame_start: None,
            trace,
            leak_warned: false,
        };

        log::debug!("pacing context created: {:?}", self.config);

        PacingContext {
            core: Arc::new(ContextCore {
                config: self.config,
                clock: self.clock,
                policy,
                state: Mutex::new(state),
            }),
        }
    }
}

impl PacingContext {
    /// Context with default config, the system clock and [`LatencyPolicy`].
    pub fn new() -> Self {
        // Defaults always validate and never open a trace file.
        Self::builder().assemble(None)
    }

    pub fn with_config(config: PacingConfig) -> Result<Self, PacingError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder {
            config: PacingConfig::default(),
            clock: Arc::new(SystemClock),
            policy: None,
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.core.config
    }

    /// Current time on this context's clock.
    pub fn now(&self) -> Timestamp {
        self.core.clock.now()
    }

    /// Starts a new frame.
    ///
    /// Returns the frame handle and the timestamp its simulation should not
    /// start before. The caller typically passes the timestamp to
    /// [`crate::time::sleep_until`].
    pub fn create_frame(&self) -> (Frame, Timestamp) {
        let now = self.core.clock.now();
        let mut state = self.core.state.lock();

        let input = state.plan_input(now);
        let target = self.core.policy.target(&input);

        let id = FrameId(state.next_frame_id);
        state.next_frame_id += 1;
        state.in_flight.insert(
            id,
            InFlight {
                predicted_cost: input.frame_cost,
                retirement: Retirement::Pending,
            },
        );
        state.last_frame_start = Some(target);

        if state.in_flight.len() > self.core.config.in_flight_warn && !state.leak_warned {
            state.leak_warned = true;
            log::warn!(
                "more than {} frames in flight; is every frame handle released?",
                self.core.config.in_flight_warn
            );
        }

        state.trace_with(|t| t.predicted_start(id, target));

        log::debug!(
            "frame {id}: target +{}us (cost {}us, latency {}us, in flight {})",
            target.saturating_sub(now) / 1_000,
            input.frame_cost / 1_000,
            input.optimal_latency / 1_000,
            state.in_flight.len(),
        );
        drop(state);

        (Frame::new(self.clone(), id, target), target)
    }

    /// Sets the queueing delay of `section` for all future frames.
    pub fn override_queueing_delay(&self, section: SectionId, interval: Interval) {
        let mut state = self.core.state.lock();
        state
            .section_mut(section, &self.core.config)
            .set_queueing_delay(interval);
    }

    /// Sets the per-frame cost of `section`, overriding measurements.
    pub fn override_inverse_throughput(&self, section: SectionId, interval: Interval) {
        let mut state = self.core.state.lock();
        state
            .section_mut(section, &self.core.config)
            .set_inverse_throughput(interval);
    }

    /// Drops every context-scope override.
    pub fn clear_overrides(&self) {
        let mut state = self.core.state.lock();
        for history in state.sections.values_mut() {
            history.clear_overrides();
        }
    }

    /// Forgets the last completion so the next retired frame does not
    /// measure its interval across a pipeline reset.
    pub fn restart_cadence(&self) {
        self.core.state.lock().cadence.reset();
    }

    pub fn section_stats(&self, section: SectionId) -> Option<SectionStats> {
        let state = self.core.state.lock();
        state.sections.get(&section).map(|h| SectionStats {
            estimate: h.estimate(),
            median: h.median(),
            samples: h.samples().len(),
            queueing_delay_override: h.queueing_delay_override(),
            inverse_throughput_override: h.inverse_throughput_override(),
        })
    }

    pub fn stats(&self) -> ContextStats {
        let state = self.core.state.lock();
        ContextStats {
            frames_created: state.next_frame_id,
            frames_in_flight: state.in_flight.len(),
            sections: state.sections.len(),
            optimal_latency: state.latency.get().map(|v| v as Interval),
            cadence: state.cadence.interval(),
            last_frame_start: state.last_frame_start,
        }
    }

    /// Frames created and not yet retired.
    pub fn frames_in_flight(&self) -> usize {
        self.core.state.lock().in_flight.len()
    }

    /// Whether both handles refer to the same context.
    pub fn ptr_eq(a: &PacingContext, b: &PacingContext) -> bool {
        Arc::ptr_eq(&a.core, &b.core)
    }

    /// Number of live references, frames included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    /// Leaks one reference as a raw pointer for an opaque-handle ABI.
    pub fn into_raw(this: PacingContext) -> *const ContextCore {
        Arc::into_raw(this.core)
    }

    /// Reclaims a reference produced by [`PacingContext::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and its reference must not have been
    /// reclaimed already.
    pub unsafe fn from_raw(ptr: *const ContextCore) -> PacingContext {
        // SAFETY: forwarded from the caller.
        PacingContext { core: unsafe { Arc::from_raw(ptr) } }
    }

    /// Borrows a raw handle as a `PacingContext` without touching its count.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`.
    pub unsafe fn with_raw<R>(ptr: *const ContextCore, f: impl FnOnce(&PacingContext) -> R) -> R {
        // SAFETY: the caller guarantees a live reference; ManuallyDrop keeps
        // the count unchanged.
        let context = std::mem::ManuallyDrop::new(unsafe { PacingContext::from_raw(ptr) });
        f(&context)
    }

    /// AddRef on a raw handle.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`.
    pub unsafe fn increment_raw(ptr: *const ContextCore) {
        // SAFETY: forwarded from the caller.
        unsafe { Arc::increment_strong_count(ptr) }
    }

    /// Release on a raw handle.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`, and the reference being
    /// released must not be used again.
    pub unsafe fn decrement_raw(ptr: *const ContextCore) {
        // SAFETY: forwarded from the caller.
        unsafe { Arc::decrement_strong_count(ptr) }
    }

    /// Fold-back entry point, called once per frame from its final drop.
    ///
    /// Section histories see the frame immediately. The latency model and
    /// reference frame advance strictly in creation order, so a released
    /// frame waits behind older ones that are still alive.
    pub(crate) fn retire(&self, id: FrameId, record: Option<FrameRecord>) {
        let config = &self.core.config;
        let mut state = self.core.state.lock();

        if let Some(record) = &record {
            for (section, duration) in record.durations() {
                state.section_mut(section, config).record(duration);
            }
            state.trace_with(|t| t.frame_marks(id, record));
        }

        match state.in_flight.get_mut(&id) {
            Some(slot) => {
                slot.retirement = match record {
                    Some(record) => Retirement::Folded(record),
                    None => Retirement::Discarded,
                };
            }
            None => log::warn!("frame {id} retired twice or never registered"),
        }

        state.advance(config);
    }
}

impl Default for PacingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacingContext")
            .field("config", &self.core.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ContextState {
    fn section_mut(&mut self, section: SectionId, config: &PacingConfig) -> &mut SectionHistory {
        self.sections
            .entry(section)
            .or_insert_with(|| SectionHistory::new(config))
    }

    fn plan_input(&self, now: Timestamp) -> PlanInput {
        let frame_cost = self
            .sections
            .values()
            .filter_map(SectionHistory::inverse_throughput)
            .max()
            .unwrap_or(0);

        PlanInput {
            now,
            last_frame_start: self.last_frame_start,
            reference_end: self.reference.as_ref().and_then(|r| r.span()).map(|(_, end)| end),
            in_flight: self
                .in_flight
                .values()
                .fold(0, |acc, f| acc.saturating_add(f.predicted_cost)),
            frame_cost,
            optimal_latency: self.latency.get().map(|v| v as Interval).unwrap_or(0),
            queue_reserve: self
                .sections
                .values()
                .filter_map(SectionHistory::queueing_delay_override)
                .fold(0, Interval::saturating_add),
            min_spacing: self
                .sections
                .values()
                .filter_map(SectionHistory::inverse_throughput_override)
                .max()
                .unwrap_or(0),
            cadence: if frame_cost > 0 {
                Some(frame_cost)
            } else {
                self.cadence.interval()
            },
        }
    }

    /// Pops retired frames off the front of the in-flight queue.
    fn advance(&mut self, config: &PacingConfig) {
        while let Some(entry) = self.in_flight.first_entry() {
            if matches!(entry.get().retirement, Retirement::Pending) {
                break;
            }
            let (id, slot) = entry.remove_entry();
            if let Retirement::Folded(record) = slot.retirement {
                self.adopt_reference(id, record, config);
            }
        }
    }

    fn adopt_reference(&mut self, id: FrameId, record: FrameRecord, config: &PacingConfig) {
        let Some((begin, end)) = record.span() else {
            return;
        };

        if let Some(reference) = &self.reference {
            let sections = &self.sections;
            let queueing_delay = record.queueing_delay(reference, |section| {
                sections
                    .get(&section)
                    .and_then(SectionHistory::queueing_delay_override)
            });
            let latency = end.saturating_sub(begin);
            let optimal = latency.saturating_sub(queueing_delay).min(config.max_latency);
            self.latency.update(optimal as f64);

            log::trace!(
                "frame {id}: latency {}us, queued {}us",
                latency / 1_000,
                queueing_delay / 1_000
            );
            self.trace_with(|t| t.latency(id, latency, queueing_delay, end));
        }

        self.cadence.observe(end);
        self.reference = Some(record);
    }

    fn trace_with<F>(&mut self, write: F)
    where
        F: FnOnce(&mut TraceWriter) -> std::io::Result<()>,
    {
        if let Some(trace) = self.trace.as_mut() {
            if let Err(err) = write(trace) {
                log::warn!("trace output failed, disabling: {err}");
                self.trace = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::MarkType::{Begin, End};
    use crate::time::ManualClock;

    const MS: u64 = 1_000_000;

    fn manual(start: Timestamp) -> (PacingContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let context = PacingContext::builder().clock(clock.clone()).build().unwrap();
        (context, clock)
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn context_destroyed_after_last_frame() {
        let (context, _clock) = manual(0);
        let weak = Arc::downgrade(&context.core);
        let (frame, _) = context.create_frame();
        drop(context);
        assert!(weak.upgrade().is_some());
        drop(frame);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn frames_count_as_references() {
        let (context, _clock) = manual(0);
        let (a, _) = context.create_frame();
        let (b, _) = context.create_frame();
        assert_eq!(context.ref_count(), 3);
        drop((a, b));
        assert_eq!(context.ref_count(), 1);
        assert_eq!(context.frames_in_flight(), 0);
    }

    #[test]
    fn random_raw_refcounting_destroys_once() {
        use rand::Rng;

        let (context, _clock) = manual(0);
        let weak = Arc::downgrade(&context.core);
        let (frame, _) = context.create_frame();
        let raw = PacingContext::into_raw(context) as usize;
        let raw_frame = Frame::into_raw(frame) as usize;

        let threads: Vec<_> = (0..8)
            .map(|_| {
                // Each thread owns one reference of each and may add and drop
                // more in any order before releasing its own.
                unsafe {
                    PacingContext::increment_raw(raw as *const ContextCore);
                    Frame::increment_raw(raw_frame as *const crate::pacing::FrameCore);
                }
                std::thread::spawn(move || {
                    let mut rng = rand::rng();
                    let extra_ctx = rng.random_range(0..16);
                    let extra_frame = rng.random_range(0..16);
                    unsafe {
                        for _ in 0..extra_ctx {
                            PacingContext::increment_raw(raw as *const ContextCore);
                        }
                        for _ in 0..extra_frame {
                            Frame::increment_raw(raw_frame as *const crate::pacing::FrameCore);
                        }
                        for _ in 0..=extra_frame {
                            Frame::decrement_raw(raw_frame as *const crate::pacing::FrameCore);
                        }
                        for _ in 0..=extra_ctx {
                            PacingContext::decrement_raw(raw as *const ContextCore);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(weak.upgrade().is_some());
        unsafe {
            Frame::decrement_raw(raw_frame as *const crate::pacing::FrameCore);
        }
        assert!(weak.upgrade().is_some());
        unsafe {
            PacingContext::decrement_raw(raw as *const ContextCore);
        }
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn frame_ids_increase() {
        let (context, _clock) = manual(0);
        let (a, _) = context.create_frame();
        let (b, _) = context.create_frame();
        assert!(a.id() < b.id());
        assert_eq!(context.stats().frames_created, 2);
    }

    #[test]
    fn first_frame_starts_now() {
        let (context, _clock) = manual(42 * MS);
        let (frame, target) = context.create_frame();
        assert_eq!(target, 42 * MS);
        assert_eq!(frame.predicted_start(), target);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PacingConfig { history_len: 0, ..Default::default() };
        assert!(PacingContext::with_config(config).is_err());
    }

    // ── fold-back ─────────────────────────────────────────────────────────

    #[test]
    fn release_folds_marks_into_history() {
        let (context, _clock) = manual(0);
        let (frame, _) = context.create_frame();
        frame.mark(1, Begin, 0);
        frame.mark(1, End, 5 * MS);
        frame.mark(2, Begin, 5 * MS); // unmatched
        assert!(context.section_stats(1).is_none());
        drop(frame);

        let stats = context.section_stats(1).unwrap();
        assert_eq!(stats.estimate, Some(5 * MS));
        assert_eq!(stats.samples, 1);
        assert!(context.section_stats(2).is_none());
    }

    #[test]
    fn history_updates_even_when_older_frame_alive() {
        let (context, _clock) = manual(0);
        let (older, _) = context.create_frame();
        let (newer, _) = context.create_frame();
        newer.mark(1, Begin, 0);
        newer.mark(1, End, 3 * MS);
        drop(newer);

        assert_eq!(context.section_stats(1).unwrap().samples, 1);
        // Still waiting behind `older` for in-order retirement.
        assert_eq!(context.frames_in_flight(), 2);
        drop(older);
        assert_eq!(context.frames_in_flight(), 0);
    }

    #[test]
    fn clone_defers_fold_back() {
        let (context, _clock) = manual(0);
        let (frame, _) = context.create_frame();
        let other = frame.clone();
        frame.mark(1, Begin, 0);
        drop(frame);
        other.mark(1, End, 2 * MS);
        assert!(context.section_stats(1).is_none());
        drop(other);
        assert_eq!(context.section_stats(1).unwrap().estimate, Some(2 * MS));
    }

    #[test]
    fn discarded_frame_is_not_folded() {
        let (context, _clock) = manual(0);
        let (frame, _) = context.create_frame();
        frame.mark(1, Begin, 0);
        frame.mark(1, End, 40 * MS);
        frame.discard();
        drop(frame);
        assert!(context.section_stats(1).is_none());
        assert_eq!(context.frames_in_flight(), 0);
    }

    #[test]
    fn frame_override_replaces_measured_duration() {
        let (context, _clock) = manual(0);
        let (frame, _) = context.create_frame();
        frame.mark(1, Begin, 0);
        frame.mark(1, End, 45 * MS);
        frame.override_inverse_throughput(1, 8 * MS);
        drop(frame);
        assert_eq!(context.section_stats(1).unwrap().estimate, Some(8 * MS));
    }

    #[test]
    fn concurrent_marks_are_all_observed() {
        let (context, _clock) = manual(0);
        let (frame, _) = context.create_frame();
        let threads: Vec<_> = (0..8u32)
            .map(|t| {
                let frame = frame.clone();
                std::thread::spawn(move || {
                    let section = 100 + t;
                    frame.mark(section, Begin, 0);
                    frame.mark(section, End, (t as u64 + 1) * MS);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        drop(frame);

        for t in 0..8u32 {
            let stats = context.section_stats(100 + t).unwrap();
            assert_eq!(stats.estimate, Some((t as u64 + 1) * MS));
        }
    }

    // ── overrides ─────────────────────────────────────────────────────────

    #[test]
    fn overrides_are_idempotent() {
        let (once, _c1) = manual(0);
        once.override_queueing_delay(3, 2 * MS);
        once.override_inverse_throughput(3, 16 * MS);

        let (twice, _c2) = manual(0);
        for _ in 0..2 {
            twice.override_queueing_delay(3, 2 * MS);
            twice.override_inverse_throughput(3, 16 * MS);
        }

        assert_eq!(once.section_stats(3), twice.section_stats(3));
        let a = once.state_snapshot(0);
        let b = twice.state_snapshot(0);
        assert_eq!(a, b);
    }

    #[test]
    fn clear_overrides_restores_measurements() {
        let (context, _clock) = manual(0);
        context.override_inverse_throughput(1, 16 * MS);
        context.clear_overrides();
        let stats = context.section_stats(1).unwrap();
        assert_eq!(stats.inverse_throughput_override, None);
        assert_eq!(context.state_snapshot(0).frame_cost, 0);
    }

    #[test]
    fn inverse_throughput_override_rate_limits() {
        let (context, clock) = manual(0);
        context.override_inverse_throughput(9, 16 * MS);
        let (_a, t0) = context.create_frame();
        let (_b, t1) = context.create_frame();
        clock.set(t1);
        let (_c, t2) = context.create_frame();
        assert_eq!(t0, 0);
        assert_eq!(t1, 16 * MS);
        assert_eq!(t2, 32 * MS);
    }

    #[test]
    fn huge_overrides_saturate() {
        const HALF: Interval = Interval::MAX / 2 + 1;

        let (context, _clock) = manual(0);
        context.override_inverse_throughput(1, HALF);
        let (_a, t0) = context.create_frame();
        let (_b, t1) = context.create_frame();
        let (_c, t2) = context.create_frame();
        assert_eq!(t0, 0);
        assert_eq!(t1, HALF);
        assert_eq!(t2, Timestamp::MAX);
        assert_eq!(context.state_snapshot(0).in_flight, Interval::MAX);

        let (context, _clock) = manual(0);
        context.override_queueing_delay(1, HALF);
        context.override_queueing_delay(2, HALF);
        let (_frame, target) = context.create_frame();
        assert_eq!(target, 0);
        assert_eq!(context.state_snapshot(0).queue_reserve, Interval::MAX);
    }

    // ── prediction ────────────────────────────────────────────────────────

    /// Frames run one at a time: start at the target, section 1 takes 10ms,
    /// release, repeat.
    #[test]
    fn stable_section_gives_stable_prediction() {
        let (context, clock) = manual(1_000 * MS);
        let mut starts = Vec::new();

        for _ in 0..5 {
            let (frame, target) = context.create_frame();
            clock.set(clock.now().max(target));
            let begin = clock.now();
            frame.mark(1, Begin, begin);
            frame.mark(1, End, begin + 10 * MS);
            clock.set(begin + 10 * MS);
            drop(frame);
            starts.push(begin);
        }

        let stats = context.section_stats(1).unwrap();
        assert_eq!(stats.estimate, Some(10 * MS));

        let (_sixth, target) = context.create_frame();
        let spacing = target - starts[4];
        assert!(spacing.abs_diff(10 * MS) <= MS, "spacing {spacing}");
        assert!(target >= clock.now());
    }

    #[test]
    fn pipelined_frames_are_held_back() {
        // Simulation takes 2ms, GPU 10ms; the GPU is the bottleneck. A paced
        // loop should space frame starts at roughly the GPU cost instead of
        // racing ahead at the simulation rate.
        let (context, clock) = manual(0);
        let mut gpu_free = 0;
        let mut last_target = 0;
        let mut in_gpu: Option<Frame> = None;

        for i in 0..40 {
            let (frame, target) = context.create_frame();
            clock.set(clock.now().max(target));
            let sim_begin = clock.now();
            frame.mark(1, Begin, sim_begin);
            frame.mark(1, End, sim_begin + 2 * MS);
            let gpu_begin = (sim_begin + 2 * MS).max(gpu_free);
            frame.mark(2, Begin, gpu_begin);
            frame.mark(2, End, gpu_begin + 10 * MS);
            gpu_free = gpu_begin + 10 * MS;

            // The previous frame finishes on the GPU while this one simulates.
            drop(in_gpu.replace(frame));
            clock.set(sim_begin + 2 * MS);

            if i > 20 {
                let spacing = target - last_target;
                assert!(spacing.abs_diff(10 * MS) <= MS, "frame {i}: spacing {spacing}");
            }
            last_target = target;
        }
    }

    #[test]
    fn held_frames_slip_at_most_a_quarter_cadence() {
        let (context, clock) = manual(0);
        // Learn a 5ms section.
        for _ in 0..4 {
            let (frame, target) = context.create_frame();
            clock.set(clock.now().max(target));
            frame.mark(1, Begin, clock.now());
            frame.mark(1, End, clock.now() + 5 * MS);
            clock.advance(5 * MS);
        }
        // Keep many frames alive so the latency model wants to wait.
        let held: Vec<_> = (0..6).map(|_| context.create_frame()).collect();
        for pair in held.windows(2) {
            assert!(pair[1].1 - pair[0].1 <= 5 * MS + 5 * MS / 4);
        }
    }

    // ── trace ─────────────────────────────────────────────────────────────

    #[test]
    fn trace_is_written_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let config = PacingConfig { trace_path: Some(path.clone()), ..Default::default() };
        let clock = Arc::new(ManualClock::new(0));
        let context = PacingContext::builder()
            .config(config)
            .clock(clock)
            .build()
            .unwrap();

        for i in 0..3 {
            let (frame, _) = context.create_frame();
            frame.mark(1, Begin, i * 10 * MS);
            frame.mark(1, End, i * 10 * MS + 4 * MS);
        }
        drop(context);

        let text = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert!(events.iter().any(|e| e["ph"] == "B"));
        assert!(events.iter().any(|e| e["ph"] == "E"));
        assert!(events.iter().any(|e| e["cat"] == "LATENCY"));
    }

    #[test]
    fn unwritable_trace_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("trace.json");
        let config = PacingConfig { trace_path: Some(path), ..Default::default() };
        let err = PacingContext::with_config(config).unwrap_err();
        assert!(matches!(err, PacingError::Trace { .. }));
    }

    impl PacingContext {
        fn state_snapshot(&self, now: Timestamp) -> PlanInput {
            self.core.state.lock().plan_input(now)
        }
    }
}
