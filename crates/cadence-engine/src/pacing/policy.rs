use crate::{Interval, Timestamp};

/// Snapshot of context state a policy decides from.
///
/// Built under the context lock by `PacingContext::create_frame` and handed
/// to the policy by reference; policies never see the lock.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PlanInput {
    /// Current time.
    pub now: Timestamp,

    /// Target start handed to the previous frame.
    pub last_frame_start: Option<Timestamp>,

    /// Last mark of the most recently retired frame.
    pub reference_end: Option<Timestamp>,

    /// Sum of predicted per-frame cost of frames created but not yet retired.
    pub in_flight: Interval,

    /// Predicted per-frame cost of the bottleneck section.
    pub frame_cost: Interval,

    /// Smoothed start-to-finish latency of a frame that never waits in a queue.
    pub optimal_latency: Interval,

    /// Sum of context-scope queueing-delay overrides.
    pub queue_reserve: Interval,

    /// Largest context-scope inverse-throughput override (rate cap).
    pub min_spacing: Interval,

    /// Sustainable frame-start spacing, if known.
    pub cadence: Option<Interval>,
}

const PHASE_SLACK_DIVISOR: Interval = 4;

/// Decides when the next frame's simulation may start.
pub trait PacingPolicy: Send + Sync {
    fn target(&self, input: &PlanInput) -> Timestamp;
}

/// Default policy: release the frame just in time for the GPU.
///
/// ```text
/// completion = reference_end + in_flight + frame_cost
/// latency    = completion - optimal_latency - queue_reserve - early_bias
/// floor      = last_frame_start + min_spacing
/// ceiling    = max(floor, last_frame_start + cadence + cadence / 4)
/// target     = max(now, min(max(latency, floor), ceiling))
/// ```
///
/// `completion` is when the new frame would finish if the pipeline stays
/// busy. Starting `optimal_latency` before that means it arrives exactly when
/// the GPU frees up; `early_bias` trades a little latency for fewer bubbles.
/// The ceiling bounds how far one frame start may drift past the sustainable
/// cadence: consecutive starts are never more than `1.25 * cadence` apart
/// unless a rate cap demands it. The quarter-cadence slack lets the start
/// phase move later when the queue is too deep, a step at a time, and the
/// average spacing settles back to the cadence once the phase is right.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LatencyPolicy {
    pub early_bias: Interval,
}

impl PacingPolicy for LatencyPolicy {
    fn target(&self, input: &PlanInput) -> Timestamp {
        let Some(last_start) = input.last_frame_start else {
            return input.now;
        };

        let floor = last_start.saturating_add(input.min_spacing);

        let latency_target = match input.reference_end {
            Some(reference_end) => reference_end
                .saturating_add(input.in_flight)
                .saturating_add(input.frame_cost)
                .saturating_sub(input.optimal_latency)
                .saturating_sub(input.queue_reserve)
                .saturating_sub(self.early_bias),
            None => floor,
        };

        let mut target = latency_target.max(floor);
        if let Some(cadence) = input.cadence {
            let ceiling = last_start
                .saturating_add(cadence)
                .saturating_add(cadence / PHASE_SLACK_DIVISOR)
                .max(floor);
            target = target.min(ceiling);
        }
        target.max(input.now)
    }
}

/// Always "now", apart from the rate cap. Baseline for comparisons.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Unpaced;

impl PacingPolicy for Unpaced {
    fn target(&self, input: &PlanInput) -> Timestamp {
        match input.last_frame_start {
            Some(last) => last.saturating_add(input.min_spacing).max(input.now),
            None => input.now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn policy() -> LatencyPolicy {
        LatencyPolicy { early_bias: MS }
    }

    fn steady() -> PlanInput {
        PlanInput {
            now: 100 * MS,
            last_frame_start: Some(95 * MS),
            reference_end: Some(100 * MS),
            in_flight: 0,
            frame_cost: 10 * MS,
            optimal_latency: 4 * MS,
            queue_reserve: 0,
            min_spacing: 0,
            cadence: Some(10 * MS),
        }
    }

    #[test]
    fn first_frame_starts_now() {
        let input = PlanInput { now: 7, ..Default::default() };
        assert_eq!(policy().target(&input), 7);
    }

    #[test]
    fn waits_for_gpu_to_free_up() {
        // completes at 110, needs 4 of latency, 1 early → 105.
        assert_eq!(policy().target(&steady()), 105 * MS);
    }

    #[test]
    fn never_earlier_than_now() {
        let input = PlanInput { now: 200 * MS, ..steady() };
        assert_eq!(policy().target(&input), 200 * MS);
    }

    #[test]
    fn slips_at_most_a_quarter_cadence() {
        // Ten frames in flight would push the latency target far out.
        // The start may only slip by a quarter cadence past 95 + 10.
        let input = PlanInput { in_flight: 100 * MS, ..steady() };
        assert_eq!(policy().target(&input), 107_500_000);
        let input = PlanInput { last_frame_start: Some(90 * MS), in_flight: 100 * MS, ..steady() };
        assert_eq!(policy().target(&input), 102_500_000);
    }

    #[test]
    fn rate_cap_spaces_frames() {
        let input = PlanInput { min_spacing: 16 * MS, ..steady() };
        // floor = 95 + 16 = 111, ceiling raised to the floor.
        assert_eq!(policy().target(&input), 111 * MS);
    }

    #[test]
    fn queue_reserve_starts_earlier() {
        let input = PlanInput { queue_reserve: 3 * MS, ..steady() };
        assert_eq!(policy().target(&input), 102 * MS);
    }

    #[test]
    fn unknown_reference_uses_floor() {
        let input = PlanInput { reference_end: None, now: 0, ..steady() };
        assert_eq!(policy().target(&input), 95 * MS);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let input = PlanInput {
            now: 0,
            last_frame_start: Some(u64::MAX - 1),
            reference_end: Some(u64::MAX - 1),
            in_flight: u64::MAX,
            frame_cost: u64::MAX,
            min_spacing: u64::MAX,
            cadence: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(policy().target(&input), u64::MAX);
    }

    #[test]
    fn unpaced_ignores_latency_model() {
        assert_eq!(Unpaced.target(&steady()), 100 * MS);
        let input = PlanInput { min_spacing: 20 * MS, ..steady() };
        assert_eq!(Unpaced.target(&input), 115 * MS);
    }
}
