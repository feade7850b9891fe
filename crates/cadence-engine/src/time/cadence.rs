use crate::{Interval, Timestamp};

/// Smoothed spacing between consecutive frame completions.
///
/// Fed with the end timestamp of every retired frame, in retirement order.
/// The result approximates the pipeline's sustainable present-to-present
/// interval and is used as a pacing cap when no per-section estimate exists.
///
/// Individual intervals are clamped so that a debugger pause, a minimized
/// window or a loading stall does not drag the estimate somewhere useless.
#[derive(Debug, Clone)]
pub struct CadenceTracker {
    last: Option<Timestamp>,
    smoothed: Option<f64>,
    gain: f64,
    min: Interval,
    max: Interval,
}

impl CadenceTracker {
    /// Creates a tracker with default clamps.
    ///
    /// Clamp rationale:
    /// - minimum keeps back-to-back retirements from reading as infinite rate
    /// - maximum keeps long stalls from reading as a 4 fps pipeline
    pub fn new(gain: f64) -> Self {
        Self::with_clamps(gain, 100_000, 250_000_000)
    }

    /// Creates a tracker with custom interval clamps.
    pub fn with_clamps(gain: f64, min: Interval, max: Interval) -> Self {
        debug_assert!(min <= max);
        Self {
            last: None,
            smoothed: None,
            gain,
            min,
            max,
        }
    }

    /// Forgets the baseline but keeps the smoothed interval.
    ///
    /// Called after a pipeline reset, where the next completion is not a
    /// successor of the previous one.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Records a completion and returns the clamped interval since the
    /// previous one, if there was one.
    pub fn observe(&mut self, end: Timestamp) -> Option<Interval> {
        let interval = self
            .last
            .map(|last| end.saturating_sub(last).clamp(self.min, self.max));
        self.last = Some(end.max(self.last.unwrap_or(0)));

        if let Some(interval) = interval {
            let sample = interval as f64;
            self.smoothed = Some(match self.smoothed {
                Some(current) => (1.0 - self.gain) * current + self.gain * sample,
                None => sample,
            });
        }
        interval
    }

    /// Smoothed completion interval, once two completions have been seen.
    pub fn interval(&self) -> Option<Interval> {
        self.smoothed.map(|v| v as Interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn first_completion_has_no_interval() {
        let mut t = CadenceTracker::new(0.5);
        assert_eq!(t.observe(10 * MS), None);
        assert_eq!(t.interval(), None);
    }

    #[test]
    fn steady_completions_converge() {
        let mut t = CadenceTracker::new(0.3);
        for i in 0..20 {
            t.observe(i * 16 * MS);
        }
        let interval = t.interval().unwrap();
        assert!(interval.abs_diff(16 * MS) <= 1, "{interval}");
    }

    #[test]
    fn stall_is_clamped() {
        let mut t = CadenceTracker::with_clamps(1.0, MS, 100 * MS);
        t.observe(0);
        assert_eq!(t.observe(10_000 * MS), Some(100 * MS));
    }

    #[test]
    fn out_of_order_end_reads_as_minimum() {
        let mut t = CadenceTracker::with_clamps(1.0, MS, 100 * MS);
        t.observe(50 * MS);
        assert_eq!(t.observe(40 * MS), Some(MS));
        // Baseline did not move backwards.
        assert_eq!(t.observe(60 * MS), Some(10 * MS));
    }

    #[test]
    fn reset_drops_baseline_only() {
        let mut t = CadenceTracker::new(1.0);
        t.observe(0);
        t.observe(10 * MS);
        t.reset();
        assert_eq!(t.observe(500 * MS), None);
        assert_eq!(t.interval(), Some(10 * MS));
    }
}
