use std::collections::VecDeque;

use crate::config::PacingConfig;
use crate::Interval;

/// Bias-corrected exponentially weighted moving average.
///
/// The weight term makes the first sample count fully instead of being
/// dragged towards the zero initial state.
#[derive(Debug, Clone)]
pub(crate) struct Ewma {
    current: f64,
    weight: f64,
    gain: f64,
}

impl Ewma {
    pub(crate) fn new(gain: f64) -> Self {
        Self { current: 0.0, weight: 0.0, gain }
    }

    pub(crate) fn update(&mut self, sample: f64) {
        self.current = (1.0 - self.gain) * self.current + self.gain * sample;
        self.weight = (1.0 - self.gain) * self.weight + self.gain;
    }

    pub(crate) fn get(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.current / self.weight)
    }
}

/// Recent durations of one pipeline section plus host overrides.
///
/// Raw samples are kept in a bounded ring (oldest evicted first). The smoothed
/// estimate is an EWMA over samples that were first clamped against the ring's
/// median, so one stalled frame moves the estimate by roughly
/// `duration_gain * (outlier_factor - 1) * median` at most.
#[derive(Debug, Clone)]
pub struct SectionHistory {
    samples: VecDeque<Interval>,
    capacity: usize,
    outlier_factor: f64,
    max_duration: Interval,
    estimate: Ewma,
    queueing_delay: Option<Interval>,
    inverse_throughput: Option<Interval>,
}

impl SectionHistory {
    pub(crate) fn new(config: &PacingConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.history_len),
            capacity: config.history_len,
            outlier_factor: config.outlier_factor,
            max_duration: config.max_section_duration,
            estimate: Ewma::new(config.duration_gain),
            queueing_delay: None,
            inverse_throughput: None,
        }
    }

    /// Adds one observed duration.
    pub(crate) fn record(&mut self, duration: Interval) {
        let duration = duration.min(self.max_duration);

        let smoothed_input = match self.median() {
            Some(median) if self.samples.len() >= 3 => {
                let ceiling = (median as f64 * self.outlier_factor) as Interval;
                duration.min(ceiling.max(median))
            }
            _ => duration,
        };
        self.estimate.update(smoothed_input as f64);

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Smoothed measured duration; `None` until a sample arrives.
    pub fn estimate(&self) -> Option<Interval> {
        self.estimate.get().map(|v| v.round() as Interval)
    }

    /// Per-frame cost of this section: the override when set, else the
    /// measured estimate.
    pub fn inverse_throughput(&self) -> Option<Interval> {
        self.inverse_throughput.or_else(|| self.estimate())
    }

    pub fn queueing_delay_override(&self) -> Option<Interval> {
        self.queueing_delay
    }

    pub fn inverse_throughput_override(&self) -> Option<Interval> {
        self.inverse_throughput
    }

    pub(crate) fn set_queueing_delay(&mut self, interval: Interval) {
        self.queueing_delay = Some(interval);
    }

    pub(crate) fn set_inverse_throughput(&mut self, interval: Interval) {
        self.inverse_throughput = Some(interval);
    }

    pub(crate) fn clear_overrides(&mut self) {
        self.queueing_delay = None;
        self.inverse_throughput = None;
    }

    /// Raw retained samples, oldest first.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = Interval> + '_ {
        self.samples.iter().copied()
    }

    /// Median of the retained samples (upper median for even counts).
    pub fn median(&self) -> Option<Interval> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Interval> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        Some(sorted[sorted.len() / 2])
    }
}
