use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PacingError;
use crate::Interval;

/// Tuning parameters for a pacing context.
///
/// Every constant the prediction and smoothing code depends on lives here so
/// that a host (or a test) can reason about the policy without reading the
/// arithmetic. All intervals are in nanoseconds.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// EWMA weight of a new section duration sample.
    pub duration_gain: f64,

    /// EWMA weight of a new optimal-latency sample.
    pub latency_gain: f64,

    /// Number of raw duration samples retained per section.
    pub history_len: usize,

    /// A sample larger than `outlier_factor * median(history)` is clamped
    /// before it reaches the smoothed estimate.
    ///
    /// Only applied once the history holds at least three samples.
    pub outlier_factor: f64,

    /// Upper bound on a single section duration sample.
    pub max_section_duration: Interval,

    /// Upper bound on a single optimal-latency sample.
    pub max_latency: Interval,

    /// Frames are released this much earlier than the latency model asks for,
    /// trading a little latency for fewer GPU queue bubbles.
    pub early_bias: Interval,

    /// Maximum number of frames held by an implicit context's queue.
    pub queue_capacity: usize,

    /// Unreleased frame count past which a leak warning is logged.
    pub in_flight_warn: usize,

    /// Chrome-trace JSON output. Disabled when `None`.
    pub trace_path: Option<PathBuf>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            duration_gain: 0.3,
            latency_gain: 0.7,
            history_len: 16,
            outlier_factor: 2.0,
            max_section_duration: 50_000_000,
            max_latency: 200_000_000,
            early_bias: 1_000_000,
            queue_capacity: 16,
            in_flight_warn: 16,
            trace_path: None,
        }
    }
}

impl PacingConfig {
    /// Default configuration overlaid with `CADENCE_*` environment variables.
    ///
    /// Recognised variables:
    /// - `CADENCE_TRACE`: trace output path
    /// - `CADENCE_EARLY_BIAS_US`: early bias in microseconds
    /// - `CADENCE_HISTORY_LEN`: per-section history length
    /// - `CADENCE_QUEUE_CAPACITY`: implicit frame queue capacity
    pub fn from_env() -> Result<Self, PacingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, PacingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("CADENCE_TRACE").filter(|p| !p.is_empty()) {
            config.trace_path = Some(PathBuf::from(path));
        }
        if let Some(us) = parse_var::<u64>(&lookup, "CADENCE_EARLY_BIAS_US", "early_bias")? {
            config.early_bias = us.saturating_mul(1_000);
        }
        if let Some(len) = parse_var(&lookup, "CADENCE_HISTORY_LEN", "history_len")? {
            config.history_len = len;
        }
        if let Some(cap) = parse_var(&lookup, "CADENCE_QUEUE_CAPACITY", "queue_capacity")? {
            config.queue_capacity = cap;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the estimators cannot work with.
    pub fn validate(&self) -> Result<(), PacingError> {
        check_gain("duration_gain", self.duration_gain)?;
        check_gain("latency_gain", self.latency_gain)?;

        if self.history_len == 0 {
            return Err(PacingError::invalid("history_len", "must be at least 1"));
        }
        if !self.outlier_factor.is_finite() || self.outlier_factor < 1.0 {
            return Err(PacingError::invalid(
                "outlier_factor",
                format!("{} is not a finite factor >= 1", self.outlier_factor),
            ));
        }
        if self.max_section_duration == 0 {
            return Err(PacingError::invalid("max_section_duration", "must be non-zero"));
        }
        if self.max_latency == 0 {
            return Err(PacingError::invalid("max_latency", "must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(PacingError::invalid("queue_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn check_gain(field: &'static str, gain: f64) -> Result<(), PacingError> {
    if gain.is_finite() && gain > 0.0 && gain <= 1.0 {
        Ok(())
    } else {
        Err(PacingError::invalid(field, format!("{gain} is outside (0, 1]")))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
) -> Result<Option<T>, PacingError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PacingError::invalid(field, format!("{key}={raw:?} is not a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn default_is_valid() {
        PacingConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_gain() {
        let config = PacingConfig { duration_gain: 0.0, ..Default::default() };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PacingError::InvalidConfig { field: "duration_gain", .. }));
    }

    #[test]
    fn rejects_nan_outlier_factor() {
        let config = PacingConfig { outlier_factor: f64::NAN, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_queue() {
        let config = PacingConfig { queue_capacity: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overlay_applies_values() {
        let vars = [
            ("CADENCE_TRACE", "/tmp/cadence.json"),
            ("CADENCE_EARLY_BIAS_US", "250"),
            ("CADENCE_HISTORY_LEN", "8"),
            ("CADENCE_QUEUE_CAPACITY", " 4 "),
        ];
        let config = PacingConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.trace_path, Some(PathBuf::from("/tmp/cadence.json")));
        assert_eq!(config.early_bias, 250_000);
        assert_eq!(config.history_len, 8);
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn env_overlay_without_vars_is_default() {
        let config = PacingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.early_bias, PacingConfig::default().early_bias);
        assert!(config.trace_path.is_none());
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let vars = [("CADENCE_HISTORY_LEN", "lots")];
        let err = PacingConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, PacingError::InvalidConfig { field: "history_len", .. }));
    }

    #[test]
    fn env_overlay_is_validated() {
        let vars = [("CADENCE_QUEUE_CAPACITY", "0")];
        assert!(PacingConfig::from_lookup(lookup(&vars)).is_err());
    }
}
