//! Cadence engine crate.
//!
//! Frame pacing for interactive renderers: observes how long each pipeline
//! section takes and decides when the next frame's simulation should start so
//! input-to-photon latency stays low without starving the GPU.

pub mod adapter;
pub mod config;
pub mod error;
pub mod logging;
pub mod pacing;
pub mod time;
pub mod trace;

pub use config::PacingConfig;
pub use error::PacingError;
pub use pacing::{DequeueMode, Frame, ImplicitContext, MarkType, PacingContext};

/// Monotonic nanoseconds since an unspecified, process-stable epoch.
pub type Timestamp = u64;

/// Nanosecond duration in [`Timestamp`] units.
pub type Interval = u64;

/// Caller-chosen key for a pipeline section.
pub type SectionId = u32;
