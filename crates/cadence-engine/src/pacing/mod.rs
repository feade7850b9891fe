//! Pacing subsystem.
//!
//! Responsibilities:
//! - per-section duration history and host overrides
//! - the shared `PacingContext` and its frame-start prediction
//! - `Frame` handles that collect section marks and fold them back on release
//! - `ImplicitContext`, a context plus a frame queue for call sites that cannot
//!   carry a frame handle through the whole pipeline
//!
//! Prediction is delegated to a `PacingPolicy`; `LatencyPolicy` is the
//! default and `Unpaced` is a baseline for comparisons.

mod context;
mod frame;
mod history;
mod implicit;
mod policy;
mod record;

pub use context::{ContextBuilder, ContextCore, ContextStats, PacingContext, SectionStats};
pub use frame::{Frame, FrameCore, FrameId};
pub use history::SectionHistory;
pub use implicit::{DequeueMode, ImplicitContext};
pub use policy::{LatencyPolicy, PacingPolicy, PlanInput, Unpaced};

pub(crate) use record::FrameRecord;

/// Which boundary of a section a mark records.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MarkType {
    Begin = 0,
    End = 1,
}

impl TryFrom<u32> for MarkType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(Self::Begin),
            1 => Ok(Self::End),
            other => Err(other),
        }
    }
}
