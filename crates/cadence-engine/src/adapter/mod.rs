//! Submission adapter seam.
//!
//! Graphics-backend hooks sit between the application and the real queue
//! submission call. They never decide timing themselves: they bracket the
//! submission path with frame marks and report GPU execution timestamps back
//! so the pacing context can learn the GPU section.
//!
//! Backend-specific adapters (Vulkan, D3D12) live outside this crate and
//! implement [`SubmissionAdapter`] with their own auxiliary sync objects;
//! [`TimelineAdapter`] is the backend-agnostic implementation they build on.

mod timeline;

pub use timeline::{GpuTimeline, TimelineAdapter, TimelineAux};

use crate::error::PacingError;
use crate::pacing::Frame;
use crate::{SectionId, Timestamp};

/// Section bracketing the host's submission call (CPU side).
pub const SUBMIT_SECTION: SectionId = 800;

/// Section covering GPU execution of a frame's submissions.
pub const GPU_SECTION: SectionId = 1000;

/// GPU timestamps of one queue submission, in engine time.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SubmissionTiming {
    /// When the host handed the work to the queue.
    pub submitted: Timestamp,
    /// When the GPU started executing it.
    pub begin: Timestamp,
    /// When the GPU finished it.
    pub end: Timestamp,
}

/// A backend hook that paces GPU submission for frames.
pub trait SubmissionAdapter {
    /// Backend-specific objects to splice into the real submission.
    type Aux;

    fn begin_frame(&mut self, frame: &Frame);

    /// Called right before each real submission of the current frame.
    fn before_submit(&mut self) -> Result<Self::Aux, PacingError>;

    fn end_frame(&mut self, frame: &Frame) -> Result<(), PacingError>;
}
