use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::PacingContext;
use super::record::{FrameMarks, FrameRecord, Mark};
use super::MarkType;
use crate::{Interval, SectionId, Timestamp};

/// Per-context frame sequence number, in creation order.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A write handle for one frame's section marks.
///
/// Cloning adds a reference; dropping releases one. Marks may be written from
/// any thread holding a reference. When the last reference goes away the
/// collected marks are folded back into the owning [`PacingContext`].
///
/// A frame keeps its context alive, so a context handle may be dropped while
/// frames are still in flight.
#[derive(Clone)]
pub struct Frame {
    core: Arc<FrameCore>,
}

/// Shared state behind a [`Frame`]. Opaque outside the crate.
pub struct FrameCore {
    context: PacingContext,
    id: FrameId,
    predicted_start: Timestamp,
    marks: Mutex<FrameMarks>,
    discarded: AtomicBool,
}

impl Frame {
    pub(crate) fn new(context: PacingContext, id: FrameId, predicted_start: Timestamp) -> Self {
        Self {
            core: Arc::new(FrameCore {
                context,
                id,
                predicted_start,
                marks: Mutex::new(FrameMarks::default()),
                discarded: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> FrameId {
        self.core.id
    }

    /// Target start the frame was created with.
    pub fn predicted_start(&self) -> Timestamp {
        self.core.predicted_start
    }

    pub fn context(&self) -> &PacingContext {
        &self.core.context
    }

    /// Records a section boundary.
    pub fn mark(&self, section: SectionId, kind: MarkType, timestamp: Timestamp) {
        self.core.marks.lock().marks.push(Mark {
            section,
            kind,
            timestamp,
        });
    }

    /// Records a section boundary at the context's current time.
    pub fn mark_now(&self, section: SectionId, kind: MarkType) -> Timestamp {
        let now = self.core.context.now();
        self.mark(section, kind, now);
        now
    }

    /// Replaces this frame's measured queueing delay for `section`.
    pub fn override_queueing_delay(&self, section: SectionId, interval: Interval) {
        self.core
            .marks
            .lock()
            .overrides
            .queueing_delay
            .insert(section, interval);
    }

    /// Replaces this frame's measured duration for `section`.
    pub fn override_inverse_throughput(&self, section: SectionId, interval: Interval) {
        self.core
            .marks
            .lock()
            .overrides
            .inverse_throughput
            .insert(section, interval);
    }

    /// Excludes this frame from statistics.
    ///
    /// Marks may still be written but are dropped on release. Used for frames
    /// that straddle a pipeline reset or a known stall.
    pub fn discard(&self) {
        self.core.discarded.store(true, Ordering::Release);
    }

    pub fn is_discarded(&self) -> bool {
        self.core.discarded.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same frame.
    pub fn ptr_eq(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.core, &b.core)
    }

    /// Number of live references to this frame.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    /// Leaks one reference as a raw pointer for an opaque-handle ABI.
    pub fn into_raw(this: Frame) -> *const FrameCore {
        Arc::into_raw(this.core)
    }

    /// Reclaims a reference produced by [`Frame::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and its reference must not have been
    /// reclaimed already.
    pub unsafe fn from_raw(ptr: *const FrameCore) -> Frame {
        // SAFETY: forwarded from the caller.
        Frame { core: unsafe { Arc::from_raw(ptr) } }
    }

    /// Borrows a raw handle as a `Frame` without touching its count.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`.
    pub unsafe fn with_raw<R>(ptr: *const FrameCore, f: impl FnOnce(&Frame) -> R) -> R {
        // SAFETY: the caller guarantees a live reference; ManuallyDrop keeps
        // the count unchanged.
        let frame = std::mem::ManuallyDrop::new(unsafe { Frame::from_raw(ptr) });
        f(&frame)
    }

    /// AddRef on a raw handle.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`.
    pub unsafe fn increment_raw(ptr: *const FrameCore) {
        // SAFETY: forwarded from the caller.
        unsafe { Arc::increment_strong_count(ptr) }
    }

    /// Release on a raw handle; the last one folds the frame back.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from `into_raw`, and the reference being
    /// released must not be used again.
    pub unsafe fn decrement_raw(ptr: *const FrameCore) {
        // SAFETY: forwarded from the caller.
        unsafe { Arc::decrement_strong_count(ptr) }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.core.id)
            .field("predicted_start", &self.core.predicted_start)
            .field("discarded", &self.is_discarded())
            .finish()
    }
}

impl Drop for FrameCore {
    fn drop(&mut self) {
        // The Arc count reaching zero synchronises with every writer, so the
        // marks are complete here.
        let collected = std::mem::take(self.marks.get_mut());
        let record = if self.discarded.load(Ordering::Acquire) {
            None
        } else {
            Some(FrameRecord::new(collected))
        };
        self.context.retire(self.id, record);
    }
}
