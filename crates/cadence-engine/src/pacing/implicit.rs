use std::collections::VecDeque;

use parking_lot::Mutex;

use super::context::PacingContext;
use super::frame::Frame;
use crate::config::PacingConfig;
use crate::error::PacingError;
use crate::Timestamp;

/// How a consumer picks a frame from an [`ImplicitContext`].
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DequeueMode {
    /// Take the oldest frame, removing it from the queue.
    Ordered = 0,
    /// Borrow the newest frame, leaving it queued. For latency-critical
    /// consumers such as input sampling.
    Critical = 1,
}

impl TryFrom<u32> for DequeueMode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(Self::Ordered),
            1 => Ok(Self::Critical),
            other => Err(other),
        }
    }
}

/// A [`PacingContext`] that also queues the frames it creates.
///
/// For pipelines where the stage that starts a frame cannot hand the handle
/// to later stages directly: producers call [`ImplicitContext::create_frame`],
/// consumers fetch the handle with [`ImplicitContext::dequeue`].
pub struct ImplicitContext {
    context: PacingContext,
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl ImplicitContext {
    pub fn new() -> Self {
        Self::from_context(PacingContext::new())
    }

    pub fn with_config(config: PacingConfig) -> Result<Self, PacingError> {
        Ok(Self::from_context(PacingContext::with_config(config)?))
    }

    /// Wraps an already-built context, e.g. one with a custom clock.
    pub fn from_context(context: PacingContext) -> Self {
        let capacity = context.config().queue_capacity;
        Self {
            context,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn context(&self) -> &PacingContext {
        &self.context
    }

    /// Creates a frame and queues one reference to it.
    ///
    /// Returns the caller's own reference and the frame's target start. The
    /// queue lock is held across creation so queue order matches creation
    /// order. When the queue is full the oldest frame is discarded.
    pub fn create_frame(&self) -> (Frame, Timestamp) {
        let (frame, target, evicted) = {
            let mut queue = self.queue.lock();
            let (frame, target) = self.context.create_frame();

            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(frame.clone());
            (frame, target, evicted)
        };

        // Released outside the queue lock; fold-back takes the context lock.
        if let Some(stale) = evicted {
            log::warn!(
                "implicit frame queue full ({}), discarding frame {}",
                self.capacity,
                stale.id()
            );
            stale.discard();
        }
        (frame, target)
    }

    /// Fetches a queued frame, or `None` when the queue is empty.
    ///
    /// The caller owns the returned reference; in [`DequeueMode::Critical`]
    /// the queue keeps its own.
    pub fn dequeue(&self, mode: DequeueMode) -> Option<Frame> {
        let mut queue = self.queue.lock();
        match mode {
            DequeueMode::Ordered => queue.pop_front(),
            DequeueMode::Critical => queue.back().cloned(),
        }
    }

    /// Discards and releases every queued frame.
    ///
    /// The context's cadence baseline restarts too, so the first frame after
    /// the reset is not measured against the last one before it.
    pub fn reset(&self) {
        let drained: Vec<Frame> = self.queue.lock().drain(..).collect();
        if !drained.is_empty() {
            log::info!("implicit context reset, discarding {} frames", drained.len());
        }
        for frame in &drained {
            frame.discard();
        }
        drop(drained);
        self.context.restart_cadence();
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for ImplicitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ImplicitContext {
    fn drop(&mut self) {
        let queued = self.queue.get_mut().len();
        if queued > 0 {
            log::debug!("implicit context dropped with {queued} queued frames");
        }
    }
}
