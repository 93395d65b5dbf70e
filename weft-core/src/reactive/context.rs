//! The active-computation stack.
//!
//! The stack tracks which computation is currently running so that cell
//! reads can be attributed to it. When a computation starts it pushes a
//! frame; when it finishes the frame pops and whatever was running before
//! becomes active again.
//!
//! A stack (rather than a single slot) is what makes nesting work: after a
//! nested computation finishes, further reads inside the parent's body are
//! attributed to the parent, not lost or misattributed to the finished
//! child.
//!
//! # Panic Safety
//!
//! Popping happens in the drop of an RAII guard. If a computation body
//! panics, the frame still pops while the panic unwinds, so subsequent
//! tracking in unrelated computations is not corrupted.

use std::sync::Weak;

use parking_lot::Mutex;

use super::cell::ComputationId;
use super::runtime::AnyComputation;

/// One entry on the stack: the running computation's id plus a weak handle
/// used to record dependencies on it.
#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) id: ComputationId,
    pub(crate) handle: Weak<dyn AnyComputation>,
}

/// The stack of currently-executing computations.
///
/// Owned by a `Runtime`; the lock is held only for push/pop/peek, never
/// while a computation body runs.
pub(crate) struct ComputationStack {
    frames: Mutex<Vec<Frame>>,
}

impl ComputationStack {
    pub(crate) fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    /// Push a frame for the given computation, making it the active one.
    ///
    /// The frame pops when the returned guard drops.
    pub(crate) fn enter(
        &self,
        id: ComputationId,
        handle: Weak<dyn AnyComputation>,
    ) -> ActiveGuard<'_> {
        self.frames.lock().push(Frame { id, handle });
        ActiveGuard { stack: self, id }
    }

    /// The frame of the computation currently being tracked, if any.
    pub(crate) fn active(&self) -> Option<Frame> {
        self.frames.lock().last().cloned()
    }

    /// The id of the computation currently being tracked, if any.
    pub(crate) fn active_id(&self) -> Option<ComputationId> {
        self.frames.lock().last().map(|frame| frame.id)
    }

    /// Whether any computation is currently being tracked.
    pub(crate) fn is_tracking(&self) -> bool {
        !self.frames.lock().is_empty()
    }
}

/// Guard that pops the active frame when dropped.
pub(crate) struct ActiveGuard<'a> {
    stack: &'a ComputationStack,
    id: ComputationId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.lock().pop();

        // Catch mismatched push/pop pairs early in debug builds.
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.id, self.id,
                "computation stack mismatch: expected {:?}, got {:?}",
                self.id, frame.id
            );
        }
    }
}
