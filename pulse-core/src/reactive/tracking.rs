//! Dependency Tracking
//!
//! The tracking stack records which reader is currently running. This
//! enables automatic dependency tracking: when a pulse is read, we can
//! register the current reader as a dependent.
//!
//! # Implementation
//!
//! Every context owns its own stack, so two contexts rendering on the same
//! thread never see each other's readers. When a reader runs we push a frame
//! and when it completes we pop it; `untrack` pushes a frame with tracking
//! switched off. Frames are pushed through [`TrackingGuard`], so the stack is
//! unwound even if the body panics.
//!
//! This design supports nested readers (e.g. a computed read from inside an
//! effect, or an effect created inside another effect).

use std::cell::RefCell;

use crate::error::ReactiveError;
use crate::graph::NodeId;

/// An entry in the tracking stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    /// The reader that owns this frame. `None` at the context root.
    pub reader: Option<NodeId>,
    /// Whether reads inside this frame register dependencies.
    pub tracking: bool,
}

impl Frame {
    pub fn tracked(reader: NodeId) -> Self {
        Self {
            reader: Some(reader),
            tracking: true,
        }
    }

    pub fn untracked(reader: Option<NodeId>) -> Self {
        Self {
            reader,
            tracking: false,
        }
    }
}

/// Per-context stack of running readers.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: RefCell<Vec<Frame>>,
}

impl TrackingStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reader that should record a dependency right now, if any.
    pub fn tracking_reader(&self) -> Option<NodeId> {
        self.frames
            .borrow()
            .last()
            .filter(|frame| frame.tracking)
            .and_then(|frame| frame.reader)
    }

    /// The reader that owns new cleanups and child readers, tracked or not.
    pub fn owner(&self) -> Option<NodeId> {
        self.frames.borrow().last().and_then(|frame| frame.reader)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking_reader().is_some()
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    fn push(&self, frame: Frame) {
        self.frames.borrow_mut().push(frame);
    }

    fn pop(&self, expected: Frame) -> Result<(), ReactiveError> {
        let popped = self.frames.borrow_mut().pop();
        match popped {
            Some(frame) if frame == expected => Ok(()),
            other => Err(ReactiveError::TrackingStackCorrupted {
                expected: expected.reader,
                found: other.and_then(|f| f.reader),
            }),
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// This ensures the tracking stack is properly maintained even if the
/// reader panics.
pub(crate) struct TrackingGuard<'a> {
    stack: &'a TrackingStack,
    frame: Frame,
}

impl<'a> TrackingGuard<'a> {
    pub fn enter(stack: &'a TrackingStack, frame: Frame) -> Self {
        stack.push(frame);
        Self { stack, frame }
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.stack.pop(self.frame) {
            tracing::error!(error = %err, "tracking stack out of balance");
            if !std::thread::panicking() {
                debug_assert!(false, "{err}");
            }
        }
    }
}
