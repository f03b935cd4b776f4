//! Subscriber types for the reactive system.
//!
//! A subscriber is any reader that depends on reactive values: effects and
//! computeds. The runtime only knows them through the [`Subscriber`] trait;
//! their typed state (closures, cached values) stays inside the handle types.

use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use super::runtime::Runtime;
use crate::error::Result;

/// Lifecycle of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    /// Created, body not yet executed.
    Idle,
    /// Has executed at least once and is still live.
    Active,
    /// Torn down. Terminal.
    Disposed,
}

/// A teardown callback registered with `on_cleanup`.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// A reader the runtime can execute.
pub(crate) trait Subscriber {
    /// Execute the reader's body.
    ///
    /// Returns whether downstream readers must treat the output as changed.
    /// Effects always report `true`; computeds compare old and new values.
    fn run(&self, runtime: &Rc<Runtime>) -> Result<bool>;

    /// Flip the reader into its terminal state.
    fn mark_disposed(&self);
}

/// How the runtime holds on to a reader.
pub(crate) enum ReaderSlot {
    /// Effects live until they are disposed, whether or not a handle remains.
    Owned(Rc<dyn Subscriber>),
    /// Computeds live as long as user code holds a handle.
    Shared(Weak<dyn Subscriber>),
}

impl ReaderSlot {
    pub fn upgrade(&self) -> Option<Rc<dyn Subscriber>> {
        match self {
            ReaderSlot::Owned(reader) => Some(Rc::clone(reader)),
            ReaderSlot::Shared(reader) => reader.upgrade(),
        }
    }
}
