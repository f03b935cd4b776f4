//! Pulse Implementation
//!
//! A pulse is the fundamental reactive primitive. It holds a value and
//! tracks which readers depend on it.
//!
//! # How Pulses Work
//!
//! 1. When a pulse is read within a running reader (computed/effect), the
//!    pulse registers that reader as a subscriber.
//!
//! 2. When a pulse's value changes, all subscribers are invalidated.
//!
//! 3. Invalidation re-runs dependent effects, immediately or at the end of
//!    the enclosing batch, and marks dependent computeds dirty.
//!
//! # Equality
//!
//! By default a write that compares equal to the current value is dropped
//! without notifying anyone. Contexts (and individual pulses) can opt into
//! [`Equality::AlwaysNotify`] instead.
//!
//! # Memory Layout
//!
//! Each pulse consists of:
//! - A unique node ID (8 bytes)
//! - A weak reference to its context's runtime
//! - The value, behind a `RefCell`
//!
//! Subscribers live in the context's graph, not in the pulse.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::runtime::{self, Runtime};
use crate::config::Equality;
use crate::error::{raise, Result};
use crate::graph::NodeId;

struct PulseInner<T> {
    /// Unique identifier for this pulse.
    id: NodeId,

    /// The context the pulse was created in.
    runtime: Weak<Runtime>,

    /// The current value.
    value: RefCell<T>,

    /// Write policy.
    equality: Equality,
}

impl<T> Drop for PulseInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_source(self.id);
        }
    }
}

/// A reactive cell holding a value of type T.
///
/// Cloning a pulse yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use pulse_core::pulse;
///
/// let count = pulse(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.peek(), 5);
/// ```
pub struct Pulse<T: 'static> {
    inner: Rc<PulseInner<T>>,
}

impl<T> Pulse<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new pulse in the active context.
    pub fn new(value: T) -> Self {
        let runtime = runtime::current();
        let equality = runtime.options().equality;
        Self::create(&runtime, value, equality)
    }

    /// Create a new pulse with its own equality policy.
    pub fn with_equality(value: T, equality: Equality) -> Self {
        Self::create(&runtime::current(), value, equality)
    }

    fn create(runtime: &Rc<Runtime>, value: T, equality: Equality) -> Self {
        let id = NodeId::new();
        runtime.register_source(id);
        Self {
            inner: Rc::new(PulseInner {
                id,
                runtime: Rc::downgrade(runtime),
                value: RefCell::new(value),
                equality,
            }),
        }
    }

    /// Attach a devtools label.
    pub fn with_label(self, label: &str) -> Self {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.set_label(self.inner.id, label);
        }
        self
    }

    /// Get the pulse's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The equality policy applied to writes.
    pub fn equality(&self) -> Equality {
        self.inner.equality
    }

    /// Get the current value.
    ///
    /// If called while a reader is running, this also registers the reader
    /// as a subscriber.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Read the current value by reference, tracking like [`Pulse::get`].
    ///
    /// Writing to this pulse from inside `f` fails with a circular
    /// dependency error.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this when you need to read the value without establishing
    /// a reactive dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id);
        }
    }

    /// Set a new value and notify subscribers.
    ///
    /// # Panics
    ///
    /// Panics if the write is rejected or a re-run effect fails; see
    /// [`Pulse::try_set`].
    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            raise(err);
        }
    }

    /// Set a new value and notify subscribers.
    ///
    /// Fails without writing if the write would re-trigger a reader that is
    /// currently running. Errors from effects re-run by this write are
    /// returned after the value has been stored.
    pub fn try_set(&self, value: T) -> Result<()> {
        let changed = self.inner.equality.changed(&*self.inner.value.borrow(), &value);
        if !changed {
            return Ok(());
        }

        let runtime = self.inner.runtime.upgrade();
        if let Some(runtime) = &runtime {
            runtime.check_write(self.inner.id)?;
        }

        match self.inner.value.try_borrow_mut() {
            Ok(mut slot) => *slot = value,
            Err(_) => {
                return Err(match &runtime {
                    Some(runtime) => runtime.circular(self.inner.id),
                    None => crate::ReactiveError::CircularDependency {
                        node: self.inner.id,
                        label: None,
                    },
                })
            }
        }

        match runtime {
            Some(runtime) => runtime.notify_changed(self.inner.id),
            None => Ok(()),
        }
    }

    /// Update the value using a function of the current value.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Pulse::set`].
    #[track_caller]
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        if let Err(err) = self.try_update(f) {
            raise(err);
        }
    }

    /// Fallible form of [`Pulse::update`].
    pub fn try_update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let current = self.inner.value.borrow();
            f(&current)
        };
        self.try_set(next)
    }

    /// Get the number of readers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependent_count(self.inner.id))
    }

    /// Whether the pulse is still registered with a live context.
    ///
    /// Pulses are forgotten when their context is reset or dropped; they
    /// keep their value but stop notifying.
    pub fn is_live(&self) -> bool {
        self.inner
            .runtime
            .upgrade()
            .is_some_and(|runtime| runtime.contains(self.inner.id))
    }
}

impl<T: 'static> Clone for Pulse<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Pulse<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pulse")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a pulse in the active context.
pub fn pulse<T>(value: T) -> Pulse<T>
where
    T: Clone + PartialEq + 'static,
{
    Pulse::new(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
