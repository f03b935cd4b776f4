//! Computed Implementation
//!
//! A computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. Creating a computed does not run it. The first read evaluates it and
//!    caches the result.
//!
//! 2. When read again, if no dependencies have changed, returns the cached value.
//!
//! 3. When a pulse it read changes, the computed is marked "dirty"; when a
//!    computed it read is invalidated, it is marked "maybe dirty".
//!
//! 4. On next read, a maybe-dirty computed first brings its upstream
//!    computeds up to date. If none of them produced a new value, it is
//!    marked clean and the cache is returned.
//!
//! 5. Otherwise it recomputes, exactly once, and if the new value differs
//!    from the cached one its own dependents are marked dirty.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation and is glitch-free:
//!
//! - A pulse changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - A diamond (`base -> left, right -> effect`) recomputes `left` and
//!   `right` once each, and the effect sees both new values together

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::runtime::{self, Runtime};
use super::subscriber::{ReaderSlot, ReaderState, Subscriber};
use crate::config::Equality;
use crate::error::{raise, Result};
use crate::graph::{NodeId, NodeKind};

struct ComputedInner<T> {
    /// Unique identifier for this computed.
    id: NodeId,

    /// The context the computed was created in.
    runtime: Weak<Runtime>,

    /// The computation function.
    compute: Box<dyn Fn() -> Result<T>>,

    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,

    /// Decides whether a recomputation changed the value.
    equality: Equality,

    state: Cell<ReaderState>,

    /// Number of times the computation ran.
    evaluations: Cell<u64>,
}

impl<T> Subscriber for ComputedInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn run(&self, runtime: &Rc<Runtime>) -> Result<bool> {
        if self.state.get() == ReaderState::Disposed {
            return Ok(false);
        }

        let result = runtime.run_reader(self.id, true, || (self.compute)());
        let new_value = match result {
            Ok(value) => value,
            Err(err) => {
                // Retry on the next read.
                runtime.mark_dirty(self.id);
                return Err(err);
            }
        };

        self.evaluations.set(self.evaluations.get() + 1);
        if self.state.get() == ReaderState::Idle {
            self.state.set(ReaderState::Active);
        }

        let changed = match &*self.value.borrow() {
            Some(old) => self.equality.changed(old, &new_value),
            None => true,
        };
        *self.value.borrow_mut() = Some(new_value);
        Ok(changed)
    }

    fn mark_disposed(&self) {
        self.state.set(ReaderState::Disposed);
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_node(self.id);
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some computeds return the same value even if inputs changed), so
/// downstream effects can skip their run.
///
/// # Example
///
/// ```rust
/// use pulse_core::{computed, pulse};
///
/// let count = pulse(5);
/// let doubled = computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 10);
/// count.set(7);
/// assert_eq!(doubled.get(), 14);
/// ```
pub struct Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new computed with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::create(Box::new(move || Ok(compute())))
    }

    /// Create a computed whose computation can fail.
    ///
    /// Errors are returned from [`Computed::try_get`] and leave the computed
    /// dirty, so the next read retries.
    pub fn try_new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::create(Box::new(compute))
    }

    fn create(compute: Box<dyn Fn() -> Result<T>>) -> Self {
        let runtime = runtime::current();
        let id = NodeId::new();
        let inner = Rc::new(ComputedInner {
            id,
            runtime: Rc::downgrade(&runtime),
            compute,
            value: RefCell::new(None),
            equality: runtime.options().equality,
            state: Cell::new(ReaderState::Idle),
            evaluations: Cell::new(0),
        });
        let slot = Rc::downgrade(&inner) as Weak<dyn Subscriber>;
        runtime.register_reader(id, NodeKind::Derived, ReaderSlot::Shared(slot));
        Self { inner }
    }

    /// Attach a devtools label.
    pub fn with_label(self, label: &str) -> Self {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.set_label(self.inner.id, label);
        }
        self
    }

    /// Get the computed's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computation reads itself or fails; see
    /// [`Computed::try_get`].
    #[track_caller]
    pub fn get(&self) -> T {
        self.try_get().unwrap_or_else(|err| raise(err))
    }

    /// Get the current value, recomputing if necessary, and register the
    /// running reader (if any) as a dependent.
    pub fn try_get(&self) -> Result<T> {
        let inner = &self.inner;
        let runtime = match inner.runtime.upgrade() {
            Some(runtime) if inner.state.get() != ReaderState::Disposed => runtime,
            _ => return self.evaluate_detached(),
        };

        if runtime.is_running(inner.id) {
            return Err(runtime.circular(inner.id));
        }

        runtime.update_if_necessary(inner.id)?;
        runtime.track(inner.id);

        let cached = inner.value.borrow().clone();
        match cached {
            Some(value) => Ok(value),
            // Disposed while computing; fall back to a plain evaluation.
            None => self.evaluate_detached(),
        }
    }

    /// Get the current value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Computed::get`].
    #[track_caller]
    pub fn peek(&self) -> T {
        self.try_peek().unwrap_or_else(|err| raise(err))
    }

    /// Fallible form of [`Computed::peek`].
    pub fn try_peek(&self) -> Result<T> {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.untracked(|| self.try_get()),
            None => self.try_get(),
        }
    }

    /// A disposed computed keeps working as a plain function of its inputs.
    fn evaluate_detached(&self) -> Result<T> {
        self.inner.evaluations.set(self.inner.evaluations.get() + 1);
        (self.inner.compute)()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.inner.state.get()
    }

    /// Whether a value is cached.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of times the computation has run.
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.get()
    }

    /// Get the number of readers currently subscribed.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependent_count(self.inner.id))
    }

    /// Get the number of nodes the last evaluation read.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.inner.id))
    }

    /// Dispose the computed: drop its subscriptions and run its cleanups.
    ///
    /// Reads after disposal evaluate the computation directly.
    pub fn dispose(&self) {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.dispose_node(self.inner.id),
            None => self.inner.mark_disposed(),
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// Create a lazily evaluated computed in the active context.
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(compute)
}

/// Create a computed whose evaluation can fail.
pub fn try_computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> Result<T> + 'static,
{
    Computed::try_new(compute)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
