//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is re-run synchronously, or
//!    queued until the enclosing batch (or manual flush) completes.
//!
//! 3. Before re-running, the effect disposes the readers it created, runs
//!    its cleanups and clears its old dependencies, then tracks new ones
//!    during execution.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps change).
//! - Computeds are dropped with their last handle; effects live until disposed.
//!
//! # Cleanup
//!
//! Call [`on_cleanup`](crate::on_cleanup) from inside the body to register
//! teardown work. It runs before the next run and when the effect is
//! disposed. This is useful for cleaning up resources like event listeners
//! or timers.
//!
//! # Server Mode
//!
//! In a context created with [`RenderMode::Server`](crate::RenderMode), the
//! body runs once with tracking switched off, so the effect never re-runs.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::runtime::{self, Runtime};
use super::subscriber::{ReaderSlot, ReaderState, Subscriber};
use crate::error::{raise, ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

type Body = Box<dyn FnMut() -> Result<()>>;

struct EffectInner {
    /// Unique identifier for this effect.
    id: NodeId,

    runtime: Weak<Runtime>,

    /// The effect function.
    body: RefCell<Body>,

    state: Cell<ReaderState>,

    /// Number of times the effect has run.
    run_count: Cell<u64>,
}

impl Subscriber for EffectInner {
    fn run(&self, runtime: &Rc<Runtime>) -> Result<bool> {
        if self.state.get() == ReaderState::Disposed {
            return Ok(false);
        }

        let tracking = !runtime.options().is_server();
        let result = runtime.run_reader(self.id, tracking, || match self.body.try_borrow_mut() {
            Ok(mut body) => body(),
            Err(_) => Err(runtime.circular(self.id)),
        });

        self.run_count.set(self.run_count.get() + 1);
        if self.state.get() == ReaderState::Idle {
            self.state.set(ReaderState::Active);
        }
        result.map(|()| true)
    }

    fn mark_disposed(&self) {
        self.state.set(ReaderState::Disposed);
        // Release captured handles now; the body may own a handle to this effect.
        if let Ok(mut body) = self.body.try_borrow_mut() {
            let old = std::mem::replace(&mut *body, Box::new(|| Ok(())));
            drop(body);
            drop(old);
        }
    }
}

/// Disposes a half-created effect if its first run panics.
struct DisposeOnPanic<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for DisposeOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.runtime.dispose_node(self.id);
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Dropping the handle does not stop the effect; call [`Effect::dispose`]
/// or reset its context.
///
/// # Example
///
/// ```rust
/// use pulse_core::{effect, pulse};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = pulse(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let watcher = effect({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.set(count.get())
/// });
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
///
/// watcher.dispose();
/// count.set(6);
/// assert_eq!(seen.get(), 5);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    ///
    /// # Panics
    ///
    /// Panics if the first run fails; see [`Effect::try_new`].
    #[track_caller]
    pub fn new<F>(mut body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::try_new(move || {
            body();
            Ok(())
        })
        .unwrap_or_else(|err| raise(err))
    }

    /// Create an effect whose body can fail.
    ///
    /// If the first run fails the effect is disposed and the error returned.
    /// Failures of later runs surface from the write that triggered them.
    pub fn try_new<F>(body: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        let runtime = runtime::current();
        let id = NodeId::new();
        let inner = Rc::new(EffectInner {
            id,
            runtime: Rc::downgrade(&runtime),
            body: RefCell::new(Box::new(body)),
            state: Cell::new(ReaderState::Idle),
            run_count: Cell::new(0),
        });
        let slot: Rc<dyn Subscriber> = inner.clone();
        runtime.register_reader(id, NodeKind::Effect, ReaderSlot::Owned(slot));

        let guard = DisposeOnPanic {
            runtime: &runtime,
            id,
        };
        let first_run = runtime.update_if_necessary(id);
        drop(guard);

        match first_run {
            Ok(()) => Ok(Self { inner }),
            Err(err) => {
                runtime.dispose_node(id);
                Err(err)
            }
        }
    }

    /// Attach a devtools label.
    pub fn with_label(self, label: &str) -> Self {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.set_label(self.inner.id, label);
        }
        self
    }

    /// Get the effect's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.inner.state.get()
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state() == ReaderState::Disposed
    }

    /// Get the number of times this effect has run.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.get()
    }

    /// Get the number of nodes the last run read.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.inner.id))
    }

    /// Re-run the effect now, regardless of whether its inputs changed.
    pub fn trigger(&self) -> Result<()> {
        let runtime = match self.inner.runtime.upgrade() {
            Some(runtime) if !self.is_disposed() => runtime,
            _ => return Err(ReactiveError::Disposed(self.inner.id)),
        };
        if runtime.is_running(self.inner.id) {
            return Err(runtime.circular(self.inner.id));
        }
        runtime.mark_dirty(self.inner.id);
        runtime.update_if_necessary(self.inner.id)
    }

    /// Dispose the effect.
    ///
    /// Disposes the readers it created, runs its cleanups and drops its
    /// subscriptions. Calling this again does nothing.
    pub fn dispose(&self) {
        match self.inner.runtime.upgrade() {
            Some(runtime) => runtime.dispose_node(self.inner.id),
            None => self.inner.mark_disposed(),
        }
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .finish()
    }
}

/// Create an effect in the active context and run it once.
///
/// # Panics
///
/// Panics if the first run fails; use [`try_effect`] for fallible bodies.
#[track_caller]
pub fn effect<F>(body: F) -> Effect
where
    F: FnMut() + 'static,
{
    Effect::new(body)
}

/// Create an effect with a fallible body and run it once.
pub fn try_effect<F>(body: F) -> Result<Effect>
where
    F: FnMut() -> Result<()> + 'static,
{
    Effect::try_new(body)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{on_cleanup, pulse, Context, ContextOptions};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn effect_runs_immediately() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let effect = Effect::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.state(), ReaderState::Active);
    }

    #[test]
    fn effect_can_be_disposed() {
        let count = pulse(0);
        let call_count = Arc::new(AtomicI32::new(0));

        let effect = {
            let count = count.clone();
            let call_count = call_count.clone();
            Effect::new(move || {
                count.get();
                call_count.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(!effect.is_disposed());
        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(count.subscriber_count(), 0);

        count.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let cleanups = Arc::new(AtomicI32::new(0));
        let effect = {
            let cleanups = cleanups.clone();
            Effect::new(move || {
                let cleanups = cleanups.clone();
                on_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        effect.dispose();
        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependencies_are_retracked_each_run() {
        let show = pulse(true);
        let detail = pulse(1);
        let runs = Arc::new(AtomicI32::new(0));

        let effect = {
            let (show, detail, runs) = (show.clone(), detail.clone(), runs.clone());
            Effect::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if show.get() {
                    detail.get();
                }
            })
        };
        assert_eq!(effect.dependency_count(), 2);

        show.set(false);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 1);

        // No longer read, so no longer tracked
        detail.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writing_own_dependency_is_circular() {
        let count = pulse(0);
        let err = {
            let count = count.clone();
            Effect::try_new(move || {
                let next = count.get() + 1;
                count.try_set(next)
            })
        }
        .unwrap_err();

        assert!(err.is_circular());
        assert_eq!(count.peek(), 0);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn failing_first_run_disposes_the_effect() {
        let source = pulse(1);
        let result = {
            let source = source.clone();
            Effect::try_new(move || {
                source.get();
                Err(ReactiveError::user("boom"))
            })
        };

        assert!(matches!(result, Err(ReactiveError::User(_))));
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn later_failures_surface_from_the_write() {
        let source = pulse(1);
        let _effect = {
            let source = source.clone();
            Effect::try_new(move || {
                if source.get() > 1 {
                    return Err(ReactiveError::user("too large"));
                }
                Ok(())
            })
            .unwrap()
        };

        let err = source.try_set(2).unwrap_err();
        assert_eq!(err.to_string(), "reactive body failed: too large");
        assert_eq!(source.peek(), 2);
    }

    #[test]
    fn panicking_first_run_disposes_the_effect() {
        let ctx = Context::new(ContextOptions::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.run(|| Effect::new(|| panic!("effect body failed")))
        }));

        assert!(result.is_err());
        assert_eq!(ctx.reader_count(), 0);
    }

    #[test]
    fn trigger_reruns_and_rejects_disposed() {
        let effect = Effect::new(|| {});
        effect.trigger().unwrap();
        assert_eq!(effect.run_count(), 2);

        effect.dispose();
        let err = effect.trigger().unwrap_err();
        assert!(matches!(err, ReactiveError::Disposed(id) if id == effect.id()));
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect() {
        let count = pulse(0);
        let runs = Arc::new(AtomicI32::new(0));
        {
            let (count, runs) = (count.clone(), runs.clone());
            drop(Effect::new(move || {
                count.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }));
        }

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn server_mode_runs_once_without_subscriptions() {
        let ctx = Context::new(ContextOptions::server());
        let (count, effect) = ctx.run(|| {
            let count = pulse(0);
            let effect = {
                let count = count.clone();
                Effect::new(move || {
                    count.get();
                })
            };
            (count, effect)
        });

        assert_eq!(effect.run_count(), 1);
        assert_eq!(count.subscriber_count(), 0);

        count.set(1);
        assert_eq!(effect.run_count(), 1);
    }
}
