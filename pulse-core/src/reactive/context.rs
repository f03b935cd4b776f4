//! Reactive Contexts
//!
//! A context is an isolated reactive root. It owns a dependency graph, a
//! tracking stack and batch state, and every pulse, computed and effect
//! created while it is active registers with it.
//!
//! Server renders use one context per request: render inside
//! [`Context::run`], then [`Context::reset`] (or drop the context) to tear
//! down every effect and forget every pulse in one step.
//!
//! Code that never creates a context uses the thread's default one.

use std::fmt::Debug;
use std::rc::Rc;

use super::runtime::{self, ActivationGuard, Runtime};
use crate::config::ContextOptions;
use crate::error::Result;
use crate::graph::GraphSnapshot;
use crate::inspect::Inspector;

/// Handle to an isolated reactive root.
///
/// Clones share the same root. The root is torn down when the last handle
/// is dropped; primitives created in it keep working as plain cells.
///
/// # Example
///
/// ```rust
/// use pulse_core::{effect, pulse, Context, ContextOptions};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ctx = Context::new(ContextOptions::server().with_label("request"));
/// let renders = Rc::new(Cell::new(0));
///
/// let title = ctx.run(|| {
///     let title = pulse("Home".to_string());
///     let _ = effect({
///         let (title, renders) = (title.clone(), renders.clone());
///         move || {
///             title.get();
///             renders.set(renders.get() + 1);
///         }
///     });
///     title
/// });
///
/// // Server-mode effects run once and keep no subscriptions.
/// title.set("About".to_string());
/// assert_eq!(renders.get(), 1);
///
/// ctx.reset();
/// assert_eq!(ctx.node_count(), 0);
/// ```
#[derive(Clone)]
pub struct Context {
    runtime: Rc<Runtime>,
}

impl Context {
    /// Create a new, inactive context.
    pub fn new(options: ContextOptions) -> Self {
        Self {
            runtime: Runtime::new(options),
        }
    }

    /// Handle to the context that is active on this thread.
    pub fn current() -> Self {
        Self {
            runtime: runtime::current(),
        }
    }

    /// Run `f` with this context active.
    ///
    /// Primitives created inside `f` register with this context. The
    /// previously active context is restored afterwards, also on panic.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _active = ActivationGuard::enter(Rc::clone(&self.runtime));
        f()
    }

    /// Whether this context is the active one on this thread.
    pub fn is_active(&self) -> bool {
        Rc::ptr_eq(&runtime::current(), &self.runtime)
    }

    /// Dispose every reader, run root cleanups and forget every pulse.
    ///
    /// The context stays usable afterwards.
    pub fn reset(&self) {
        self.runtime.reset();
    }

    /// Run every pending effect.
    ///
    /// Only needed with [`FlushPolicy::Manual`](crate::FlushPolicy); under
    /// the default policy the queue is drained as soon as writes happen.
    pub fn flush(&self) -> Result<()> {
        self.runtime.flush()
    }

    /// Register a hook called whenever the pending queue goes from empty to
    /// non-empty under [`FlushPolicy::Manual`](crate::FlushPolicy).
    ///
    /// Hosts use it to schedule a [`Context::flush`] on their own event loop.
    pub fn on_schedule<F>(&self, hook: F)
    where
        F: Fn() + 'static,
    {
        self.runtime.set_schedule_hook(Some(Rc::new(hook)));
    }

    pub fn clear_schedule_hook(&self) {
        self.runtime.set_schedule_hook(None);
    }

    pub fn options(&self) -> &ContextOptions {
        self.runtime.options()
    }

    pub fn label(&self) -> &str {
        self.runtime.label()
    }

    /// Attach an inspector that observes every node of this context.
    pub fn set_inspector<I>(&self, inspector: I)
    where
        I: Inspector + 'static,
    {
        self.runtime.set_inspector(Some(Rc::new(inspector)));
    }

    pub fn clear_inspector(&self) {
        self.runtime.set_inspector(None);
    }

    /// Capture the live dependency graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.runtime.snapshot()
    }

    /// Number of live nodes (pulses and readers).
    pub fn node_count(&self) -> usize {
        self.runtime.node_count()
    }

    /// Number of live computeds and effects.
    pub fn reader_count(&self) -> usize {
        self.runtime.reader_count()
    }

    /// Number of effects waiting for a flush.
    pub fn pending_count(&self) -> usize {
        self.runtime.pending_count()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("label", &self.label())
            .field("mode", &self.options().mode)
            .field("nodes", &self.node_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Create an isolated reactive root.
pub fn create_context(options: ContextOptions) -> Context {
    Context::new(options)
}

/// Reset the active context.
pub fn reset_context() {
    runtime::current().reset();
}
