//! Reactive Primitives
//!
//! This module implements the core reactive system: pulses, computeds and
//! effects, plus batching and contexts.
//!
//! # Concepts
//!
//! ## Pulses
//!
//! A [`Pulse`] is a container for mutable state. When a pulse's value is read
//! while a computed or effect is running, the pulse automatically registers
//! that reader as a dependent. When the pulse's value changes, all
//! dependents are notified.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! lazily, on the first read after one of its dependencies changed.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects synchronize reactive state with external
//! systems, such as the DOM or a log.
//!
//! ## Contexts
//!
//! A [`Context`] is an isolated root that owns every primitive created while
//! it is active, and can tear them all down at once.
//!
//! # Implementation Notes
//!
//! Each context keeps its own tracking stack. When a pulse is read, we check
//! whether the stack has a tracking reader on top and, if so, record the
//! edge in the context's dependency graph.
//!
//! Propagation is push-pull: a write pushes dirty flags downstream and
//! queues effects; computeds are pulled up to date only when something
//! reads them, which keeps diamond-shaped graphs glitch-free.

mod batch;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;
mod tracking;

pub use batch::{batch, flush, is_batching, is_tracking, on_cleanup, try_batch, untrack};
pub use computed::{computed, try_computed, Computed};
pub use context::{create_context, reset_context, Context};
pub use effect::{effect, try_effect, Effect};
pub use signal::{pulse, Pulse};
pub use subscriber::ReaderState;
