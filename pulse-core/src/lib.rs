//! Pulse Core
//!
//! This crate provides the fine-grained reactive engine behind the Pulse
//! framework. It implements:
//!
//! - Reactive primitives (pulses, computeds, effects)
//! - Automatic, per-run dependency tracking
//! - Batching with a pluggable flush policy
//! - Disposable contexts for request-scoped server rendering
//! - Devtools hooks and graph snapshots
//!
//! Rendering, routing, forms and hydration live in other crates and only
//! use the primitive surface re-exported here.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, contexts and dependency tracking
//! - `graph`: Dependency graph, dirty propagation and snapshots
//! - `config`: Per-context policies
//! - `inspect`: Devtools observer hooks
//!
//! # Threading
//!
//! The engine is single-threaded: primitives are `!Send` and every thread
//! gets its own default context. Only [`Recorder`] stats cross threads.
//!
//! # Example
//!
//! ```rust
//! use pulse_core::{batch, computed, effect, pulse};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! // Create a pulse
//! let count = pulse(1);
//!
//! // Create a derived value
//! let doubled = computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect; it runs immediately
//! let _logger = effect({
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || log.borrow_mut().push((count.get(), doubled.get()))
//! });
//!
//! // Update the pulse; the effect re-runs synchronously
//! count.set(5);
//!
//! // Several writes, one re-run
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! });
//!
//! assert_eq!(*log.borrow(), vec![(1, 2), (5, 10), (7, 14)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod inspect;
pub mod reactive;

pub use config::{ContextOptions, Equality, FlushPolicy, RenderMode, DEFAULT_MAX_FLUSH_ITERATIONS};
pub use error::{BoxError, ReactiveError, Result};
pub use graph::{GraphSnapshot, NodeId, NodeKind};
pub use inspect::{Inspector, NodeStats, Recorder};
pub use reactive::{
    batch, computed, create_context, effect, flush, is_batching, is_tracking, on_cleanup, pulse,
    reset_context, try_batch, try_computed, try_effect, untrack, Computed, Context, Effect, Pulse,
    ReaderState,
};

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
