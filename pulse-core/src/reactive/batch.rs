//! Batching and scoping helpers.
//!
//! These operate on the active context: inside a reader that is the
//! reader's own context, otherwise whatever [`Context::run`] activated or
//! the thread's default.
//!
//! [`Context::run`]: crate::Context::run

use super::runtime;
use crate::error::{raise, Result};

/// Run `f` with effect execution deferred until the outermost batch exits.
///
/// Every effect invalidated inside the batch runs at most once afterwards
/// and observes all writes made inside it.
///
/// # Panics
///
/// Panics if a flushed effect fails; see [`try_batch`].
///
/// # Example
///
/// ```rust
/// use pulse_core::{batch, effect, pulse};
///
/// let first = pulse("Ada".to_string());
/// let last = pulse("Lovelace".to_string());
/// let watcher = effect({
///     let (first, last) = (first.clone(), last.clone());
///     move || {
///         let _full = format!("{} {}", first.get(), last.get());
///     }
/// });
///
/// batch(|| {
///     first.set("Grace".to_string());
///     last.set("Hopper".to_string());
/// });
/// assert_eq!(watcher.run_count(), 2);
/// ```
#[track_caller]
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    try_batch(f).unwrap_or_else(|err| raise(err))
}

/// Fallible form of [`batch`].
///
/// `f` always runs to completion; the error comes from the flush at exit.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    let runtime = runtime::current();
    let out = {
        let _batch = runtime.begin_batch();
        f()
    };
    runtime.finish_batch()?;
    Ok(out)
}

/// Whether a batch is open in the active context.
pub fn is_batching() -> bool {
    runtime::current().batch_depth() > 0
}

/// Run `f` without registering dependencies and return its result.
///
/// Tracking is restored afterwards, also if `f` panics.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    runtime::current().untracked(f)
}

/// Whether reads right now would register a dependency.
pub fn is_tracking() -> bool {
    runtime::current().is_tracking()
}

/// Register teardown work with the running reader.
///
/// It runs before the reader's next run and when the reader is disposed.
/// Outside any reader the cleanup belongs to the active context and runs
/// when the context is reset.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    runtime::current().on_cleanup(Box::new(f));
}

/// Run every pending effect of the active context.
pub fn flush() -> Result<()> {
    runtime::current().flush()
}
