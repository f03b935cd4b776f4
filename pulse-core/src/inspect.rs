//! Devtools hooks.
//!
//! An [`Inspector`] attached to a context is told about node creation,
//! labels, writes, reader runs and disposal. It observes only; nothing it
//! does changes how the graph propagates.
//!
//! [`Recorder`] is a ready-made inspector that aggregates per-node stats
//! behind a mutex, so a devtools thread can poll it while the reactive
//! thread keeps running.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::graph::{NodeId, NodeKind};

/// Observer of one context's reactive graph.
///
/// All methods default to no-ops.
pub trait Inspector {
    /// A pulse, computed or effect was registered.
    fn node_created(&self, id: NodeId, kind: NodeKind, owner: Option<NodeId>) {
        let _ = (id, kind, owner);
    }

    fn node_labeled(&self, id: NodeId, label: &str) {
        let _ = (id, label);
    }

    /// A node left the graph (disposed, dropped or reset).
    fn node_disposed(&self, id: NodeId) {
        let _ = id;
    }

    /// A pulse accepted a new value.
    fn source_written(&self, id: NodeId) {
        let _ = id;
    }

    /// A computed or effect finished a run.
    fn reader_ran(&self, id: NodeId, elapsed: Duration) {
        let _ = (id, elapsed);
    }
}

/// Aggregated activity of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
    pub owner: Option<NodeId>,
    /// Completed runs (readers only).
    pub runs: u64,
    /// Accepted writes (pulses only).
    pub writes: u64,
    pub total_time: Duration,
    pub last_time: Option<Duration>,
    pub disposed: bool,
}

impl NodeStats {
    fn new(id: NodeId, kind: NodeKind, owner: Option<NodeId>) -> Self {
        Self {
            id,
            kind,
            label: None,
            owner,
            runs: 0,
            writes: 0,
            total_time: Duration::ZERO,
            last_time: None,
            disposed: false,
        }
    }

    /// Mean run time, if the node ran at all.
    pub fn mean_time(&self) -> Option<Duration> {
        u32::try_from(self.runs)
            .ok()
            .filter(|runs| *runs > 0)
            .map(|runs| self.total_time / runs)
    }
}

/// Inspector that records per-node stats.
///
/// Clones share the same storage: keep one clone, attach the other with
/// [`Context::set_inspector`](crate::Context::set_inspector).
///
/// # Example
///
/// ```rust
/// use pulse_core::{effect, pulse, Context, ContextOptions, Recorder};
///
/// let ctx = Context::new(ContextOptions::default());
/// let recorder = Recorder::new();
/// ctx.set_inspector(recorder.clone());
///
/// let count = ctx.run(|| {
///     let count = pulse(0).with_label("count");
///     let _ = effect({
///         let count = count.clone();
///         move || {
///             count.get();
///         }
///     })
///     .with_label("logger");
///     count
/// });
/// count.set(1);
///
/// assert_eq!(recorder.find("count").unwrap().writes, 1);
/// assert_eq!(recorder.find("logger").unwrap().runs, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    stats: Arc<Mutex<IndexMap<NodeId, NodeStats>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats of every node seen so far, in creation order.
    pub fn stats(&self) -> Vec<NodeStats> {
        self.stats.lock().values().cloned().collect()
    }

    pub fn get(&self, id: NodeId) -> Option<NodeStats> {
        self.stats.lock().get(&id).cloned()
    }

    /// Stats of the first node carrying `label`.
    pub fn find(&self, label: &str) -> Option<NodeStats> {
        self.stats
            .lock()
            .values()
            .find(|s| s.label.as_deref() == Some(label))
            .cloned()
    }

    /// Number of nodes that have not been disposed.
    pub fn live_count(&self) -> usize {
        self.stats.lock().values().filter(|s| !s.disposed).count()
    }

    pub fn clear(&self) {
        self.stats.lock().clear();
    }

    /// Serialize the collected stats as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.stats())?)
    }

    fn with_node(&self, id: NodeId, f: impl FnOnce(&mut NodeStats)) {
        if let Some(stats) = self.stats.lock().get_mut(&id) {
            f(stats);
        }
    }
}

impl Inspector for Recorder {
    fn node_created(&self, id: NodeId, kind: NodeKind, owner: Option<NodeId>) {
        self.stats
            .lock()
            .insert(id, NodeStats::new(id, kind, owner));
    }

    fn node_labeled(&self, id: NodeId, label: &str) {
        self.with_node(id, |s| s.label = Some(label.to_owned()));
    }

    fn node_disposed(&self, id: NodeId) {
        self.with_node(id, |s| s.disposed = true);
    }

    fn source_written(&self, id: NodeId) {
        self.with_node(id, |s| s.writes += 1);
    }

    fn reader_ran(&self, id: NodeId, elapsed: Duration) {
        self.with_node(id, |s| {
            s.runs += 1;
            s.total_time += elapsed;
            s.last_time = Some(elapsed);
        });
    }
}
