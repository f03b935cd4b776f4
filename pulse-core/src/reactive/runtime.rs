//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects pulses, computeds
//! and effects of one context. It owns the dependency graph, the tracking
//! stack and the batch state, and schedules updates when pulses change.
//!
//! # How It Works
//!
//! 1. When a pulse, computed or effect is created, it registers a node with
//!    the runtime of the active context.
//!
//! 2. When a reader accesses a pulse or computed, the runtime records the
//!    edge immediately, so a write later in the same run can see it.
//!
//! 3. When a pulse's value changes, the runtime:
//!    a. Finds all downstream computeds/effects
//!    b. Marks direct dependents dirty and the rest maybe-dirty
//!    c. Queues the affected effects
//!    d. Flushes the queue now, at batch exit, or on `flush()` (per policy)
//!
//! 4. Computeds are lazy: they recompute when pulled by a read or by an
//!    effect that is checking whether it really needs to run.
//!
//! # Threading
//!
//! A runtime is confined to the thread that created it. Each thread gets a
//! default runtime; `Context::run` pushes another one on a thread-local
//! stack for the duration of a closure.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::subscriber::{Cleanup, ReaderSlot};
use super::tracking::{Frame, TrackingGuard, TrackingStack};
use crate::config::{ContextOptions, FlushPolicy};
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, GraphSnapshot, Node, NodeId, NodeKind, UpdateScheduler};
use crate::inspect::Inspector;

thread_local! {
    static DEFAULT_RUNTIME: Rc<Runtime> = Runtime::new_default();
    static ACTIVE: RefCell<Vec<Rc<Runtime>>> = const { RefCell::new(Vec::new()) };
}

/// The runtime of the active context on this thread.
pub(crate) fn current() -> Rc<Runtime> {
    ACTIVE
        .with(|active| active.borrow().last().cloned())
        .unwrap_or_else(|| DEFAULT_RUNTIME.with(Rc::clone))
}

/// Makes a runtime the active one until dropped.
pub(crate) struct ActivationGuard {
    runtime: Rc<Runtime>,
}

impl ActivationGuard {
    pub fn enter(runtime: Rc<Runtime>) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(Rc::clone(&runtime)));
        Self { runtime }
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let popped = ACTIVE.with(|active| active.borrow_mut().pop());
        debug_assert!(
            popped.is_some_and(|rt| Rc::ptr_eq(&rt, &self.runtime)) || std::thread::panicking(),
            "active context stack out of balance"
        );
    }
}

/// Clears a reader's `running` flag when dropped.
struct RunningGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.runtime.graph.borrow_mut().get_node_mut(self.id) {
            node.set_running(false);
        }
    }
}

/// Holds a batch open until dropped.
pub(crate) struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> BatchGuard<'a> {
    pub fn enter(runtime: &'a Runtime) -> Self {
        runtime.batch_depth.set(runtime.batch_depth.get() + 1);
        Self { runtime }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let depth = self.runtime.batch_depth.get();
        self.runtime.batch_depth.set(depth.saturating_sub(1));
    }
}

/// State of one reactive context.
pub(crate) struct Runtime {
    options: ContextOptions,

    /// The thread's implicit root; never torn down on drop.
    is_default: bool,

    graph: RefCell<UpdateScheduler>,

    /// Executable readers, in creation order.
    readers: RefCell<IndexMap<NodeId, ReaderSlot>>,

    /// Cleanups registered by each reader's current run.
    cleanups: RefCell<HashMap<NodeId, Vec<Cleanup>>>,

    /// Cleanups registered outside any reader; run on reset.
    root_cleanups: RefCell<Vec<Cleanup>>,

    tracking: TrackingStack,

    batch_depth: Cell<usize>,

    /// Effects waiting for the next flush. Insertion-ordered and deduplicated.
    pending: RefCell<IndexSet<NodeId>>,

    inspector: RefCell<Option<Rc<dyn Inspector>>>,

    schedule_hook: RefCell<Option<Rc<dyn Fn()>>>,

    /// Other contexts whose readers read one of this context's nodes.
    foreign: RefCell<HashMap<NodeId, SmallVec<[Weak<Runtime>; 2]>>>,
}

impl Runtime {
    pub fn new(options: ContextOptions) -> Rc<Self> {
        debug!(
            context = options.label.as_deref().unwrap_or("anonymous"),
            mode = ?options.mode,
            flush = ?options.flush,
            "creating reactive context"
        );
        Rc::new(Self::build(options, false))
    }

    fn new_default() -> Rc<Self> {
        Rc::new(Self::build(ContextOptions::default().with_label("default"), true))
    }

    fn build(options: ContextOptions, is_default: bool) -> Self {
        Self {
            options,
            is_default,
            graph: RefCell::new(UpdateScheduler::new()),
            readers: RefCell::new(IndexMap::new()),
            cleanups: RefCell::new(HashMap::new()),
            root_cleanups: RefCell::new(Vec::new()),
            tracking: TrackingStack::new(),
            batch_depth: Cell::new(0),
            pending: RefCell::new(IndexSet::new()),
            inspector: RefCell::new(None),
            schedule_hook: RefCell::new(None),
            foreign: RefCell::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn label(&self) -> &str {
        self.options.label.as_deref().unwrap_or("anonymous")
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_source(&self, id: NodeId) {
        self.graph
            .borrow_mut()
            .add_node(Node::with_id(id, NodeKind::Source));
        self.inspect(|i| i.node_created(id, NodeKind::Source, None));
    }

    /// Register a reader owned by whichever reader is running right now.
    pub fn register_reader(&self, id: NodeId, kind: NodeKind, slot: ReaderSlot) {
        let owner = self.tracking.owner();
        let mut node = Node::with_id(id, kind);
        node.set_owner(owner);
        self.graph.borrow_mut().add_node(node);
        self.readers.borrow_mut().insert(id, slot);
        self.inspect(|i| i.node_created(id, kind, owner));
    }

    /// Forget a source whose last handle was dropped.
    pub fn remove_source(&self, id: NodeId) {
        self.release_foreign(id);
        if self.graph.borrow_mut().remove_node(id).is_some() {
            self.inspect(|i| i.node_disposed(id));
        }
    }

    /// Mirror a node owned by another context so local readers can depend on it.
    fn adopt_source(&self, id: NodeId, label: Option<String>) {
        if self.contains(id) {
            return;
        }
        let mut node = Node::with_id(id, NodeKind::Source);
        if let Some(label) = &label {
            node.set_label(label.as_str());
        }
        self.graph.borrow_mut().add_node(node);
        self.inspect(|i| i.node_created(id, NodeKind::Source, None));
    }

    /// Drop the mirrors of `id` held by other contexts.
    fn release_foreign(&self, id: NodeId) {
        let subscribers = self.foreign.borrow_mut().remove(&id);
        for runtime in subscribers.into_iter().flatten() {
            if let Some(runtime) = runtime.upgrade() {
                runtime.remove_source(id);
            }
        }
    }

    pub fn set_label(&self, id: NodeId, label: &str) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.set_label(label);
        }
        self.inspect(|i| i.node_labeled(id, label));
    }

    pub fn label_of(&self, id: NodeId) -> Option<String> {
        self.graph
            .borrow()
            .get_node(id)
            .and_then(|n| n.label().map(str::to_owned))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.borrow().contains(id)
    }

    pub fn dependent_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |n| n.dependents().len())
    }

    pub fn dependency_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |n| n.dependencies().len())
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record a read of `source`, a node of this context, by the running
    /// reader of whichever context is active.
    ///
    /// A reader of another context gets a mirror of `source` in its own graph
    /// and this context forwards every change of `source` to it.
    pub fn track(self: &Rc<Self>, source: NodeId) {
        let active = current();
        if Rc::ptr_eq(self, &active) {
            self.track_read(source);
        } else if active.is_tracking() {
            self.subscribe_foreign(source, &active);
        }
    }

    fn subscribe_foreign(&self, source: NodeId, reader_runtime: &Rc<Runtime>) {
        reader_runtime.adopt_source(source, self.label_of(source));
        reader_runtime.track_read(source);

        let mut foreign = self.foreign.borrow_mut();
        let subscribers = foreign.entry(source).or_default();
        if !subscribers
            .iter()
            .any(|w| std::ptr::eq(w.as_ptr(), Rc::as_ptr(reader_runtime)))
        {
            trace!(
                context = self.label(),
                reader_context = reader_runtime.label(),
                source = %source,
                "cross-context dependency tracked"
            );
            subscribers.push(Rc::downgrade(reader_runtime));
        }
    }

    /// Nodes affected by a change of `source` that other contexts mirror.
    fn foreign_targets(&self, source: NodeId) -> Vec<(NodeId, Rc<Runtime>)> {
        let foreign = self.foreign.borrow();
        if foreign.is_empty() {
            return Vec::new();
        }
        let mut nodes = vec![source];
        nodes.extend(self.graph.borrow().affected_by(source));

        let mut targets = Vec::new();
        for node in nodes {
            for runtime in foreign.get(&node).into_iter().flatten() {
                if let Some(runtime) = runtime.upgrade() {
                    targets.push((node, runtime));
                }
            }
        }
        targets
    }

    /// Record that the running reader of this context (if any) read `source`.
    pub fn track_read(&self, source: NodeId) {
        if let Some(reader) = self.tracking.tracking_reader() {
            if self.graph.borrow_mut().add_edge(source, reader) {
                trace!(source = %source, reader = %reader, "dependency tracked");
            }
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_tracking()
    }

    pub fn is_running(&self, id: NodeId) -> bool {
        self.graph
            .borrow()
            .get_node(id)
            .is_some_and(|n| n.is_running())
    }

    /// Run `f` with dependency registration suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let owner = self.tracking.owner();
        let _frame = TrackingGuard::enter(&self.tracking, Frame::untracked(owner));
        f()
    }

    pub fn circular(&self, id: NodeId) -> ReactiveError {
        let label = self.label_of(id);
        warn!(
            context = self.label(),
            node = %id,
            label = label.as_deref().unwrap_or(""),
            "circular dependency detected"
        );
        ReactiveError::CircularDependency { node: id, label }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a reader body with tracking, ownership and re-entrancy guards.
    ///
    /// The previous run is torn down first: children are disposed, cleanups
    /// run in registration order, then dependencies are dropped.
    pub fn run_reader<R>(self: &Rc<Self>, id: NodeId, tracking: bool, body: impl FnOnce() -> R) -> R {
        self.reset_reader(id);

        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.mark_clean();
            node.set_running(true);
        }
        let _running = RunningGuard { runtime: self, id };
        let _active = ActivationGuard::enter(Rc::clone(self));
        let frame = if tracking {
            Frame::tracked(id)
        } else {
            Frame::untracked(Some(id))
        };
        let _frame = TrackingGuard::enter(&self.tracking, frame);

        let started = Instant::now();
        let out = body();
        let elapsed = started.elapsed();

        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.record_run();
        }
        trace!(context = self.label(), node = %id, ?elapsed, "reader ran");
        self.inspect(|i| i.reader_ran(id, elapsed));
        out
    }

    /// Bring a reader up to date, recomputing or re-running it if one of its
    /// inputs actually changed.
    pub fn update_if_necessary(self: &Rc<Self>, id: NodeId) -> Result<()> {
        let (state, running) = match self.graph.borrow().get_node(id) {
            Some(node) => (node.dirty_state(), node.is_running()),
            None => return Ok(()),
        };
        if state == DirtyState::Clean {
            return Ok(());
        }
        if running {
            return Err(self.circular(id));
        }

        if state == DirtyState::MaybeDirty {
            let upstream: SmallVec<[NodeId; 8]> = {
                let graph = self.graph.borrow();
                graph
                    .get_node(id)
                    .map(|node| {
                        node.dependencies()
                            .iter()
                            .copied()
                            .filter(|dep| {
                                graph
                                    .get_node(*dep)
                                    .is_some_and(|n| n.kind() == NodeKind::Derived)
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };

            for dep in upstream {
                self.update_if_necessary(dep)?;
                if self.dirty_state(id) == Some(DirtyState::Dirty) {
                    break;
                }
            }

            if self.dirty_state(id) == Some(DirtyState::MaybeDirty) {
                // Nothing upstream produced a new value.
                if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
                    node.mark_clean();
                }
                return Ok(());
            }
        }

        if self.dirty_state(id) == Some(DirtyState::Dirty) {
            self.execute(id)?;
        }
        Ok(())
    }

    fn execute(self: &Rc<Self>, id: NodeId) -> Result<()> {
        let reader = self.readers.borrow().get(&id).and_then(ReaderSlot::upgrade);
        let Some(reader) = reader else {
            return Ok(());
        };
        let changed = reader.run(self)?;
        if changed {
            self.graph.borrow_mut().mark_dependents_dirty(id);
        }
        Ok(())
    }

    fn dirty_state(&self, id: NodeId) -> Option<DirtyState> {
        self.graph.borrow().get_node(id).map(|n| n.dirty_state())
    }

    pub fn mark_dirty(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.mark_dirty();
        }
    }

    // ------------------------------------------------------------------
    // Writes and scheduling
    // ------------------------------------------------------------------

    /// Refuse a write to `source` that would re-trigger a running reader,
    /// here or in a context that reads it.
    pub fn check_write(&self, source: NodeId) -> Result<()> {
        self.check_local_write(source)?;
        for (node, runtime) in self.foreign_targets(source) {
            runtime.check_local_write(node)?;
        }
        Ok(())
    }

    fn check_local_write(&self, source: NodeId) -> Result<()> {
        let running = {
            let graph = self.graph.borrow();
            graph
                .affected_by(source)
                .into_iter()
                .find(|id| graph.get_node(*id).is_some_and(|n| n.is_running()))
        };
        match running {
            Some(id) => Err(self.circular(id)),
            None => Ok(()),
        }
    }

    /// Propagate a change of `source` and run effects as the flush policy allows.
    pub fn notify_changed(self: &Rc<Self>, source: NodeId) -> Result<()> {
        self.inspect(|i| i.source_written(source));
        self.propagate(source)
    }

    fn propagate(self: &Rc<Self>, source: NodeId) -> Result<()> {
        let targets = self.foreign_targets(source);
        let effects = self.graph.borrow_mut().mark_changed(source);
        if !effects.is_empty() {
            trace!(context = self.label(), source = %source, effects = effects.len(), "effects invalidated");
            self.enqueue(effects);
        }

        let mut result = if self.should_flush_now() {
            self.flush()
        } else {
            Ok(())
        };
        for (node, runtime) in targets {
            let forwarded = runtime.propagate(node);
            if result.is_ok() {
                result = forwarded;
            }
        }
        result
    }

    fn should_flush_now(&self) -> bool {
        self.options.flush == FlushPolicy::Sync && self.batch_depth.get() == 0
    }

    fn enqueue(&self, effects: Vec<NodeId>) {
        let became_pending = {
            let mut pending = self.pending.borrow_mut();
            let was_empty = pending.is_empty();
            pending.extend(effects);
            was_empty && !pending.is_empty()
        };
        if became_pending && self.options.flush == FlushPolicy::Manual {
            let hook = self.schedule_hook.borrow().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    pub fn begin_batch(&self) -> BatchGuard<'_> {
        BatchGuard::enter(self)
    }

    pub fn batch_depth(&self) -> usize {
        self.batch_depth.get()
    }

    /// Called when the outermost batch exits.
    pub fn finish_batch(self: &Rc<Self>) -> Result<()> {
        if self.should_flush_now() {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Run every pending effect whose inputs actually changed.
    ///
    /// Readers enqueued while the flush is running are picked up by the same
    /// flush. A reader may come back only `max_flush_iterations` times before
    /// the flush is aborted and the queue dropped.
    ///
    /// A failing reader does not stop the flush: the queue is drained and
    /// the first error returned afterwards.
    pub fn flush(self: &Rc<Self>) -> Result<()> {
        let limit = self.options.max_flush_iterations;
        let mut seen: IndexSet<NodeId> = IndexSet::new();
        let mut repeats = 0usize;
        let mut first_error = None;

        loop {
            let next = self.pending.borrow_mut().shift_remove_index(0);
            let Some(id) = next else {
                return first_error.map_or(Ok(()), Err);
            };
            if !seen.insert(id) {
                repeats += 1;
                if repeats > limit {
                    let dropped = {
                        let mut pending = self.pending.borrow_mut();
                        let n = pending.len();
                        pending.clear();
                        n
                    };
                    warn!(context = self.label(), limit, dropped, "runaway flush aborted");
                    return Err(ReactiveError::FlushLimitExceeded { limit });
                }
            }
            if let Err(err) = self.update_if_necessary(id) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(context = self.label(), node = %id, error = %err, "further reader failure in flush");
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn set_schedule_hook(&self, hook: Option<Rc<dyn Fn()>>) {
        *self.schedule_hook.borrow_mut() = hook;
    }

    // ------------------------------------------------------------------
    // Cleanup and disposal
    // ------------------------------------------------------------------

    /// Register a cleanup with the running reader, or with the context root.
    pub fn on_cleanup(&self, cleanup: Cleanup) {
        match self.tracking.owner().filter(|id| self.contains(*id)) {
            Some(reader) => self
                .cleanups
                .borrow_mut()
                .entry(reader)
                .or_default()
                .push(cleanup),
            None => self.root_cleanups.borrow_mut().push(cleanup),
        }
    }

    /// Tear down the previous run of a reader without disposing it.
    fn reset_reader(&self, id: NodeId) {
        let children = self
            .graph
            .borrow_mut()
            .get_node_mut(id)
            .map(|n| n.take_children())
            .unwrap_or_default();
        for child in children {
            self.dispose_node(child);
        }

        let cleanups = self.cleanups.borrow_mut().remove(&id);
        if let Some(cleanups) = cleanups {
            // Reads inside a cleanup belong to nobody.
            self.untracked(|| cleanups.into_iter().for_each(|cleanup| cleanup()));
        }

        self.graph.borrow_mut().clear_dependencies(id);
    }

    /// Dispose a reader (and everything it owns), or forget a source.
    ///
    /// Idempotent: nodes no longer in the graph are ignored.
    pub fn dispose_node(&self, id: NodeId) {
        if !self.contains(id) {
            return;
        }

        let reader = self.readers.borrow().get(&id).and_then(ReaderSlot::upgrade);
        if let Some(reader) = &reader {
            reader.mark_disposed();
        }

        self.reset_reader(id);
        self.release_foreign(id);
        self.graph.borrow_mut().remove_node(id);
        self.pending.borrow_mut().shift_remove(&id);

        // Dropping the slot may drop user closures, which may drop handles
        // that call back into the runtime. Release the borrow first.
        let slot = self.readers.borrow_mut().shift_remove(&id);
        drop(slot);
        drop(reader);

        debug!(context = self.label(), node = %id, "node disposed");
        self.inspect(|i| i.node_disposed(id));
    }

    /// Dispose every reader, run root cleanups and forget every source.
    pub fn reset(&self) {
        let readers: Vec<NodeId> = self.readers.borrow().keys().copied().collect();
        debug!(
            context = self.label(),
            readers = readers.len(),
            nodes = self.graph.borrow().node_count(),
            "resetting reactive context"
        );

        for id in readers {
            self.dispose_node(id);
        }

        let root_cleanups = std::mem::take(&mut *self.root_cleanups.borrow_mut());
        for cleanup in root_cleanups {
            cleanup();
        }

        let leftover = std::mem::take(&mut *self.readers.borrow_mut());
        drop(leftover);
        self.cleanups.borrow_mut().clear();
        self.graph.borrow_mut().clear();
        self.pending.borrow_mut().clear();
        self.foreign.borrow_mut().clear();
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn set_inspector(&self, inspector: Option<Rc<dyn Inspector>>) {
        *self.inspector.borrow_mut() = inspector;
    }

    fn inspect(&self, f: impl FnOnce(&dyn Inspector)) {
        let inspector = self.inspector.borrow().clone();
        if let Some(inspector) = inspector {
            f(&*inspector);
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(self.options.label.clone(), &self.graph.borrow())
    }

    pub fn node_count(&self) -> usize {
        self.graph.borrow().node_count()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.borrow().len()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // The default runtime dies with its thread; other thread-locals may
        // already be gone, so its readers are dropped without running cleanups.
        if !self.is_default {
            self.reset();
        }
    }
}
