//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between pulses, computeds and effects.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (pulses) or computations (computeds, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! When a pulse changes, we traverse the graph to find all affected nodes
//! and mark them as dirty. The runtime then determines which dirty nodes
//! actually need to recompute.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph per context rather than distributed linked lists:
//!    - It enables topological ordering for batch updates
//!    - It makes bulk teardown of a context a single `clear`
//!    - It can be snapshotted for devtools without touching user values
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;
mod snapshot;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
pub use snapshot::{EdgeSnapshot, GraphSnapshot, NodeSnapshot};
