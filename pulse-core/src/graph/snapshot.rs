//! Graph Snapshots
//!
//! A read-only copy of a context's dependency graph, for devtools. Snapshots
//! carry topology and bookkeeping only; user values never leave the core.

use serde::{Deserialize, Serialize};

use super::node::{DirtyState, NodeId, NodeKind};
use super::scheduler::UpdateScheduler;
use crate::error::Result;

/// One node of a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
    pub state: DirtyState,
    pub runs: u64,
    pub owner: Option<NodeId>,
}

/// A subscription edge: `dependent` re-runs when `source` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub source: NodeId,
    pub dependent: NodeId,
}

/// The live dependency graph of a context at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub context: Option<String>,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    pub(crate) fn capture(context: Option<String>, graph: &UpdateScheduler) -> Self {
        let mut nodes = Vec::with_capacity(graph.node_count());
        let mut edges = Vec::with_capacity(graph.edge_count());

        for node in graph.nodes() {
            nodes.push(NodeSnapshot {
                id: node.id(),
                kind: node.kind(),
                label: node.label().map(str::to_owned),
                state: node.dirty_state(),
                runs: node.runs(),
                owner: node.owner(),
            });
            edges.extend(node.dependencies().iter().map(|&source| EdgeSnapshot {
                source,
                dependent: node.id(),
            }));
        }

        Self {
            context,
            nodes,
            edges,
        }
    }

    /// Find a node by id.
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find the first node carrying `label`.
    pub fn find(&self, label: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.label.as_deref() == Some(label))
    }

    /// Ids of the nodes `id` currently depends on.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.dependent == id)
            .map(|e| e.source)
            .collect()
    }

    /// Ids of the nodes currently subscribed to `id`.
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.dependent)
            .collect()
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize as MessagePack, for shipping to an out-of-process inspector.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode a snapshot produced by [`GraphSnapshot::to_msgpack`].
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
