//! Update Scheduler
//!
//! The scheduler owns the dependency graph of one context and determines the
//! order in which invalidated nodes should be updated. It ensures that
//! dependencies are always updated before their dependents.
//!
//! # Algorithm
//!
//! We use a topological sort to process nodes in dependency order:
//!
//! 1. When a source node changes, mark its direct dependents as "dirty"
//! 2. Propagate "maybe dirty" to their dependents, recursively
//! 3. Sort the affected nodes topologically (dependencies before dependents)
//! 4. Hand the effects among them to the runtime, in that order
//! 5. When an effect is about to run, its "maybe dirty" inputs are pulled
//!    first; if none of them actually changed value, the run is skipped
//!
//! This "push-pull" approach minimizes unnecessary recomputation.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID, in creation order.
    nodes: IndexMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node to the graph.
    ///
    /// If the node names an owner that is still in the graph, the node is
    /// registered as one of its children.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        if let Some(owner) = node.owner() {
            if let Some(owner_node) = self.nodes.get_mut(&owner) {
                owner_node.add_child(id);
            }
        }
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and detaches it from its
    /// owner. Children are left in place; the runtime disposes them first.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        if let Some(owner) = node.owner() {
            if let Some(owner_node) = self.nodes.get_mut(&owner) {
                owner_node.remove_child(node_id);
            }
        }

        Some(node)
    }

    /// Whether the node is still part of the graph.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Iterate over all nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    /// Both nodes must exist; edges to nodes outside the graph are ignored.
    /// Returns `true` if a new edge was created.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> bool {
        if !self.nodes.contains_key(&dependency) || !self.nodes.contains_key(&dependent) {
            return false;
        }
        let mut added = false;
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            added = dependent_node.add_dependency(dependency);
        }
        if added {
            if let Some(dep_node) = self.nodes.get_mut(&dependency) {
                dep_node.add_dependent(dependent);
            }
        }
        added
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Drop every dependency edge of `node_id`.
    ///
    /// Called before a reader re-runs so that its dependency set reflects
    /// only what the next run reads.
    pub fn clear_dependencies(&mut self, node_id: NodeId) {
        let previous = match self.nodes.get_mut(&node_id) {
            Some(node) => node.take_dependencies(),
            None => return,
        };
        for dep_id in previous {
            if let Some(dep) = self.nodes.get_mut(&dep_id) {
                dep.remove_dependent(node_id);
            }
        }
    }

    /// Collect every node downstream of `source_id`, in topological order.
    ///
    /// Does not modify any state.
    pub fn affected_by(&self, source_id: NodeId) -> Vec<NodeId> {
        let mut affected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct dependents
        if let Some(source) = self.nodes.get(&source_id) {
            queue.extend(source.dependents().iter().copied());
        }

        // BFS over dependents
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                affected.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        // Sort topologically so dependencies are processed first
        self.topological_sort(affected)
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Direct dependents become dirty; everything further downstream becomes
    /// maybe-dirty. Returns the effects that need to be scheduled, in
    /// topological order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let direct: HashSet<NodeId> = match self.nodes.get(&source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return Vec::new(),
        };

        let mut effects = Vec::new();
        for node_id in self.affected_by(source_id) {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                if direct.contains(&node_id) {
                    node.mark_dirty();
                } else {
                    node.mark_maybe_dirty();
                }
                if node.kind() == NodeKind::Effect {
                    effects.push(node_id);
                }
            }
        }
        effects
    }

    /// Upgrade the maybe-dirty direct dependents of `node_id` to dirty.
    ///
    /// Called after a computed produced a new value. Clean dependents are
    /// left alone: they were not invalidated by this change.
    pub fn mark_dependents_dirty(&mut self, node_id: NodeId) {
        let dependents: Vec<NodeId> = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return,
        };
        for dependent_id in dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                if dependent.dirty_state() == DirtyState::MaybeDirty {
                    dependent.mark_dirty();
                }
            }
        }
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of dependency edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies().len()).sum()
    }

    /// Forget every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
