//! Graph Nodes
//!
//! This module defines the node type that lives in the directive graph.

use indexmap::IndexSet;

use crate::directive::{DirectiveId, DirectiveKind};

/// A directive in the dependency graph.
#[derive(Debug)]
pub struct FlowNode {
    /// The directive this node stands for.
    id: DirectiveId,

    /// What kind of directive it is.
    kind: DirectiveKind,

    /// Directives whose matched nodes contain this directive's nodes
    /// (parents in the DAG). Insertion ordered so traversal is stable.
    dependencies: IndexSet<DirectiveId>,

    /// Directives whose matched nodes sit inside this directive's nodes
    /// (children in the DAG).
    dependents: IndexSet<DirectiveId>,
}

impl FlowNode {
    /// Create a node with no edges.
    pub fn new(id: DirectiveId, kind: DirectiveKind) -> Self {
        Self {
            id,
            kind,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Get the directive's ID.
    pub fn id(&self) -> DirectiveId {
        self.id
    }

    /// Get the directive's kind.
    pub fn kind(&self) -> DirectiveKind {
        self.kind
    }

    /// Add a dependency (an enclosing directive).
    pub fn add_dependency(&mut self, id: DirectiveId) {
        self.dependencies.insert(id);
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<DirectiveId> {
        &self.dependencies
    }

    /// Add a dependent (an enclosed directive).
    pub fn add_dependent(&mut self, id: DirectiveId) {
        self.dependents.insert(id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<DirectiveId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Directive, DirectiveSet};

    fn ids(count: usize) -> Vec<DirectiveId> {
        let set = DirectiveSet::from_directives(
            (0..count).map(|i| Directive::conditional(&format!("#n{i}"), "k").unwrap()),
        )
        .unwrap();
        set.iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn new_node_has_no_edges() {
        let id = ids(1)[0];
        let node = FlowNode::new(id, DirectiveKind::Repetition);
        assert_eq!(node.id(), id);
        assert_eq!(node.kind(), DirectiveKind::Repetition);
        assert!(node.dependencies().is_empty());
        assert!(node.dependents().is_empty());
    }

    #[test]
    fn edges_are_deduplicated_in_order() {
        let ids = ids(3);
        let mut node = FlowNode::new(ids[0], DirectiveKind::Conditional);

        node.add_dependency(ids[1]);
        node.add_dependency(ids[2]);
        node.add_dependency(ids[1]);
        assert_eq!(node.dependencies().iter().copied().collect::<Vec<_>>(), vec![ids[1], ids[2]]);

        node.add_dependent(ids[2]);
        node.add_dependent(ids[2]);
        assert_eq!(node.dependents().len(), 1);
    }
}
