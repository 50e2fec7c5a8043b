//! Directive Graph
//!
//! This module tracks how the directives of one template nest inside each
//! other.
//!
//! # Overview
//!
//! The directive graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent conditional and repetition directives
//! - Edges represent containment: if a node matched by B sits inside a node
//!   matched by A in the template, there is an edge from A to B
//!
//! The flow engine uses it in two places. Initialization walks it in
//! topological order so enclosing directives are seeded first. Updates walk
//! the dependents of a directive to find the nested state that went stale
//! when the enclosing directive rebuilt its subtree.
//!
//! # Design Decisions
//!
//! 1. The graph is built once per template from the template tree, never
//!    from a rendered instance. Rendering only removes or duplicates nodes,
//!    so containment between directives does not change.
//!
//! 2. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;

pub use node::FlowNode;
pub use scheduler::FlowScheduler;
