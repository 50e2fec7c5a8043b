//! Control Flow
//!
//! This module implements the incremental engine that reconciles
//! conditional, repetition and projection directives against a rendered
//! copy of a template.
//!
//! # Overview
//!
//! - [`initialize_self_contained_flows`] renders a template for one instance
//!   id and seeds a [`FlowStore`] with the state of every conditional and
//!   repetition.
//! - [`update_conditional`] and [`update_repetition`] re-evaluate one
//!   directive and patch the rendered tree with the smallest change that
//!   reflects the new payload.
//! - [`initialize_parent_defined_flows`] and [`evaluate_projection`] copy
//!   content supplied by an enclosing context into the tree.
//!
//! Updates never free nodes. They mark them for deletion and leave the
//! physical removal to [`VTree::commit_deletions`](crate::tree::VTree::commit_deletions).
//!
//! # Nesting
//!
//! Directives nest. When a conditional reveals its subtree, or a repetition
//! rebuilds items, the repetitions inside see fresh literal template nodes
//! their state knows nothing about. Their state is reset and the next update
//! seeds it again from the tree. Conditionals nested in a repetition are
//! carried into its item template instead, so items created later show what
//! the existing ones show.

mod conditional;
mod init;
mod projection;
mod repetition;
mod store;

pub use conditional::{update_conditional, ConditionalOutcome};
pub use init::{initialize_parent_defined_flows, initialize_self_contained_flows};
pub use projection::{evaluate_projection, Injectables, ProjectionOutcome};
pub use repetition::{update_repetition, RepetitionOutcome};
pub use store::{ConditionalState, FlowStore, RepeatLocation, RepetitionState, Snapshot};
