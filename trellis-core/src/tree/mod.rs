//! Virtual Tree
//!
//! This module implements the node tree that templates and rendered
//! instances are made of, together with the primitive operations the
//! control-flow engine is built on.
//!
//! # Overview
//!
//! - [`VTree`] is an arena of [`Node`]s under a synthetic root. Markup's
//!   top-level elements are the root's children.
//! - [`Selector`] identifies zero or more nodes in a tree.
//! - Markup can be parsed into a tree and serialized back, which is how
//!   templates are authored and how rendered output is inspected.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one `Vec` per tree and are addressed by index plus
//!    generation. Freed slots go on a free list and are handed out again
//!    under the next generation, so a stale [`NodeId`] can only ever miss,
//!    never alias a different node.
//!
//! 2. Every node carries a [`LocationId`] that survives copies. Bookkeeping
//!    that must outlive a subtree being rebuilt keys on locations.
//!
//! 3. Deletion during a patch pass is two-phase (mark, then commit), see
//!    [`VTree::mark_for_deletion`].

mod markup;
mod node;
mod selector;
mod vtree;

pub use markup::MarkupError;
pub use node::{LocationId, Node, NodeId, NodeKind, RepeatInfo};
pub use selector::{Selector, SelectorError};
pub use vtree::{Mutation, TreeError, VTree};
