//! Virtual Tree
//!
//! An arena-backed node tree with the primitive operations the control-flow
//! engine needs.
//!
//! # Deferred Deletion
//!
//! Incremental patches never remove nodes outright. They call
//! [`VTree::mark_for_deletion`], which hides the node (and its subtree) from
//! queries, traversal and serialization but leaves it in place. Whatever
//! commits the tree calls [`VTree::commit_deletions`] once per pass, so patches
//! that touch overlapping regions coalesce into one physical removal.
//!
//! # Mutation Journal
//!
//! When enabled, every structural change is appended to a journal of
//! [`Mutation`]s. Committers and tests read it to see exactly which patches a
//! pass produced.

use indexmap::IndexSet;
use serde_json::Value;
use thiserror::Error;

use super::node::{LocationId, Node, NodeId, RepeatInfo};
use super::selector::Selector;

/// Errors from tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0:?} does not exist in this tree")]
    MissingNode(NodeId),

    #[error("node {0:?} is already attached to a parent")]
    AlreadyAttached(NodeId),

    #[error("cannot attach node {0:?} inside its own subtree")]
    Cycle(NodeId),

    #[error("the root node cannot be detached")]
    DetachRoot,
}

/// A structural change recorded in the journal.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `node` was attached under `parent`.
    Attached { parent: NodeId, node: NodeId },

    /// `node` was detached from its parent.
    Detached { node: NodeId },

    /// `node` was marked for deferred deletion.
    Marked { node: NodeId },

    /// `node` received repetition metadata.
    Annotated { node: NodeId, index: usize },
}

/// One arena slot. The generation grows every time the slot is freed.
#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// An arena-backed tree with a synthetic root.
#[derive(Debug, Clone)]
pub struct VTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
    pending: IndexSet<NodeId>,
    journal: Option<Vec<Mutation>>,
}

impl VTree {
    /// Create an empty tree with journaling enabled.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::root()),
            }],
            free: Vec::new(),
            root: NodeId::new(0, 0),
            pending: IndexSet::new(),
            journal: Some(Vec::new()),
        }
    }

    /// Get the synthetic root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Check whether `id` refers to a node that has not been freed.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Get a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.get(id).ok_or(TreeError::MissingNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(TreeError::MissingNode(id))
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(self.slots.len() - 1, 0)
    }

    /// Take the node out of its slot and put the slot up for reuse.
    fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    fn record(&mut self, mutation: Mutation) {
        if let Some(journal) = &mut self.journal {
            journal.push(mutation);
        }
    }

    /// Create a detached element with a fresh location.
    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.alloc(Node::element(tag))
    }

    /// Create a detached text node with a fresh location.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(Node::text(text))
    }

    /// Set an attribute on a node.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.node_mut(id)?.set_attribute(name, value);
        Ok(())
    }

    /// Get the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    /// Get the children of a node that are not marked for deletion.
    pub fn live_children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|node| {
                node.children
                    .iter()
                    .copied()
                    .filter(|child| !self.is_marked(*child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get the first child of a node.
    ///
    /// For a fragment produced by [`VTree::extract`] this is the extracted node.
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.children.first().copied())
    }

    /// Get the next sibling of a node, marked or not.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.get(self.parent(id)?)?;
        let position = parent.children.iter().position(|child| *child == id)?;
        parent.children.get(position + 1).copied()
    }

    /// Get the next sibling of a node that is not marked for deletion.
    pub fn next_live_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.get(self.parent(id)?)?;
        let position = parent.children.iter().position(|child| *child == id)?;
        parent.children[position + 1..]
            .iter()
            .copied()
            .find(|sibling| !self.is_marked(*sibling))
    }

    /// Check whether `node` is a strict descendant of `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    /// Attach `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.insert_before(parent, child, None)
    }

    /// Attach `child` under `parent`, before `reference`.
    ///
    /// Appends if `reference` is `None` or not a child of `parent`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), TreeError> {
        self.node(parent)?;
        if self.node(child)?.parent.is_some() || child == self.root {
            return Err(TreeError::AlreadyAttached(child));
        }
        if parent == child || self.is_descendant(parent, child) {
            return Err(TreeError::Cycle(child));
        }

        let parent_node = self.node_mut(parent)?;
        let position = reference
            .and_then(|reference| parent_node.children.iter().position(|c| *c == reference))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);

        self.record(Mutation::Attached { parent, node: child });
        Ok(())
    }

    /// Detach a node from its parent, keeping it in the arena.
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::DetachRoot);
        }
        let Some(parent) = self.node(id)?.parent else {
            return Ok(());
        };

        self.node_mut(parent)?.children.retain(|c| *c != id);
        self.node_mut(id)?.parent = None;
        self.record(Mutation::Detached { node: id });
        Ok(())
    }

    /// Detach a node and free its whole subtree immediately.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.detach(id)?;
        self.free_subtree(id);
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.release(current) {
                self.pending.shift_remove(&current);
                stack.extend(node.children);
            }
        }
    }

    /// Remove every child of a node immediately. Returns how many were removed.
    pub fn clear_children(&mut self, id: NodeId) -> Result<usize, TreeError> {
        let children = self.node(id)?.children.clone();
        for child in &children {
            self.remove(*child)?;
        }
        Ok(children.len())
    }

    /// Mark a node for deferred deletion.
    ///
    /// Returns `false` if it was already marked.
    pub fn mark_for_deletion(&mut self, id: NodeId) -> Result<bool, TreeError> {
        if id == self.root {
            return Err(TreeError::DetachRoot);
        }
        let node = self.node_mut(id)?;
        if node.marked {
            return Ok(false);
        }
        node.marked = true;
        self.pending.insert(id);
        self.record(Mutation::Marked { node: id });
        Ok(true)
    }

    /// Check whether the node itself is marked for deletion.
    pub fn is_marked(&self, id: NodeId) -> bool {
        self.get(id).map(Node::is_marked).unwrap_or(false)
    }

    /// Check whether a node is reachable from the root without passing a
    /// node that is marked for deletion.
    pub fn is_live(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.get(node_id) else {
                return false;
            };
            if node.marked {
                return false;
            }
            if node_id == self.root {
                return true;
            }
            current = node.parent;
        }
        false
    }

    /// Get the nodes waiting for deferred deletion, in marking order.
    pub fn pending_deletions(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pending.iter().copied()
    }

    /// Physically remove every node marked for deletion.
    ///
    /// Returns how many marked nodes were removed.
    pub fn commit_deletions(&mut self) -> usize {
        let pending: Vec<NodeId> = self.pending.drain(..).collect();
        let mut removed = 0;
        for id in pending {
            if self.contains(id) && self.remove(id).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Attach repetition metadata to a node.
    pub fn annotate_repeat(
        &mut self,
        id: NodeId,
        index: usize,
        value: Value,
    ) -> Result<(), TreeError> {
        self.node_mut(id)?.repeat = Some(RepeatInfo { index, value });
        self.record(Mutation::Annotated { node: id, index });
        Ok(())
    }

    /// Drop repetition metadata from a node.
    pub(crate) fn clear_repeat(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.node_mut(id)?.repeat = None;
        Ok(())
    }

    /// Live descendants of `from` in document order, excluding `from`.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.live_children(from).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            result.push(id);
            stack.extend(self.live_children(id).into_iter().rev());
        }
        result
    }

    /// Visit every live descendant of `from` that matches `selector`.
    pub fn each_node<F>(&self, from: NodeId, selector: &Selector, mut visitor: F)
    where
        F: FnMut(NodeId),
    {
        for id in self.descendants(from) {
            if selector.matches(self, id) {
                visitor(id);
            }
        }
    }

    /// Collect every live descendant of `from` that matches `selector`.
    pub fn query(&self, from: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut matches = Vec::new();
        self.each_node(from, selector, |id| matches.push(id));
        matches
    }

    /// Find every live node copied from `location`, in document order.
    pub fn find_by_location(&self, location: LocationId) -> Vec<NodeId> {
        let mut found = Vec::new();
        if self.get(self.root).is_some_and(|root| root.location() == location) {
            found.push(self.root);
        }
        found.extend(self.descendants(self.root).into_iter().filter(|id| {
            self.get(*id)
                .is_some_and(|node| node.location() == location)
        }));
        found
    }

    /// Deep-copy a subtree of `source` into this tree.
    ///
    /// The copy is detached, keeps locations and attributes, and leaves out
    /// children of the copied node that are marked for deletion.
    pub fn import(&mut self, source: &VTree, id: NodeId) -> Result<NodeId, TreeError> {
        let plan = copy_plan(source, id)?;
        let mut ids: Vec<NodeId> = Vec::with_capacity(plan.len());
        for (parent, node) in plan {
            let new_id = self.alloc(node);
            if let Some(parent) = parent {
                let parent_id = ids[parent];
                self.node_mut(parent_id)?.children.push(new_id);
                self.node_mut(new_id)?.parent = Some(parent_id);
            }
            ids.push(new_id);
        }
        Ok(ids[0])
    }

    /// Copy a subtree of this tree into a fresh, journal-free tree whose
    /// root has that copy as its only child.
    pub fn extract(&self, id: NodeId) -> Result<VTree, TreeError> {
        let mut fragment = VTree {
            journal: None,
            ..VTree::new()
        };
        let top = fragment.import(self, id)?;
        let root = fragment.root;
        fragment.append_child(root, top)?;
        Ok(fragment)
    }

    /// Enable or disable the mutation journal.
    pub fn set_journal(&mut self, enabled: bool) {
        match (enabled, &self.journal) {
            (true, None) => self.journal = Some(Vec::new()),
            (false, Some(_)) => self.journal = None,
            _ => {}
        }
    }

    /// Get the journaled mutations since the last drain.
    pub fn mutations(&self) -> &[Mutation] {
        self.journal.as_deref().unwrap_or(&[])
    }

    /// Drain the journal.
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Number of allocated (not freed) nodes, including the root.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of arena slots, occupied or waiting for reuse.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// A tree is empty when its root has no children.
    pub fn is_empty(&self) -> bool {
        self.get(self.root)
            .map(|root| root.children.is_empty())
            .unwrap_or(true)
    }
}

impl Default for VTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-order list of `(parent index in the plan, unlinked node)` pairs.
fn copy_plan(source: &VTree, id: NodeId) -> Result<Vec<(Option<usize>, Node)>, TreeError> {
    let mut plan = Vec::new();
    let mut stack = vec![(id, None)];
    while let Some((current, parent)) = stack.pop() {
        let node = source.node(current)?;
        let index = plan.len();
        plan.push((parent, node.unlinked_copy()));
        for child in node.children.iter().rev() {
            if !source.is_marked(*child) {
                stack.push((*child, Some(index)));
            }
        }
    }
    Ok(plan)
}
