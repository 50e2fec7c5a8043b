//! Tree Nodes
//!
//! This module defines node identity and the data stored per node.
//!
//! A node has two identities:
//!
//! - [`NodeId`] is its slot in the arena of one [`VTree`](super::VTree),
//!   plus the generation of that slot. It changes whenever the subtree is
//!   imported, extracted or recreated.
//! - [`LocationId`] is assigned once when a template node is authored and is
//!   carried along by every copy. Directive bookkeeping that has to survive a
//!   subtree being torn down and rebuilt keys on this one.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;

/// Arena slot of a node inside one tree.
///
/// Ids are only meaningful for the tree that issued them. Cloning a whole
/// tree preserves them. A freed slot is reused under a new generation, so an
/// id kept past its node's removal misses instead of reaching the newcomer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the raw arena index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get how many times the slot was reused before this node got it.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Stable identifier of an authored template location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(u64);

impl LocationId {
    /// Generate a new unique location ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for LocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for LocationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// What a node represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The synthetic root of a tree. Top-level markup elements are its children.
    Root,

    /// An element with a tag name. Only elements can match selectors.
    Element { tag: String },

    /// A run of character data.
    Text(String),
}

/// Metadata attached to a node materialized by a repetition directive.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatInfo {
    /// Index of the payload item this node was created for.
    pub index: usize,

    /// The payload item itself.
    pub value: Value,
}

/// A node in a [`VTree`](super::VTree).
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    location: LocationId,
    attributes: IndexMap<String, String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) repeat: Option<RepeatInfo>,
    pub(crate) marked: bool,
}

impl Node {
    fn with_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            location: LocationId::new(),
            attributes: IndexMap::new(),
            parent: None,
            children: SmallVec::new(),
            repeat: None,
            marked: false,
        }
    }

    pub(crate) fn root() -> Self {
        Self::with_kind(NodeKind::Root)
    }

    pub(crate) fn element(tag: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Element { tag: tag.into() })
    }

    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Text(text.into()))
    }

    /// A copy of this node's own data with no links into any tree.
    pub(crate) fn unlinked_copy(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            location: self.location,
            attributes: self.attributes.clone(),
            parent: None,
            children: SmallVec::new(),
            repeat: self.repeat.clone(),
            marked: false,
        }
    }

    /// Get the node's kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Get the tag name if this is an element.
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag } => Some(tag),
            _ => None,
        }
    }

    /// Get the character data if this is a text node.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    /// Get the stable location this node was copied from.
    pub fn location(&self) -> LocationId {
        self.location
    }

    /// Get an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Get all attributes in authoring order.
    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    pub(crate) fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// The `id` attribute.
    pub fn element_id(&self) -> Option<&str> {
        self.attribute("id")
    }

    /// Check whether the whitespace-separated `class` attribute contains `class`.
    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Get the parent node, if attached.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Get the children, including ones marked for deletion.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Get the repetition metadata, if this node was materialized by one.
    pub fn repeat_info(&self) -> Option<&RepeatInfo> {
        self.repeat.as_ref()
    }

    /// Check whether the node is waiting for deferred deletion.
    pub fn is_marked(&self) -> bool {
        self.marked
    }
}
