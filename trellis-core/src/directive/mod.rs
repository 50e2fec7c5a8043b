//! Directives
//!
//! This module defines the declarative annotations a template carries and
//! the values they resolve to.
//!
//! # Concepts
//!
//! ## Directives
//!
//! A [`Directive`] binds a behavior to every template node its selector
//! matches:
//!
//! - **Conditional**: the matched subtree exists only while the payload is
//!   truthy.
//! - **Repetition**: the matched node is a template that is instantiated
//!   once per payload item.
//! - **Projection**: the matched node's children are replaced by content
//!   supplied by an enclosing context. `$self` targets the tree root.
//!
//! ## Instance Ids
//!
//! A [`Uid`] names one data-bound rendering of a template. Payloads are
//! always resolved for a (directive, uid) pair.
//!
//! ## Payloads
//!
//! Conditional and repetition payloads come from a [`PayloadResolver`].
//! Projection payloads come from the directive's own action.

mod payload;
mod resolver;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::tree::{NodeId, Selector, SelectorError, VTree};

pub use payload::{is_truthy, type_name, Payload};
pub use resolver::{PayloadResolver, PayloadTable};

/// The selector that makes a projection target the tree root.
pub const SELF_SELECTOR: &str = "$self";

/// Opaque identifier of one data-bound rendering instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(String);

impl Uid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self::new(uid)
    }
}

impl From<String> for Uid {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three directive families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Conditional,
    Repetition,
    Projection,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectiveKind::Conditional => "conditional",
            DirectiveKind::Repetition => "repetition",
            DirectiveKind::Projection => "projection",
        })
    }
}

/// Errors from declaring directives.
#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("{kind} directive for selector `{selector}` is already registered")]
    Duplicate {
        kind: DirectiveKind,
        selector: String,
    },

    #[error("`$self` can only target projection directives, not {0}")]
    SelfTarget(DirectiveKind),

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Which nodes a directive applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The root of the tree being evaluated.
    Root,

    /// Every node matching the selector.
    Nodes(Selector),
}

/// Projection action.
pub type Action = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
enum Source {
    Key(String),
    Action(Action),
}

/// An immutable directive descriptor.
#[derive(Clone)]
pub struct Directive {
    kind: DirectiveKind,
    selector: String,
    target: Target,
    source: Source,
}

impl Directive {
    fn with_key(kind: DirectiveKind, selector: &str, key: String) -> Result<Self, DirectiveError> {
        let selector = selector.trim();
        if selector == SELF_SELECTOR {
            return Err(DirectiveError::SelfTarget(kind));
        }
        Ok(Self {
            kind,
            selector: selector.to_string(),
            target: Target::Nodes(Selector::parse(selector)?),
            source: Source::Key(key),
        })
    }

    /// Declare a conditional whose payload is resolved through `key`.
    pub fn conditional(selector: &str, key: impl Into<String>) -> Result<Self, DirectiveError> {
        Self::with_key(DirectiveKind::Conditional, selector, key.into())
    }

    /// Declare a repetition whose payload is resolved through `key`.
    pub fn repetition(selector: &str, key: impl Into<String>) -> Result<Self, DirectiveError> {
        Self::with_key(DirectiveKind::Repetition, selector, key.into())
    }

    /// Declare a projection. `selector` may be `$self`.
    pub fn projection<F>(selector: &str, action: F) -> Result<Self, DirectiveError>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let selector = selector.trim();
        let target = if selector == SELF_SELECTOR {
            Target::Root
        } else {
            Target::Nodes(Selector::parse(selector)?)
        };
        Ok(Self {
            kind: DirectiveKind::Projection,
            selector: selector.to_string(),
            target,
            source: Source::Action(Arc::new(action)),
        })
    }

    pub fn kind(&self) -> DirectiveKind {
        self.kind
    }

    /// The selector as declared. This is the key of the directive's state.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The payload key, for conditionals and repetitions.
    pub fn key(&self) -> Option<&str> {
        match &self.source {
            Source::Key(key) => Some(key),
            Source::Action(_) => None,
        }
    }

    /// Run the projection action. `None` for other kinds.
    pub fn run_action(&self) -> Option<Value> {
        match &self.source {
            Source::Action(action) => Some(action()),
            Source::Key(_) => None,
        }
    }

    /// The live nodes of `tree` this directive currently targets.
    pub fn matches(&self, tree: &VTree) -> Vec<NodeId> {
        match &self.target {
            Target::Root => vec![tree.root()],
            Target::Nodes(selector) => tree.query(tree.root(), selector),
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("kind", &self.kind)
            .field("selector", &self.selector)
            .field("key", &self.key())
            .finish()
    }
}

/// Position of a directive in its [`DirectiveSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectiveId(usize);

impl DirectiveId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The ordered directives of one template.
///
/// At most one directive per (kind, selector) pair, so every selector owns
/// exactly one state record.
#[derive(Debug, Default, Clone)]
pub struct DirectiveSet {
    directives: Vec<Directive>,
    index: IndexMap<(DirectiveKind, String), DirectiveId>,
}

impl DirectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from directives in declaration order.
    pub fn from_directives<I>(directives: I) -> Result<Self, DirectiveError>
    where
        I: IntoIterator<Item = Directive>,
    {
        let mut set = Self::new();
        for directive in directives {
            set.push(directive)?;
        }
        Ok(set)
    }

    /// Register a directive.
    pub fn push(&mut self, directive: Directive) -> Result<DirectiveId, DirectiveError> {
        let key = (directive.kind, directive.selector.clone());
        if self.index.contains_key(&key) {
            return Err(DirectiveError::Duplicate {
                kind: key.0,
                selector: key.1,
            });
        }
        let id = DirectiveId(self.directives.len());
        self.directives.push(directive);
        self.index.insert(key, id);
        Ok(id)
    }

    pub fn get(&self, id: DirectiveId) -> Option<&Directive> {
        self.directives.get(id.0)
    }

    /// Find the directive of `kind` declared for `selector`.
    pub fn lookup(&self, kind: DirectiveKind, selector: &str) -> Option<(DirectiveId, &Directive)> {
        let id = *self.index.get(&(kind, selector.trim().to_string()))?;
        Some((id, &self.directives[id.0]))
    }

    /// Directives of one kind in declaration order.
    pub fn of_kind(&self, kind: DirectiveKind) -> impl Iterator<Item = (DirectiveId, &Directive)> {
        self.iter().filter(move |(_, directive)| directive.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DirectiveId, &Directive)> {
        self.directives
            .iter()
            .enumerate()
            .map(|(i, directive)| (DirectiveId(i), directive))
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}
