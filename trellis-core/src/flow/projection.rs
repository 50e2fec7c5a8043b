//! Projection Directives
//!
//! A projection fills target nodes with content handed down by an enclosing
//! context. It keeps no state: targets and content are resolved fresh on
//! every evaluation.

use tracing::{instrument, trace};

use crate::directive::{Directive, DirectiveKind, Payload};
use crate::error::{FlowError, FlowResult};
use crate::tree::{NodeId, Selector, VTree};

/// Content supplied by an enclosing context.
#[derive(Debug, Clone, Copy)]
pub struct Injectables<'a> {
    tree: &'a VTree,
    root: NodeId,
}

impl<'a> Injectables<'a> {
    /// Use the children of `root` in `tree`.
    pub fn new(tree: &'a VTree, root: NodeId) -> Self {
        Self { tree, root }
    }

    /// Use the top-level nodes of `tree`.
    pub fn from_tree(tree: &'a VTree) -> Self {
        Self::new(tree, tree.root())
    }

    pub fn tree(&self) -> &'a VTree {
        self.tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }
}

/// What a projection evaluation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionOutcome {
    /// Target nodes found.
    pub targets: usize,

    /// Nodes copied into targets.
    pub injected: usize,
}

/// Evaluate one projection directive against `tree`.
///
/// The action decides what is projected: `true` projects every child of the
/// injectables root, `false` nothing, and a string selects nodes below the
/// injectables root. A target keeps its fallback content unless at least one
/// node is projected into it.
#[instrument(skip(directive, tree, injectables), fields(selector = directive.selector()))]
pub fn evaluate_projection(
    directive: &Directive,
    tree: &mut VTree,
    injectables: Option<Injectables<'_>>,
) -> FlowResult<ProjectionOutcome> {
    let Some(injectables) = injectables else {
        return Ok(ProjectionOutcome::default());
    };
    let Some(value) = directive.run_action() else {
        return Err(FlowError::UnknownDirective {
            kind: DirectiveKind::Projection,
            selector: directive.selector().to_string(),
        });
    };

    let source = injectables.tree();
    let content = match Payload::from(value) {
        Payload::Flag(true) => source.live_children(injectables.root()),
        Payload::Flag(false) => Vec::new(),
        Payload::Text(selector) => source.query(injectables.root(), &Selector::parse(&selector)?),
        other => {
            return Err(FlowError::UnsupportedPayloadType {
                selector: directive.selector().to_string(),
                found: other.type_name(),
            })
        }
    };

    let targets = directive.matches(tree);
    let mut outcome = ProjectionOutcome {
        targets: targets.len(),
        injected: 0,
    };
    if content.is_empty() {
        return Ok(outcome);
    }

    for target in targets {
        // An earlier target may have cleared this one away.
        if !tree.contains(target) {
            continue;
        }
        tree.clear_children(target)?;
        for &node in &content {
            let copy = tree.import(source, node)?;
            tree.append_child(target, copy)?;
            outcome.injected += 1;
        }
        trace!(?target, count = content.len(), "content projected");
    }

    Ok(outcome)
}
