//! Conditional Directives
//!
//! A conditional keeps its matched subtrees only while its payload is
//! truthy. Snapshots of the subtrees are taken from the template once, so a
//! later reveal can rebuild them even after the rendered copies were
//! deleted.

use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::{debug, instrument, trace, warn};

use super::store::{ConditionalState, FlowStore, Snapshot};
use crate::directive::{Directive, DirectiveKind, Payload, PayloadResolver, Uid};
use crate::error::{FlowError, FlowResult};
use crate::tree::{NodeId, VTree};

/// What a conditional update did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalOutcome {
    /// Whether the truthiness flipped.
    pub changed: bool,

    /// Subtrees attached by a reveal.
    pub attached: usize,

    /// Subtrees marked for deletion by a hide.
    pub marked: usize,

    /// Repetition selectors whose state was reset.
    pub reset: Vec<String>,
}

/// Capture the conditional's state from the template.
///
/// Matches nested inside another match of the same selector are covered by
/// the outer snapshot and are not captured separately.
pub(crate) fn seed(template: &VTree, directive: &Directive, payload: bool) -> FlowResult<ConditionalState> {
    let matches = directive.matches(template);
    let mut state = ConditionalState {
        last_payload: Some(payload),
        ..ConditionalState::default()
    };

    for &node in &matches {
        if matches.iter().any(|other| template.is_descendant(node, *other)) {
            continue;
        }
        let Some(parent) = template.parent(node).and_then(|parent| template.get(parent)) else {
            continue;
        };
        let following = parent
            .children()
            .iter()
            .skip_while(|sibling| **sibling != node)
            .skip(1)
            .filter_map(|sibling| template.get(*sibling))
            .map(|sibling| sibling.location())
            .collect();
        let snapshot = Snapshot {
            fragment: template.extract(node)?,
            following,
        };
        state
            .locations
            .entry(parent.location())
            .or_insert_with(SmallVec::new)
            .push(snapshot);
    }

    debug!(
        selector = directive.selector(),
        payload,
        snapshots = state.snapshot_count(),
        "conditional seeded"
    );
    Ok(state)
}

/// Remove every node the conditional matches right away. Used while the
/// tree is still being built and nobody has seen it.
pub(crate) fn excise(tree: &mut VTree, directive: &Directive) -> FlowResult<usize> {
    let mut removed = 0;
    for node in directive.matches(tree) {
        if tree.contains(node) {
            tree.remove(node)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Re-evaluate one conditional against a rendered tree.
///
/// An unchanged truthiness is a no-op. A reveal attaches a fresh copy of
/// every snapshot to every live node at the recorded parent locations and
/// resets the repetitions nested in the revealed subtrees. A hide marks
/// every matched node for deletion.
#[instrument(skip(tree, store, resolver, uid), fields(uid = %uid))]
pub fn update_conditional<R>(
    selector: &str,
    tree: &mut VTree,
    uid: &Uid,
    store: &mut FlowStore,
    resolver: &R,
) -> FlowResult<ConditionalOutcome>
where
    R: PayloadResolver + ?Sized,
{
    let directives = Arc::clone(store.directives());
    let (id, directive) = directives
        .lookup(DirectiveKind::Conditional, selector)
        .ok_or_else(|| FlowError::UnknownDirective {
            kind: DirectiveKind::Conditional,
            selector: selector.to_string(),
        })?;
    let selector = directive.selector();

    let Some(state) = store.conditional(selector) else {
        return Err(FlowError::NotInitialized {
            kind: DirectiveKind::Conditional,
            selector: selector.to_string(),
        });
    };

    let payload = Payload::from(resolver.resolve(directive, uid)).truthy();
    if state.last_payload == Some(payload) {
        trace!(payload, "conditional unchanged");
        return Ok(ConditionalOutcome::default());
    }

    let mut outcome = ConditionalOutcome {
        changed: true,
        ..ConditionalOutcome::default()
    };

    if payload {
        outcome.attached = reveal(tree, state)?;

        let mut nested: IndexSet<String> = store
            .graph()
            .dependents_of(id, Some(DirectiveKind::Repetition))
            .into_iter()
            .filter_map(|dependent| directives.get(dependent))
            .map(|dependent| dependent.selector().to_string())
            .collect();
        nested.extend(nested_repetitions(tree, directive, store));
        outcome.reset = store.reset_repetitions(nested);
    } else {
        for node in directive.matches(tree) {
            if tree.mark_for_deletion(node)? {
                trace!(?node, "conditional subtree marked");
                outcome.marked += 1;
            }
        }
    }

    if let Some(state) = store.conditional_mut(selector) {
        state.last_payload = Some(payload);
    }

    debug!(
        payload,
        attached = outcome.attached,
        marked = outcome.marked,
        reset = ?outcome.reset,
        "conditional flipped"
    );
    Ok(outcome)
}

fn reveal(tree: &mut VTree, state: &ConditionalState) -> FlowResult<usize> {
    let mut attached = 0;
    for (location, snapshots) in &state.locations {
        let parents = tree.find_by_location(*location);
        if parents.is_empty() {
            warn!(?location, "no live parent for conditional subtree");
            continue;
        }
        for parent in parents {
            for snapshot in snapshots {
                if let Some(node) = restore(tree, parent, snapshot)? {
                    trace!(?parent, ?node, "conditional subtree attached");
                    attached += 1;
                }
            }
        }
    }
    Ok(attached)
}

/// Attach a copy of `snapshot` under `parent` at its template position.
///
/// Does nothing if `parent` already has a live child copied from the same
/// template node.
pub(crate) fn restore(tree: &mut VTree, parent: NodeId, snapshot: &Snapshot) -> FlowResult<Option<NodeId>> {
    let fragment = &snapshot.fragment;
    let (Some(top), Some(location)) = (fragment.first_child(fragment.root()), snapshot.location()) else {
        return Ok(None);
    };

    let children = tree.live_children(parent);
    let location_of = |child: &NodeId| tree.get(*child).map(|node| node.location());
    if children.iter().any(|child| location_of(child) == Some(location)) {
        return Ok(None);
    }
    let reference = children
        .iter()
        .find(|child| location_of(*child).is_some_and(|found| snapshot.following.contains(&found)))
        .copied();

    let node = tree.import(fragment, top)?;
    tree.insert_before(parent, node, reference)?;
    Ok(Some(node))
}

/// Repetitions with state whose current matches or materialized items sit
/// inside a node the conditional currently matches.
fn nested_repetitions(tree: &VTree, conditional: &Directive, store: &FlowStore) -> Vec<String> {
    let roots = conditional.matches(tree);
    if roots.is_empty() {
        return Vec::new();
    }
    let inside = |node: NodeId| roots.iter().any(|root| tree.is_descendant(node, *root));

    store
        .repetition_selectors()
        .filter(|selector| {
            let matched = store
                .directives()
                .lookup(DirectiveKind::Repetition, selector)
                .map(|(_, directive)| directive.matches(tree))
                .unwrap_or_default();
            let materialized = store
                .repetition(selector)
                .map(|state| {
                    state
                        .materialized()
                        .filter(|node| tree.is_live(*node))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            matched.into_iter().chain(materialized).any(|node| inside(node))
        })
        .map(str::to_string)
        .collect()
}
