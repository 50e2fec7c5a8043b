//! Initialization
//!
//! Builds the first rendering of a template for one instance id. The
//! template itself is never modified.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::conditional;
use super::projection::{evaluate_projection, Injectables};
use super::repetition::{self, Removal};
use super::store::FlowStore;
use crate::directive::{DirectiveKind, Payload, PayloadResolver, Uid};
use crate::error::FlowResult;
use crate::graph::FlowScheduler;
use crate::tree::VTree;

/// Render the self-contained directives of `template` for `uid`.
///
/// Clears `store`, then evaluates every conditional followed by every
/// repetition, enclosing directives first. Falsy conditionals and literal
/// repetition nodes are removed outright since nothing has seen the tree
/// yet, and the returned tree's journal starts empty.
#[instrument(skip(template, store, resolver, uid), fields(uid = %uid))]
pub fn initialize_self_contained_flows<R>(
    template: &VTree,
    uid: &Uid,
    store: &mut FlowStore,
    resolver: &R,
) -> FlowResult<VTree>
where
    R: PayloadResolver + ?Sized,
{
    let directives = Arc::clone(store.directives());
    store.reset(FlowScheduler::build(template, &directives));

    let mut expanded = template.clone();
    expanded.set_journal(store.config().record_mutations);

    let conditionals = store.graph().evaluation_order(DirectiveKind::Conditional);
    for id in conditionals {
        let Some(directive) = directives.get(id) else {
            continue;
        };
        let payload = Payload::from(resolver.resolve(directive, uid)).truthy();
        let state = conditional::seed(template, directive, payload)?;
        store.insert_conditional(directive.selector(), state);
        if !payload {
            let removed = conditional::excise(&mut expanded, directive)?;
            debug!(selector = directive.selector(), removed, "conditional pruned");
        }
    }

    let repetitions = store.graph().evaluation_order(DirectiveKind::Repetition);
    for id in repetitions {
        let Some(directive) = directives.get(id) else {
            continue;
        };
        let items = repetition::resolve_items(directive, uid, resolver)?;
        repetition::process(id, directive, items, &mut expanded, store, Removal::Immediate)?;
    }

    expanded.take_mutations();
    Ok(expanded)
}

/// Copy `tree` and evaluate every projection against the copy.
///
/// Without injectables the copy is returned as is.
#[instrument(skip_all)]
pub fn initialize_parent_defined_flows(
    tree: &VTree,
    injectables: Option<Injectables<'_>>,
    store: &FlowStore,
) -> FlowResult<VTree> {
    let mut projected = tree.clone();
    if injectables.is_none() {
        return Ok(projected);
    }
    for (_, directive) in store.directives().of_kind(DirectiveKind::Projection) {
        evaluate_projection(directive, &mut projected, injectables)?;
    }
    Ok(projected)
}
