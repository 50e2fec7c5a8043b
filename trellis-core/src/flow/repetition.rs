//! Repetition Directives
//!
//! A repetition turns the nodes its selector matches into an item template
//! and materializes one copy per truthy payload item.
//!
//! # Incremental Updates
//!
//! Every update compares the new payload with the previous one index by
//! index. Indices whose value is unchanged are never touched, so changing one
//! item in a list of N costs one deletion and one insertion regardless of N.
//! Indices that changed get their old node marked for deletion and, if the
//! new value is truthy, a fresh copy inserted in index order.
//!
//! # Locations
//!
//! A selector can match under several parents. Each parent becomes its own
//! [`RepeatLocation`] with its own item slots; all locations share the
//! payload.
//!
//! # Nested Conditionals
//!
//! Item templates are captured once, when the repetition is seeded. Before
//! every patch they are brought in line with the conditionals nested in
//! them, so a conditional hidden after seeding stays hidden in new items.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, instrument, trace};

use super::conditional;
use super::store::{ConditionalState, FlowStore, RepeatLocation, RepetitionState};
use crate::directive::{
    is_truthy, Directive, DirectiveId, DirectiveKind, Payload, PayloadResolver, Uid,
};
use crate::error::{FlowError, FlowResult};
use crate::tree::{NodeId, VTree};

/// What a repetition update did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepetitionOutcome {
    /// Whether state was created by this update.
    pub seeded: bool,

    /// Items materialized.
    pub created: usize,

    /// Nodes removed or marked for deletion, including literal template
    /// nodes cleared while seeding.
    pub removed: usize,

    /// Nested repetition selectors whose state was reset.
    pub reset: Vec<String>,
}

impl RepetitionOutcome {
    /// Whether the update changed the tree at all.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.removed == 0
    }
}

/// How literal template nodes are cleared when state is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// Free them now; the tree has not been rendered yet.
    Immediate,

    /// Mark them for deletion; the tree is live.
    Deferred,
}

/// Resolve a repetition payload, rejecting anything that is not an array.
pub(crate) fn resolve_items<R>(directive: &Directive, uid: &Uid, resolver: &R) -> FlowResult<Vec<Value>>
where
    R: PayloadResolver + ?Sized,
{
    match Payload::from(resolver.resolve(directive, uid)) {
        Payload::Items(items) => Ok(items),
        other => Err(FlowError::InvalidPayloadType {
            selector: directive.selector().to_string(),
            found: other.type_name(),
        }),
    }
}

/// Seed repetition state from the nodes the selector currently matches.
///
/// Matches are grouped by parent. The first match of each group becomes the
/// item template. Groups whose parent sits inside another match belong to an
/// item template and are skipped. The tree is left as is; the literal nodes
/// to clear are returned alongside the state.
pub(crate) fn seed(tree: &VTree, directive: &Directive) -> FlowResult<(RepetitionState, Vec<NodeId>)> {
    let matches = directive.matches(tree);
    let mut groups: IndexMap<NodeId, Vec<NodeId>> = IndexMap::new();
    for &node in &matches {
        if let Some(parent) = tree.parent(node) {
            groups.entry(parent).or_default().push(node);
        }
    }

    let mut state = RepetitionState::default();
    let mut cleared = Vec::new();

    for (parent, literals) in groups {
        let nested = matches
            .iter()
            .any(|other| parent == *other || tree.is_descendant(parent, *other));
        if nested {
            continue;
        }
        let (Some(&first), Some(&last)) = (literals.first(), literals.last()) else {
            continue;
        };
        let Some(parent_location) = tree.get(parent).map(|node| node.location()) else {
            continue;
        };

        let mut fragment = tree.extract(first)?;
        if let Some(top) = fragment.first_child(fragment.root()) {
            fragment.clear_repeat(top)?;
        }
        let anchor = tree.next_live_sibling(last);

        state.locations.push(RepeatLocation {
            parent,
            parent_location,
            fragment,
            anchor,
            anchor_location: anchor.and_then(|anchor| tree.get(anchor)).map(|node| node.location()),
            repeated: Vec::new(),
        });
        cleared.extend(literals);
    }

    debug!(
        selector = directive.selector(),
        locations = state.locations.len(),
        literals = cleared.len(),
        "repetition seeded"
    );
    Ok((state, cleared))
}

/// Remove the literal template nodes found while seeding.
fn clear_literals(tree: &mut VTree, literals: &[NodeId], removal: Removal) -> FlowResult<usize> {
    let mut removed = 0;
    for &literal in literals {
        if !tree.contains(literal) {
            continue;
        }
        match removal {
            Removal::Immediate => tree.remove(literal)?,
            Removal::Deferred => {
                if !tree.mark_for_deletion(literal)? {
                    continue;
                }
            }
        }
        removed += 1;
    }
    Ok(removed)
}

/// Bring the item templates in line with the given conditionals: subtrees
/// of hidden ones are dropped, subtrees of shown ones restored.
fn settle_fragments(state: &mut RepetitionState, conditionals: &[&ConditionalState]) -> FlowResult<()> {
    for location in &mut state.locations {
        let fragment = &mut location.fragment;
        let Some(top) = fragment.first_child(fragment.root()) else {
            continue;
        };

        for nested in conditionals {
            match nested.last_payload {
                Some(false) => {
                    for captured in nested.snapshot_locations() {
                        for node in fragment.find_by_location(captured) {
                            if node != top && fragment.contains(node) {
                                fragment.remove(node)?;
                            }
                        }
                    }
                }
                Some(true) => {
                    for (parent_location, snapshots) in &nested.locations {
                        for parent in fragment.find_by_location(*parent_location) {
                            if parent != top && !fragment.is_descendant(parent, top) {
                                continue;
                            }
                            for snapshot in snapshots {
                                conditional::restore(fragment, parent, snapshot)?;
                            }
                        }
                    }
                }
                None => {}
            }
        }
    }
    Ok(())
}

/// Apply the unequal indices of `state` to the tree.
///
/// Returns how many items were created and how many were marked.
pub(crate) fn apply(
    tree: &mut VTree,
    state: &mut RepetitionState,
    index_attribute: Option<&str>,
) -> FlowResult<(usize, usize)> {
    let RepetitionState {
        payload,
        payload_equality,
        locations,
    } = state;
    let mut created = 0;
    let mut removed = 0;

    for location in locations.iter_mut() {
        if location.repeated.len() < payload_equality.len() {
            location.repeated.resize(payload_equality.len(), None);
        }
    }

    for (index, equal) in payload_equality.iter().enumerate() {
        if *equal {
            continue;
        }
        let value = payload.get(index);

        for location in locations.iter_mut() {
            if !tree.contains(location.parent) {
                continue;
            }

            if let Some(old) = location.repeated[index].take() {
                if tree.contains(old) && tree.mark_for_deletion(old)? {
                    trace!(index, node = ?old, "repeated item marked");
                    removed += 1;
                }
            }

            let Some(value) = value.filter(|value| is_truthy(value)) else {
                continue;
            };
            let Some(top) = location.fragment.first_child(location.fragment.root()) else {
                continue;
            };

            let node = tree.import(&location.fragment, top)?;
            let reference = insertion_point(tree, location, index);
            tree.insert_before(location.parent, node, reference)?;
            tree.annotate_repeat(node, index, value.clone())?;
            if let Some(attribute) = index_attribute {
                tree.set_attribute(node, attribute, index.to_string())?;
            }
            location.repeated[index] = Some(node);
            trace!(index, ?node, "repeated item created");
            created += 1;
        }
    }

    let len = payload.len();
    payload_equality.truncate(len);
    for location in locations.iter_mut() {
        location.repeated.truncate(len);
    }

    Ok((created, removed))
}

/// The sibling a new item at `index` goes before, or `None` to append.
///
/// The item follows the nearest earlier live item. Without one it goes
/// before the nearest later live item, and without that before the anchor.
/// An anchor that is gone is replaced by the first live child copied from
/// the same template node.
fn insertion_point(tree: &VTree, location: &mut RepeatLocation, index: usize) -> Option<NodeId> {
    let parent = location.parent;
    let is_child = |node: NodeId| tree.parent(node) == Some(parent) && !tree.is_marked(node);

    if let Some(earlier) = location.repeated[..index]
        .iter()
        .rev()
        .flatten()
        .copied()
        .find(|node| is_child(*node))
    {
        return tree.next_sibling(earlier);
    }
    if let Some(later) = location.repeated[index + 1..]
        .iter()
        .flatten()
        .copied()
        .find(|node| is_child(*node))
    {
        return Some(later);
    }

    if !location.anchor.is_some_and(|anchor| is_child(anchor)) {
        let wanted = location.anchor_location?;
        location.anchor = tree
            .live_children(parent)
            .into_iter()
            .find(|child| tree.get(*child).is_some_and(|node| node.location() == wanted));
        trace!(anchor = ?location.anchor, "repetition re-anchored");
    }
    location.anchor
}

/// Re-evaluate one repetition against a rendered tree.
///
/// Seeds state on first use. The payload is resolved and validated before
/// anything changes, so a non-array payload leaves tree and state untouched.
#[instrument(skip(tree, store, resolver, uid), fields(uid = %uid))]
pub fn update_repetition<R>(
    selector: &str,
    tree: &mut VTree,
    uid: &Uid,
    store: &mut FlowStore,
    resolver: &R,
) -> FlowResult<RepetitionOutcome>
where
    R: PayloadResolver + ?Sized,
{
    let directives = Arc::clone(store.directives());
    let (id, directive) = directives
        .lookup(DirectiveKind::Repetition, selector)
        .ok_or_else(|| FlowError::UnknownDirective {
            kind: DirectiveKind::Repetition,
            selector: selector.to_string(),
        })?;

    let items = resolve_items(directive, uid, resolver)?;
    process(id, directive, items, tree, store, Removal::Deferred)
}

/// Seed if needed, then patch. Shared by initialization and updates.
///
/// Fresh state only reaches the store once its first patch went through.
pub(crate) fn process(
    id: DirectiveId,
    directive: &Directive,
    items: Vec<Value>,
    tree: &mut VTree,
    store: &mut FlowStore,
    removal: Removal,
) -> FlowResult<RepetitionOutcome> {
    let selector = directive.selector();
    let directives = Arc::clone(store.directives());
    let nested_conditionals: Vec<&str> = store
        .graph()
        .dependents_of(id, Some(DirectiveKind::Conditional))
        .into_iter()
        .filter_map(|dependent| directives.get(dependent))
        .map(Directive::selector)
        .collect();
    let attribute = store.config().repeat_index_attribute.clone();

    let mut fresh = match store.repetition(selector) {
        Some(_) => None,
        None => Some(seed(tree, directive)?),
    };

    let (created, removed) = {
        let (existing, conditionals) = store.repetition_with_conditionals(selector);
        let state = match (fresh.as_mut(), existing) {
            (Some((state, _)), _) => state,
            (None, Some(state)) => state,
            (None, None) => {
                return Err(FlowError::NotInitialized {
                    kind: DirectiveKind::Repetition,
                    selector: selector.to_string(),
                })
            }
        };
        let nested: Vec<&ConditionalState> = nested_conditionals
            .iter()
            .filter_map(|nested| conditionals.get(*nested))
            .collect();
        settle_fragments(state, &nested)?;
        state.set_payload(items);
        apply(tree, state, attribute.as_deref())?
    };

    let mut outcome = RepetitionOutcome {
        created,
        removed,
        ..RepetitionOutcome::default()
    };
    if let Some((state, literals)) = fresh {
        outcome.removed += clear_literals(tree, &literals, removal)?;
        outcome.seeded = true;
        store.insert_repetition(selector, state);
    }

    if created + removed > 0 {
        let nested: Vec<String> = store
            .graph()
            .dependents_of(id, Some(DirectiveKind::Repetition))
            .into_iter()
            .filter_map(|dependent| directives.get(dependent))
            .map(|dependent| dependent.selector().to_string())
            .collect();
        outcome.reset = store.reset_repetitions(nested);
    }

    debug!(
        seeded = outcome.seeded,
        created = outcome.created,
        removed = outcome.removed,
        "repetition patched"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::directive::{DirectiveSet, PayloadTable};
    use crate::tree::Mutation;
    use serde_json::json;

    struct Fixture {
        tree: VTree,
        store: FlowStore,
        table: PayloadTable,
        uid: Uid,
    }

    impl Fixture {
        fn new(markup: &str, config: FlowConfig) -> Self {
            let set = DirectiveSet::from_directives([Directive::repetition("li", "items").unwrap()]).unwrap();
            Self {
                tree: VTree::parse(markup).unwrap(),
                store: FlowStore::new(Arc::new(set), config),
                table: PayloadTable::new(),
                uid: Uid::from("u"),
            }
        }

        fn update(&mut self, items: Value) -> FlowResult<RepetitionOutcome> {
            self.table.set(&self.uid, "items", items);
            update_repetition("li", &mut self.tree, &self.uid, &mut self.store, &self.table)
        }
    }

    #[test]
    fn first_update_seeds_and_materializes() {
        let mut fx = Fixture::new("<ul><li>x</li><li>x</li></ul>", FlowConfig::default());
        let outcome = fx.update(json!(["a", "b", "c"])).unwrap();

        assert!(outcome.seeded);
        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.removed, 2);
        assert_eq!(fx.tree.to_markup(), "<ul><li>x</li><li>x</li><li>x</li></ul>");

        let state = fx.store.repetition("li").unwrap();
        assert_eq!(state.locations().len(), 1);
        assert_eq!(state.payload_equality(), &[false, false, false]);
    }

    #[test]
    fn items_keep_index_order_and_anchor() {
        let mut fx = Fixture::new("<ul><li></li><hr></hr></ul>", FlowConfig::default());
        fx.update(json!([1, 0, 3])).unwrap();
        assert_eq!(fx.tree.to_markup(), "<ul><li></li><li></li><hr></hr></ul>");

        // The falsy index becomes truthy and lands between its neighbours.
        fx.update(json!([1, 2, 3])).unwrap();
        let location = &fx.store.repetition("li").unwrap().locations()[0];
        let order: Vec<usize> = fx
            .tree
            .live_children(location.parent())
            .into_iter()
            .filter_map(|node| fx.tree.get(node)?.repeat_info().map(|info| info.index))
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(
            fx.tree.to_markup(),
            "<ul><li></li><li></li><li></li><hr></hr></ul>"
        );
    }

    #[test]
    fn single_change_touches_one_index() {
        let mut fx = Fixture::new("<ul><li></li></ul>", FlowConfig::default());
        fx.update(json!(["A", "B", "C"])).unwrap();
        let old = fx.store.repetition("li").unwrap().locations()[0].repeated()[1].unwrap();
        fx.tree.take_mutations();

        let outcome = fx.update(json!(["A", "X", "C"])).unwrap();
        assert_eq!((outcome.created, outcome.removed), (1, 1));

        let new = fx.store.repetition("li").unwrap().locations()[0].repeated()[1].unwrap();
        let parent = fx.store.repetition("li").unwrap().locations()[0].parent();
        assert_eq!(
            fx.tree.take_mutations(),
            vec![
                Mutation::Marked { node: old },
                Mutation::Attached { parent, node: new },
                Mutation::Annotated { node: new, index: 1 },
            ]
        );
        assert_eq!(fx.tree.get(new).unwrap().repeat_info().unwrap().value, json!("X"));
    }

    #[test]
    fn literals_are_cleared_after_the_first_patch() {
        let mut fx = Fixture::new("<ul><li></li></ul>", FlowConfig::default());
        let directive = Directive::repetition("li", "items").unwrap();

        let (state, literals) = seed(&fx.tree, &directive).unwrap();
        assert_eq!(state.locations().len(), 1);
        assert_eq!(literals.len(), 1);
        assert!(fx.tree.is_live(literals[0]));
        assert!(fx.tree.mutations().is_empty());

        fx.update(json!(["a"])).unwrap();
        let location = &fx.store.repetition("li").unwrap().locations()[0];
        let (parent, item) = (location.parent(), location.repeated()[0].unwrap());
        assert_eq!(
            fx.tree.take_mutations(),
            vec![
                Mutation::Attached { parent, node: item },
                Mutation::Annotated { node: item, index: 0 },
                Mutation::Marked { node: literals[0] },
            ]
        );
    }

    #[test]
    fn shrinking_truncates_slots() {
        let mut fx = Fixture::new("<ul><li></li></ul>", FlowConfig::default());
        fx.update(json!([1, 2, 3])).unwrap();
        let outcome = fx.update(json!([1])).unwrap();

        assert_eq!(outcome.removed, 2);
        let state = fx.store.repetition("li").unwrap();
        assert_eq!(state.payload_equality(), &[true]);
        assert_eq!(state.locations()[0].repeated().len(), 1);
        assert_eq!(fx.tree.to_markup(), "<ul><li></li></ul>");
    }

    #[test]
    fn non_array_payload_is_rejected_without_mutation() {
        let mut fx = Fixture::new("<ul><li></li></ul>", FlowConfig::default());
        let err = fx.update(json!("not-an-array")).unwrap_err();

        assert!(matches!(
            err,
            FlowError::InvalidPayloadType { ref selector, found: "string" } if selector == "li"
        ));
        assert!(fx.tree.mutations().is_empty());
        assert!(fx.store.repetition("li").is_none());
    }

    #[test]
    fn index_attribute_is_written() {
        let config = FlowConfig::default().with_repeat_index_attribute("data-index");
        let mut fx = Fixture::new("<ul><li></li></ul>", config);
        fx.update(json!(["a", "b"])).unwrap();

        assert_eq!(
            fx.tree.to_markup(),
            r#"<ul><li data-index="0"></li><li data-index="1"></li></ul>"#
        );
    }
}
