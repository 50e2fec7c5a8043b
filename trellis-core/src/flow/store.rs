//! Control-Flow State Store
//!
//! Per-instance bookkeeping for every conditional and repetition selector.
//! One store belongs to exactly one rendered tree; it is passed by `&mut` to
//! every engine call on that tree.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::debug;

use crate::config::FlowConfig;
use crate::directive::{DirectiveKind, DirectiveSet};
use crate::graph::FlowScheduler;
use crate::tree::{LocationId, NodeId, VTree};

/// A template copy of one subtree a conditional matched.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Fragment whose root's first child is the copy.
    pub(crate) fragment: VTree,

    /// Locations of the template siblings that followed the original. A
    /// restored copy goes before the first of them still present.
    pub(crate) following: Vec<LocationId>,
}

impl Snapshot {
    /// Location of the captured node.
    pub fn location(&self) -> Option<LocationId> {
        let top = self.fragment.first_child(self.fragment.root())?;
        self.fragment.get(top).map(|node| node.location())
    }
}

/// State of one conditional selector.
#[derive(Debug, Clone, Default)]
pub struct ConditionalState {
    pub(crate) last_payload: Option<bool>,

    /// Template snapshots of the matched subtrees, keyed by the location of
    /// the parent they were taken from.
    pub(crate) locations: IndexMap<LocationId, SmallVec<[Snapshot; 1]>>,
}

impl ConditionalState {
    /// The truthiness the conditional was last evaluated to.
    pub fn last_payload(&self) -> Option<bool> {
        self.last_payload
    }

    /// Parent locations that receive the subtree on reveal.
    pub fn parent_locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations.keys().copied()
    }

    /// Total number of captured snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.locations.values().map(SmallVec::len).sum()
    }

    /// Locations of every captured node.
    pub(crate) fn snapshot_locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations.values().flatten().filter_map(Snapshot::location)
    }
}

/// One parent a repetition materializes its items under.
#[derive(Debug, Clone)]
pub struct RepeatLocation {
    pub(crate) parent: NodeId,
    pub(crate) parent_location: LocationId,

    /// The item template, as a fragment.
    pub(crate) fragment: VTree,

    /// First sibling after the original literals. New items go before it
    /// when no other item is materialized.
    pub(crate) anchor: Option<NodeId>,

    /// Location of the anchor, used to find a replacement once the anchor
    /// itself is gone.
    pub(crate) anchor_location: Option<LocationId>,

    pub(crate) repeated: Vec<Option<NodeId>>,
}

impl RepeatLocation {
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn parent_location(&self) -> LocationId {
        self.parent_location
    }

    /// The node materialized for each payload index, if any.
    pub fn repeated(&self) -> &[Option<NodeId>] {
        &self.repeated
    }
}

/// State of one repetition selector.
#[derive(Debug, Clone, Default)]
pub struct RepetitionState {
    pub(crate) payload: Vec<Value>,
    pub(crate) payload_equality: Vec<bool>,
    pub(crate) locations: Vec<RepeatLocation>,
}

impl RepetitionState {
    /// The payload of the last evaluation.
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Per index, whether the last evaluation left the item unchanged.
    pub fn payload_equality(&self) -> &[bool] {
        &self.payload_equality
    }

    pub fn locations(&self) -> &[RepeatLocation] {
        &self.locations
    }

    /// Replace the payload and recompute the equality vector.
    ///
    /// Equality is computed over the longer of the two payloads; an index
    /// present on only one side is unequal. The vector is truncated to the
    /// new length once the patch has been applied.
    pub(crate) fn set_payload(&mut self, payload: Vec<Value>) {
        let len = self.payload.len().max(payload.len());
        self.payload_equality = (0..len)
            .map(|i| match (self.payload.get(i), payload.get(i)) {
                (Some(old), Some(new)) => old == new,
                _ => false,
            })
            .collect();
        self.payload = payload;
    }

    /// Every node this repetition has materialized and still tracks.
    pub fn materialized(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.locations
            .iter()
            .flat_map(|location| location.repeated.iter().flatten().copied())
    }
}

/// Selector-keyed state for one rendered tree.
#[derive(Debug)]
pub struct FlowStore {
    directives: Arc<DirectiveSet>,
    config: FlowConfig,
    graph: FlowScheduler,
    conditionals: IndexMap<String, ConditionalState>,
    repetitions: IndexMap<String, RepetitionState>,
    reseed: IndexSet<String>,
}

impl FlowStore {
    /// Create an empty store for a directive set.
    pub fn new(directives: Arc<DirectiveSet>, config: FlowConfig) -> Self {
        Self {
            directives,
            config,
            graph: FlowScheduler::new(),
            conditionals: IndexMap::new(),
            repetitions: IndexMap::new(),
            reseed: IndexSet::new(),
        }
    }

    pub fn directives(&self) -> &Arc<DirectiveSet> {
        &self.directives
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn graph(&self) -> &FlowScheduler {
        &self.graph
    }

    /// Drop every state record and install a new directive graph.
    pub fn reset(&mut self, graph: FlowScheduler) {
        self.graph = graph;
        self.conditionals.clear();
        self.repetitions.clear();
        self.reseed.clear();
    }

    pub fn conditional(&self, selector: &str) -> Option<&ConditionalState> {
        self.conditionals.get(selector)
    }

    pub(crate) fn conditional_mut(&mut self, selector: &str) -> Option<&mut ConditionalState> {
        self.conditionals.get_mut(selector)
    }

    pub(crate) fn insert_conditional(&mut self, selector: &str, state: ConditionalState) {
        self.conditionals.insert(selector.to_string(), state);
    }

    pub fn repetition(&self, selector: &str) -> Option<&RepetitionState> {
        self.repetitions.get(selector)
    }

    /// The state of one repetition together with every conditional state.
    pub(crate) fn repetition_with_conditionals(
        &mut self,
        selector: &str,
    ) -> (Option<&mut RepetitionState>, &IndexMap<String, ConditionalState>) {
        (self.repetitions.get_mut(selector), &self.conditionals)
    }

    pub(crate) fn insert_repetition(&mut self, selector: &str, state: RepetitionState) {
        self.reseed.shift_remove(selector);
        self.repetitions.insert(selector.to_string(), state);
    }

    /// Selectors of every repetition that currently has state.
    pub fn repetition_selectors(&self) -> impl Iterator<Item = &str> {
        self.repetitions.keys().map(String::as_str)
    }

    /// Discard the state of the given repetitions so their next update seeds
    /// them again. Selectors without state are ignored.
    ///
    /// Returns the selectors that were reset.
    pub(crate) fn reset_repetitions<I>(&mut self, selectors: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut reset = Vec::new();
        for selector in selectors {
            if self.repetitions.shift_remove(&selector).is_some() {
                debug!(%selector, "repetition state reset");
                self.reseed.insert(selector.clone());
                reset.push(selector);
            }
        }
        reset
    }

    /// Repetitions whose state was reset and that have not been updated
    /// since.
    pub fn scheduled_reseeds(&self) -> impl Iterator<Item = &str> {
        self.reseed.iter().map(String::as_str)
    }

    /// Check whether a selector has state of the given kind.
    pub fn is_initialized(&self, kind: DirectiveKind, selector: &str) -> bool {
        match kind {
            DirectiveKind::Conditional => self.conditionals.contains_key(selector),
            DirectiveKind::Repetition => self.repetitions.contains_key(selector),
            DirectiveKind::Projection => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_covers_both_lengths() {
        let mut state = RepetitionState::default();
        state.set_payload(vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(state.payload_equality(), &[false, false, false]);

        state.set_payload(vec![json!("a"), json!("x")]);
        assert_eq!(state.payload_equality(), &[true, false, false]);
        assert_eq!(state.payload().len(), 2);

        state.set_payload(vec![json!("a"), json!("x"), json!(null)]);
        assert_eq!(state.payload_equality(), &[true, true, false]);
    }

    #[test]
    fn reset_only_touches_existing_state() {
        let mut store = FlowStore::new(Arc::new(DirectiveSet::new()), FlowConfig::default());
        store.insert_repetition("li", RepetitionState::default());

        let reset = store.reset_repetitions(["li".to_string(), "td".to_string()]);
        assert_eq!(reset, vec!["li".to_string()]);
        assert!(!store.is_initialized(DirectiveKind::Repetition, "li"));
        assert_eq!(store.scheduled_reseeds().collect::<Vec<_>>(), vec!["li"]);

        store.insert_repetition("li", RepetitionState::default());
        assert_eq!(store.scheduled_reseeds().count(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = FlowStore::new(Arc::new(DirectiveSet::new()), FlowConfig::default());
        store.insert_conditional("p", ConditionalState::default());
        store.insert_repetition("li", RepetitionState::default());

        store.reset(FlowScheduler::new());
        assert!(store.conditional("p").is_none());
        assert_eq!(store.repetition_selectors().count(), 0);
    }
}
