//! Instance Registry
//!
//! A [`Template`] is parsed and analysed once. Every instance id rendered
//! from it gets its own [`FlowInstance`], holding the rendered tree and the
//! state store that belongs to that tree. [`FlowRegistry`] keeps the
//! instances of one template so that different ids can be processed from
//! different threads while each single instance stays serialized.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::config::FlowConfig;
use crate::directive::{DirectiveKind, DirectiveSet, PayloadResolver, Uid};
use crate::error::FlowResult;
use crate::flow::{
    self, ConditionalOutcome, FlowStore, Injectables, ProjectionOutcome, RepetitionOutcome,
};
use crate::tree::{MarkupError, VTree};

/// A template tree with its directives.
#[derive(Debug, Clone)]
pub struct Template {
    blueprint: VTree,
    directives: Arc<DirectiveSet>,
    config: FlowConfig,
}

impl Template {
    pub fn new(blueprint: VTree, directives: DirectiveSet) -> Self {
        Self {
            blueprint,
            directives: Arc::new(directives),
            config: FlowConfig::default(),
        }
    }

    /// Parse the template tree from markup.
    pub fn parse(markup: &str, directives: DirectiveSet) -> Result<Self, MarkupError> {
        Ok(Self::new(VTree::parse(markup)?, directives))
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn blueprint(&self) -> &VTree {
        &self.blueprint
    }

    pub fn directives(&self) -> &Arc<DirectiveSet> {
        &self.directives
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Render the template for `uid`.
    pub fn instantiate<R>(&self, uid: Uid, resolver: &R) -> FlowResult<FlowInstance>
    where
        R: PayloadResolver + ?Sized,
    {
        let mut store = FlowStore::new(Arc::clone(&self.directives), self.config.clone());
        let tree = flow::initialize_self_contained_flows(&self.blueprint, &uid, &mut store, resolver)?;
        Ok(FlowInstance { uid, tree, store })
    }
}

/// Per-directive results of [`FlowInstance::refresh`], in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub conditionals: Vec<(String, ConditionalOutcome)>,
    pub repetitions: Vec<(String, RepetitionOutcome)>,
}

impl RefreshOutcome {
    /// Whether the refresh left the tree as it was.
    pub fn is_noop(&self) -> bool {
        self.conditionals.iter().all(|(_, outcome)| !outcome.changed)
            && self.repetitions.iter().all(|(_, outcome)| outcome.is_noop())
    }
}

/// One rendered instance of a template.
#[derive(Debug)]
pub struct FlowInstance {
    uid: Uid,
    tree: VTree,
    store: FlowStore,
}

impl FlowInstance {
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn tree(&self) -> &VTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut VTree {
        &mut self.tree
    }

    pub fn store(&self) -> &FlowStore {
        &self.store
    }

    /// Serialize the rendered tree.
    pub fn render(&self) -> String {
        self.tree.to_markup()
    }

    pub fn update_conditional<R>(&mut self, selector: &str, resolver: &R) -> FlowResult<ConditionalOutcome>
    where
        R: PayloadResolver + ?Sized,
    {
        flow::update_conditional(selector, &mut self.tree, &self.uid, &mut self.store, resolver)
    }

    pub fn update_repetition<R>(&mut self, selector: &str, resolver: &R) -> FlowResult<RepetitionOutcome>
    where
        R: PayloadResolver + ?Sized,
    {
        flow::update_repetition(selector, &mut self.tree, &self.uid, &mut self.store, resolver)
    }

    /// Re-evaluate every conditional, then every repetition, enclosing
    /// directives first. Repetitions reset along the way are seeded again.
    #[instrument(skip(self, resolver), fields(uid = %self.uid))]
    pub fn refresh<R>(&mut self, resolver: &R) -> FlowResult<RefreshOutcome>
    where
        R: PayloadResolver + ?Sized,
    {
        let directives = Arc::clone(self.store.directives());
        let mut outcome = RefreshOutcome::default();

        let conditionals = self.store.graph().evaluation_order(DirectiveKind::Conditional);
        let repetitions = self.store.graph().evaluation_order(DirectiveKind::Repetition);

        for id in conditionals {
            if let Some(directive) = directives.get(id) {
                let selector = directive.selector();
                let result = self.update_conditional(selector, resolver)?;
                outcome.conditionals.push((selector.to_string(), result));
            }
        }
        for id in repetitions {
            if let Some(directive) = directives.get(id) {
                let selector = directive.selector();
                let result = self.update_repetition(selector, resolver)?;
                outcome.repetitions.push((selector.to_string(), result));
            }
        }

        Ok(outcome)
    }

    /// Evaluate every projection against the rendered tree.
    pub fn project(&mut self, injectables: Injectables<'_>) -> FlowResult<Vec<ProjectionOutcome>> {
        let directives = Arc::clone(self.store.directives());
        directives
            .of_kind(DirectiveKind::Projection)
            .map(|(_, directive)| flow::evaluate_projection(directive, &mut self.tree, Some(injectables)))
            .collect()
    }

    /// Physically remove every node marked for deletion.
    pub fn commit(&mut self) -> usize {
        self.tree.commit_deletions()
    }
}

/// The rendered instances of one template, keyed by instance id.
#[derive(Debug)]
pub struct FlowRegistry {
    template: Arc<Template>,
    instances: DashMap<Uid, Arc<Mutex<FlowInstance>>>,
}

impl FlowRegistry {
    pub fn new(template: Template) -> Self {
        Self {
            template: Arc::new(template),
            instances: DashMap::new(),
        }
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    /// Render the template for `uid`, replacing any previous instance.
    #[instrument(skip(self, resolver))]
    pub fn instantiate<R>(&self, uid: &Uid, resolver: &R) -> FlowResult<Arc<Mutex<FlowInstance>>>
    where
        R: PayloadResolver + ?Sized,
    {
        let instance = Arc::new(Mutex::new(self.template.instantiate(uid.clone(), resolver)?));
        if self.instances.insert(uid.clone(), Arc::clone(&instance)).is_some() {
            debug!("replaced existing instance");
        }
        Ok(instance)
    }

    pub fn get(&self, uid: &Uid) -> Option<Arc<Mutex<FlowInstance>>> {
        self.instances.get(uid).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` with exclusive access to the instance for `uid`.
    pub fn with_instance<T, F>(&self, uid: &Uid, f: F) -> Option<T>
    where
        F: FnOnce(&mut FlowInstance) -> T,
    {
        let instance = self.get(uid)?;
        let mut guard = instance.lock();
        Some(f(&mut *guard))
    }

    /// Drop the instance for `uid` together with its state.
    pub fn discard(&self, uid: &Uid) -> bool {
        self.instances.remove(uid).is_some()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
