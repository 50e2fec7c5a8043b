//! Flow Scheduler
//!
//! The scheduler owns the directive graph of one template and answers two
//! questions for the engine:
//!
//! 1. In which order should directives of a kind be evaluated? Enclosing
//!    directives come before the directives nested inside them, so a
//!    repetition inside a repeated item is seeded after the outer items
//!    exist.
//! 2. Which directives are nested inside a given one? Their state goes stale
//!    when the enclosing directive rebuilds its subtree.
//!
//! # Algorithm
//!
//! Edges come from tree containment in the template: if any node matched by
//! B is a descendant of any node matched by A, there is an edge A -> B.
//! Ordering is Kahn's algorithm restricted to the requested kind, seeded in
//! declaration order so the result is deterministic. Selectors can match
//! nodes at several depths and form a cycle; the directives on a cycle are
//! appended in declaration order.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::{trace, warn};

use super::node::FlowNode;
use crate::directive::{DirectiveId, DirectiveKind, DirectiveSet};
use crate::tree::{NodeId, VTree};

/// The directive dependency graph of one template.
#[derive(Debug, Default)]
pub struct FlowScheduler {
    /// All nodes in the graph, in declaration order.
    nodes: IndexMap<DirectiveId, FlowNode>,
}

impl FlowScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Build the graph for the conditional and repetition directives of a
    /// template. Projections run against parent content and take no part.
    pub fn build(template: &VTree, directives: &DirectiveSet) -> Self {
        let mut scheduler = Self::new();
        let mut matched: Vec<(DirectiveId, Vec<NodeId>)> = Vec::new();

        for (id, directive) in directives.iter() {
            if directive.kind() == DirectiveKind::Projection {
                continue;
            }
            scheduler.add_node(FlowNode::new(id, directive.kind()));
            matched.push((id, directive.matches(template)));
        }

        for (outer, outer_nodes) in &matched {
            for (inner, inner_nodes) in &matched {
                if outer == inner {
                    continue;
                }
                let nested = inner_nodes.iter().any(|inner_node| {
                    outer_nodes
                        .iter()
                        .any(|outer_node| template.is_descendant(*inner_node, *outer_node))
                });
                if nested {
                    trace!(?outer, ?inner, "directive nested in template");
                    scheduler.add_edge(*outer, *inner);
                }
            }
        }

        scheduler
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: FlowNode) -> DirectiveId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub fn get_node(&self, id: DirectiveId) -> Option<&FlowNode> {
        self.nodes.get(&id)
    }

    /// Add a dependency edge: `dependent` is nested inside `dependency`.
    pub fn add_edge(&mut self, dependency: DirectiveId, dependent: DirectiveId) {
        if let Some(node) = self.nodes.get_mut(&dependency) {
            node.add_dependent(dependent);
        }
        if let Some(node) = self.nodes.get_mut(&dependent) {
            node.add_dependency(dependency);
        }
    }

    /// Every directive nested inside `id`, directly or transitively, in
    /// breadth-first order. Optionally restricted to one kind.
    pub fn dependents_of(&self, id: DirectiveId, kind: Option<DirectiveKind>) -> Vec<DirectiveId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(node) = self.nodes.get(&id) {
            queue.extend(node.dependents().iter().copied());
        }
        visited.insert(id);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                if kind.map_or(true, |kind| node.kind() == kind) {
                    result.push(current);
                }
                queue.extend(node.dependents().iter().copied());
            }
        }

        result
    }

    /// Evaluation order for the directives of one kind: enclosing before
    /// enclosed.
    pub fn evaluation_order(&self, kind: DirectiveKind) -> Vec<DirectiveId> {
        let nodes: Vec<DirectiveId> = self
            .nodes
            .values()
            .filter(|node| node.kind() == kind)
            .map(FlowNode::id)
            .collect();
        self.topological_sort(nodes)
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<DirectiveId>) -> Vec<DirectiveId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<DirectiveId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &id in &nodes {
            if let Some(node) = self.nodes.get(&id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(id, degree);
                if degree == 0 {
                    queue.push_back(id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            result.push(id);

            if let Some(node) = self.nodes.get(&id) {
                for dependent in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if result.len() < nodes.len() {
            let placed: HashSet<_> = result.iter().copied().collect();
            let cyclic: Vec<_> = nodes.into_iter().filter(|id| !placed.contains(id)).collect();
            warn!(?cyclic, "directive containment forms a cycle; using declaration order");
            result.extend(cyclic);
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Directive;

    fn build(markup: &str, directives: Vec<Directive>) -> (FlowScheduler, DirectiveSet) {
        let template = VTree::parse(markup).unwrap();
        let set = DirectiveSet::from_directives(directives).unwrap();
        (FlowScheduler::build(&template, &set), set)
    }

    fn selectors(set: &DirectiveSet, ids: &[DirectiveId]) -> Vec<String> {
        ids.iter()
            .map(|id| set.get(*id).unwrap().selector().to_string())
            .collect()
    }

    #[test]
    fn containment_creates_edges() {
        let (scheduler, set) = build(
            "<div><span><b></b></span><p></p></div>",
            vec![
                Directive::repetition("b", "items").unwrap(),
                Directive::conditional("span", "cond").unwrap(),
                Directive::conditional("p", "other").unwrap(),
                Directive::projection("$self", || serde_json::Value::Bool(true)).unwrap(),
            ],
        );

        assert_eq!(scheduler.node_count(), 3);
        let (span, _) = set.lookup(DirectiveKind::Conditional, "span").unwrap();
        let (b, _) = set.lookup(DirectiveKind::Repetition, "b").unwrap();
        let (p, _) = set.lookup(DirectiveKind::Conditional, "p").unwrap();

        assert_eq!(scheduler.dependents_of(span, None), vec![b]);
        assert!(scheduler.dependents_of(p, None).is_empty());
        assert!(scheduler.get_node(b).unwrap().dependencies().contains(&span));
    }

    #[test]
    fn order_puts_enclosing_first() {
        let (scheduler, set) = build(
            "<ul><li><ol><li class=\"inner\"></li></ol></li></ul>",
            vec![
                Directive::repetition("li.inner", "inner").unwrap(),
                Directive::repetition("ul > li", "outer").unwrap(),
            ],
        );

        let order = scheduler.evaluation_order(DirectiveKind::Repetition);
        assert_eq!(selectors(&set, &order), vec!["ul > li", "li.inner"]);
        assert!(scheduler.evaluation_order(DirectiveKind::Conditional).is_empty());
    }

    #[test]
    fn dependents_are_transitive_and_filterable() {
        let (scheduler, set) = build(
            "<section><div><ul><li></li></ul></div></section>",
            vec![
                Directive::conditional("section", "a").unwrap(),
                Directive::conditional("div", "b").unwrap(),
                Directive::repetition("li", "c").unwrap(),
            ],
        );

        let (section, _) = set.lookup(DirectiveKind::Conditional, "section").unwrap();
        let all = scheduler.dependents_of(section, None);
        assert_eq!(selectors(&set, &all), vec!["div", "li"]);

        let repetitions = scheduler.dependents_of(section, Some(DirectiveKind::Repetition));
        assert_eq!(selectors(&set, &repetitions), vec!["li"]);
    }

    #[test]
    fn cycles_fall_back_to_declaration_order() {
        // `.a` matches both the outermost and innermost div, `.b` the middle one.
        let (scheduler, set) = build(
            r#"<div class="a"><div class="b"><div class="a"></div></div></div>"#,
            vec![
                Directive::conditional(".b", "b").unwrap(),
                Directive::conditional(".a", "a").unwrap(),
            ],
        );

        let order = scheduler.evaluation_order(DirectiveKind::Conditional);
        assert_eq!(selectors(&set, &order), vec![".b", ".a"]);
    }

    #[test]
    fn manual_edges_reorder_evaluation() {
        let set = DirectiveSet::from_directives([
            Directive::conditional("a", "x").unwrap(),
            Directive::conditional("b", "y").unwrap(),
        ])
        .unwrap();
        let ids: Vec<_> = set.iter().map(|(id, _)| id).collect();

        let mut scheduler = FlowScheduler::new();
        scheduler.add_node(FlowNode::new(ids[0], DirectiveKind::Conditional));
        scheduler.add_node(FlowNode::new(ids[1], DirectiveKind::Conditional));
        assert_eq!(scheduler.evaluation_order(DirectiveKind::Conditional), vec![ids[0], ids[1]]);

        scheduler.add_edge(ids[1], ids[0]);
        assert_eq!(scheduler.evaluation_order(DirectiveKind::Conditional), vec![ids[1], ids[0]]);
        assert_eq!(scheduler.dependents_of(ids[1], None), vec![ids[0]]);
    }
}
