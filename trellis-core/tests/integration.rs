//! Integration Tests for the Control-Flow Engine
//!
//! These tests drive initialization and updates together through the public
//! API and check the rendered trees and mutation journals they produce.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};

use trellis_core::directive::{Directive, DirectiveSet, PayloadTable, Uid};
use trellis_core::flow::{
    initialize_parent_defined_flows, initialize_self_contained_flows, update_conditional,
    update_repetition, FlowStore, Injectables,
};
use trellis_core::tree::{Mutation, NodeId, Selector, VTree};
use trellis_core::{FlowConfig, FlowError, FlowRegistry, Template};

struct Harness {
    template: VTree,
    store: FlowStore,
    table: PayloadTable,
    uid: Uid,
}

impl Harness {
    fn new(markup: &str, directives: Vec<Directive>) -> Self {
        let set = DirectiveSet::from_directives(directives).unwrap();
        Self {
            template: VTree::parse(markup).unwrap(),
            store: FlowStore::new(Arc::new(set), FlowConfig::default()),
            table: PayloadTable::new(),
            uid: Uid::from("U"),
        }
    }

    fn set(&self, key: &str, value: Value) {
        self.table.set(&self.uid, key, value);
    }

    fn init(&mut self) -> VTree {
        initialize_self_contained_flows(&self.template, &self.uid, &mut self.store, &self.table).unwrap()
    }
}

fn first(tree: &VTree, selector: &str) -> NodeId {
    let selector = Selector::parse(selector).unwrap();
    tree.query(tree.root(), &selector)[0]
}

/// Test that repeating an update with an unchanged payload records nothing.
#[test]
fn updates_are_idempotent() {
    let mut h = Harness::new(
        "<section><p></p><ul><li></li></ul></section>",
        vec![
            Directive::conditional("p", "show").unwrap(),
            Directive::repetition("li", "items").unwrap(),
        ],
    );
    h.set("show", json!(false));
    h.set("items", json!(["a"]));
    let mut tree = h.init();

    h.set("show", json!(true));
    h.set("items", json!(["a", "b"]));
    update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert!(!tree.mutations().is_empty());

    tree.take_mutations();
    let conditional = update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    let repetition = update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();

    assert!(!conditional.changed);
    assert!(repetition.is_noop());
    assert!(tree.mutations().is_empty());
}

/// Test that changing one item only recreates the node at that index.
#[test]
fn repetition_preserves_unchanged_indices() {
    let mut h = Harness::new("<ul><li></li></ul>", vec![Directive::repetition("li", "items").unwrap()]);
    h.set("items", json!(["A", "B", "C"]));
    let mut tree = h.init();

    let before: Vec<NodeId> = h.store.repetition("li").unwrap().locations()[0]
        .repeated()
        .iter()
        .map(|slot| slot.unwrap())
        .collect();

    h.set("items", json!(["A", "X", "C"]));
    update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();

    let after: Vec<NodeId> = h.store.repetition("li").unwrap().locations()[0]
        .repeated()
        .iter()
        .map(|slot| slot.unwrap())
        .collect();
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
    assert_ne!(after[1], before[1]);

    let touched: Vec<NodeId> = tree
        .mutations()
        .iter()
        .map(|mutation| match mutation {
            Mutation::Attached { node, .. }
            | Mutation::Detached { node }
            | Mutation::Marked { node }
            | Mutation::Annotated { node, .. } => *node,
        })
        .collect();
    assert!(!touched.contains(&before[0]));
    assert!(!touched.contains(&before[2]));
    assert_eq!(touched, vec![before[1], after[1], after[1]]);

    let values: Vec<Value> = tree
        .live_children(first(&tree, "ul"))
        .into_iter()
        .map(|node| tree.get(node).unwrap().repeat_info().unwrap().value.clone())
        .collect();
    assert_eq!(values, vec![json!("A"), json!("X"), json!("C")]);
}

/// Test that a falsy conditional prunes at init and a reveal restores the
/// template fragment.
#[test]
fn conditional_prunes_and_restores() {
    let mut h = Harness::new(
        r#"<article><aside id="note"><em>careful</em> now</aside></article>"#,
        vec![Directive::conditional("#note", "show").unwrap()],
    );
    h.set("show", json!(false));
    let mut tree = h.init();
    assert_eq!(tree.to_markup(), "<article></article>");

    h.set("show", json!(true));
    let outcome = update_conditional("#note", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(outcome.attached, 1);

    let restored = first(&tree, "#note");
    let original = first(&h.template, "#note");
    assert_eq!(tree.node_markup(restored), h.template.node_markup(original));
    assert_eq!(
        tree.get(restored).unwrap().location(),
        h.template.get(original).unwrap().location()
    );
}

/// Test that a selector matching under two parents keeps one slot list per
/// parent and patches both.
#[test]
fn repetition_tracks_every_parent_location() {
    let mut h = Harness::new(
        r#"<ul class="left"><li></li></ul><ul class="right"><li></li><li></li></ul>"#,
        vec![Directive::repetition("li", "items").unwrap()],
    );
    h.set("items", json!([1, 2]));
    let mut tree = h.init();

    let state = h.store.repetition("li").unwrap();
    assert_eq!(state.locations().len(), 2);
    assert_eq!(state.payload().len(), 2);
    assert_ne!(state.locations()[0].repeated(), state.locations()[1].repeated());

    h.set("items", json!([1, 2, 3]));
    let outcome = update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(outcome.created, 2);

    let three = "<li></li>".repeat(3);
    assert_eq!(
        tree.to_markup(),
        format!(r#"<ul class="left">{three}</ul><ul class="right">{three}</ul>"#)
    );
    let state = h.store.repetition("li").unwrap();
    assert_eq!(state.payload_equality(), &[true, true, false]);
    assert!(state.locations().iter().all(|location| location.repeated().len() == 3));
}

/// Test that a projection with no matching content keeps the fallback.
#[test]
fn projection_keeps_fallback_content() {
    let h = Harness::new(
        "<card><slot>No title</slot><footer></footer></card>",
        vec![
            Directive::projection("slot", || json!("h1")).unwrap(),
            Directive::projection("footer", || json!(true)).unwrap(),
        ],
    );
    let content = VTree::parse("<small>fine print</small>").unwrap();

    let projected =
        initialize_parent_defined_flows(&h.template, Some(Injectables::from_tree(&content)), &h.store).unwrap();
    assert_eq!(
        projected.to_markup(),
        "<card><slot>No title</slot><footer><small>fine print</small></footer></card>"
    );
}

/// Test the error paths that must leave the tree untouched.
#[test]
fn errors_leave_tree_untouched() {
    let mut h = Harness::new(
        "<div><p></p><ul><li></li></ul></div>",
        vec![
            Directive::conditional("p", "show").unwrap(),
            Directive::repetition("li", "items").unwrap(),
        ],
    );

    // No initialization yet
    let mut tree = h.template.clone();
    let err = update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap_err();
    assert!(matches!(err, FlowError::NotInitialized { .. }));

    h.set("items", json!([1]));
    let mut tree = h.init();
    let rendered = tree.to_markup();

    h.set("items", json!("not-an-array"));
    let err = update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap_err();
    assert!(matches!(err, FlowError::InvalidPayloadType { found: "string", .. }));
    assert!(tree.mutations().is_empty());
    assert_eq!(tree.to_markup(), rendered);
    assert_eq!(h.store.repetition("li").unwrap().payload(), &[json!(1)]);
}

/// Test the full reveal-then-fill scenario.
#[test]
fn conditional_reveal_then_repeat() {
    let mut h = Harness::new(
        "<div><span><b></b></span></div>",
        vec![
            Directive::conditional("span", "cond").unwrap(),
            Directive::repetition("b", "items").unwrap(),
        ],
    );
    h.set("cond", json!(false));
    h.set("items", json!([]));
    let mut tree = h.init();
    assert_eq!(tree.to_markup(), "<div></div>");

    h.set("cond", json!(true));
    h.set("items", json!([1, 2]));
    let revealed = update_conditional("span", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(revealed.reset, vec!["b".to_string()]);
    assert_eq!(h.store.scheduled_reseeds().collect::<Vec<_>>(), vec!["b"]);

    let repeated = update_repetition("b", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert!(repeated.seeded);
    assert_eq!(repeated.created, 2);

    tree.commit_deletions();
    assert_eq!(tree.to_markup(), "<div><span><b></b><b></b></span></div>");

    let span = first(&tree, "span");
    let indices: Vec<usize> = tree
        .live_children(span)
        .into_iter()
        .map(|node| tree.get(node).unwrap().repeat_info().unwrap().index)
        .collect();
    assert_eq!(indices, vec![0, 1]);
}

/// Test that hiding and revealing again resets the nested repetition and
/// rebuilds its items from the fresh subtree.
#[test]
fn reveal_after_hide_rebuilds_nested_items() {
    let template = Template::parse(
        "<div><span><b></b></span></div>",
        DirectiveSet::from_directives([
            Directive::conditional("span", "cond").unwrap(),
            Directive::repetition("b", "items").unwrap(),
        ])
        .unwrap(),
    )
    .unwrap();
    let table = PayloadTable::new();
    let uid = Uid::from("U");
    table.set(&uid, "cond", json!(true));
    table.set(&uid, "items", json!(["x"]));

    let mut instance = template.instantiate(uid.clone(), &table).unwrap();
    assert_eq!(instance.render(), "<div><span><b></b></span></div>");

    table.set(&uid, "cond", json!(false));
    instance.refresh(&table).unwrap();
    assert_eq!(instance.render(), "<div></div>");

    table.set(&uid, "cond", json!(true));
    table.set(&uid, "items", json!(["x", "y"]));
    let outcome = instance.refresh(&table).unwrap();
    assert_eq!(outcome.conditionals[0].1.reset, vec!["b".to_string()]);
    assert!(outcome.repetitions[0].1.seeded);

    instance.commit();
    assert_eq!(instance.render(), "<div><span><b></b><b></b></span></div>");
    assert_eq!(instance.store().scheduled_reseeds().count(), 0);
}

/// Test that an outer repetition patch resets the inner one.
#[test]
fn outer_repetition_patch_resets_inner() {
    let mut h = Harness::new(
        r#"<table><tr class="row"><td class="cell"></td></tr></table>"#,
        vec![
            Directive::repetition(".row", "rows").unwrap(),
            Directive::repetition(".cell", "cells").unwrap(),
        ],
    );
    h.set("rows", json!(["r1"]));
    h.set("cells", json!(["c1", "c2"]));
    let mut tree = h.init();

    h.set("rows", json!(["r1", "r2"]));
    let outer = update_repetition(".row", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(outer.reset, vec![".cell".to_string()]);

    let inner = update_repetition(".cell", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert!(inner.seeded);
    tree.commit_deletions();

    let cells = r#"<td class="cell"></td>"#.repeat(2);
    let row = format!(r#"<tr class="row">{cells}</tr>"#);
    assert_eq!(tree.to_markup(), format!("<table>{row}{row}</table>"));
}

/// Test that items created after a nested conditional flipped follow its
/// current value instead of the value it had when the list was seeded.
#[test]
fn nested_conditional_carries_into_new_items() {
    let mut h = Harness::new(
        "<ul><li><p></p></li></ul>",
        vec![
            Directive::conditional("p", "show").unwrap(),
            Directive::repetition("li", "items").unwrap(),
        ],
    );
    h.set("show", json!(true));
    h.set("items", json!([1]));
    let mut tree = h.init();
    assert_eq!(tree.to_markup(), "<ul><li><p></p></li></ul>");

    h.set("show", json!(false));
    update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    h.set("items", json!([1, 2]));
    update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    tree.commit_deletions();
    assert_eq!(tree.to_markup(), "<ul><li></li><li></li></ul>");

    h.set("show", json!(true));
    let shown = update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(shown.attached, 2);
    h.set("items", json!([1, 2, 3]));
    update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(tree.to_markup(), format!("<ul>{}</ul>", "<li><p></p></li>".repeat(3)));
}

/// Test that a reveal reaches every live copy of the recorded parent.
#[test]
fn reveal_reaches_every_repeated_parent() {
    let mut h = Harness::new(
        "<ul><li><b></b><p></p></li></ul>",
        vec![
            Directive::conditional("p", "show").unwrap(),
            Directive::repetition("li", "items").unwrap(),
        ],
    );
    h.set("show", json!(false));
    h.set("items", json!(["x", "y", "z"]));
    let mut tree = h.init();
    assert_eq!(tree.to_markup(), format!("<ul>{}</ul>", "<li><b></b></li>".repeat(3)));

    h.set("show", json!(true));
    let outcome = update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(outcome.attached, 3);
    assert_eq!(tree.to_markup(), format!("<ul>{}</ul>", "<li><b></b><p></p></li>".repeat(3)));
}

/// Test that two repetitions under one parent keep their items apart, even
/// once the literal one of them was anchored on is gone.
#[test]
fn sibling_repetitions_keep_their_order() {
    let mut h = Harness::new(
        r#"<ul><li class="a"></li><li class="b"></li></ul>"#,
        vec![
            Directive::repetition(".a", "a").unwrap(),
            Directive::repetition(".b", "b").unwrap(),
        ],
    );
    h.set("a", json!([1]));
    h.set("b", json!([1]));
    let mut tree = h.init();
    assert_eq!(tree.to_markup(), r#"<ul><li class="a"></li><li class="b"></li></ul>"#);

    h.set("a", json!([1, 2]));
    update_repetition(".a", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(
        tree.to_markup(),
        r#"<ul><li class="a"></li><li class="a"></li><li class="b"></li></ul>"#
    );

    // Emptied out, `.a` has only its anchor left to place the next item by.
    h.set("a", json!([0, 0]));
    update_repetition(".a", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    tree.commit_deletions();
    h.set("a", json!([1]));
    update_repetition(".a", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
    assert_eq!(tree.to_markup(), r#"<ul><li class="a"></li><li class="b"></li></ul>"#);
}

/// Test that toggling and churning a long-lived instance does not grow its
/// arena.
#[test]
fn churn_reuses_freed_nodes() {
    let mut h = Harness::new(
        "<div><p><em>x</em></p><ul><li></li></ul></div>",
        vec![
            Directive::conditional("p", "show").unwrap(),
            Directive::repetition("li", "items").unwrap(),
        ],
    );
    h.set("show", json!(true));
    h.set("items", json!([0, 1, 2]));
    let mut tree = h.init();
    let settled = tree.capacity();

    for round in 0..1_000 {
        h.set("show", json!(round % 2 == 1));
        h.set("items", json!([round, round + 1, round + 2]));
        update_conditional("p", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
        update_repetition("li", &mut tree, &h.uid, &mut h.store, &h.table).unwrap();
        tree.commit_deletions();
    }

    assert!(tree.capacity() <= settled * 2);
    assert_eq!(tree.to_markup(), "<div><p><em>x</em></p><ul><li></li><li></li><li></li></ul></div>");
}

/// Test that instances for different ids can be driven from different
/// threads.
#[test]
fn registry_serves_instances_across_threads() {
    let template = Template::parse(
        "<ul><li></li></ul>",
        DirectiveSet::from_directives([Directive::repetition("li", "items").unwrap()]).unwrap(),
    )
    .unwrap();
    let registry = Arc::new(FlowRegistry::new(template));
    let table = Arc::new(PayloadTable::new());

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let registry = Arc::clone(&registry);
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let uid = Uid::new(format!("u{n}"));
                table.set(&uid, "items", json!(vec![n; n]));
                registry.instantiate(&uid, table.as_ref()).unwrap();
                registry
                    .with_instance(&uid, |instance| instance.render())
                    .unwrap()
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let rendered = handle.join().unwrap();
        assert_eq!(rendered, format!("<ul>{}</ul>", "<li></li>".repeat(n)));
    }
    assert_eq!(registry.len(), 4);
}
