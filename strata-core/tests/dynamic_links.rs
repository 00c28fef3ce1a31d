//! Dynamic Link Tests
//!
//! Behaviors whose demands and supplies change while the graph runs, both
//! through the builder's declarative clauses and the imperative calls.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::prelude::*;

fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// Test that a declarative relink applies before the behavior runs, in the
/// same action that changed the trigger.
#[test]
fn relink_applies_in_same_action() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let a = extent.moment_named("a");
    let b = extent.moment_named("b");
    let use_b = extent.state(false);
    let runs = counter();

    let (la, lb, ub, r) = (a.clone(), b.clone(), use_b.clone(), runs.clone());
    let watcher = extent
        .behavior()
        .named("watcher")
        .dynamic_demands(&[&use_b], move || {
            if ub.value() {
                vec![lb.link()]
            } else {
                vec![la.link()]
            }
        })
        .runs(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    extent.add_to_graph_with_action().unwrap();
    assert!(watcher.demands().contains(&a.id()));

    a.update_with_action().unwrap();
    b.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let (ub, bb) = (use_b.clone(), b.clone());
    graph
        .action(move || {
            ub.update(true)?;
            bb.update()?;
            Ok(())
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(watcher.demands().contains(&b.id()));
    assert!(!watcher.demands().contains(&a.id()));

    a.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    b.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Test that a behavior can relink another behavior, which runs in the same
/// event when its new demand was already updated.
#[test]
fn imperative_relink_from_behavior() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let trigger = extent.moment();
    let target = extent.moment();
    let runs = counter();

    let r = runs.clone();
    let listener = extent.behavior().runs(move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (l, t) = (listener.clone(), target.clone());
    extent
        .behavior()
        .demands(&[&trigger])
        .runs(move |_| {
            l.set_dynamic_demands([t.link()])?;
            Ok(())
        });
    extent.add_to_graph_with_action().unwrap();

    let (tr, ta) = (trigger.clone(), target.clone());
    graph
        .action(move || {
            ta.update()?;
            tr.update()?;
            Ok(())
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    target.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that clearing dynamic demands keeps the static ones.
#[test]
fn clearing_dynamic_demands_keeps_static() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let fixed = extent.moment();
    let extra = extent.moment();
    let behavior = extent.behavior().demands(&[&fixed]).runs(|_| Ok(()));
    extent.add_to_graph_with_action().unwrap();

    let (b, e) = (behavior.clone(), extra.clone());
    graph
        .action(move || Ok(b.set_dynamic_demands([e.link()])?))
        .unwrap();
    assert_eq!(behavior.demands(), vec![fixed.id(), extra.id()]);

    let b = behavior.clone();
    graph
        .action(move || Ok(b.clear_dynamic_demands()?))
        .unwrap();
    assert_eq!(behavior.demands(), vec![fixed.id()]);
}

/// Test that dynamic supplies move the supplier of a resource.
#[test]
fn dynamic_supplies_switch_target() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let left = extent.state_named(0, "left");
    let right = extent.state_named(0, "right");
    let selector = extent.state(0u8);

    let (sel, l, r) = (selector.clone(), left.clone(), right.clone());
    let (sel_run, l_run, r_run) = (selector.clone(), left.clone(), right.clone());
    let writer = extent
        .behavior()
        .named("writer")
        .demands(&[&selector])
        .dynamic_supplies(&[&selector], move || {
            if sel.value() == 0 {
                vec![l.link()]
            } else {
                vec![r.link()]
            }
        })
        .runs(move |_| {
            if sel_run.value() == 0 {
                l_run.update(10)?;
            } else {
                r_run.update(20)?;
            }
            Ok(())
        });
    extent.add_to_graph_with_action().unwrap();
    assert_eq!(left.supplied_by(), Some(writer.clone()));
    assert_eq!(right.supplied_by(), None);

    selector.update_with_action(1).unwrap();
    assert_eq!(left.supplied_by(), None);
    assert_eq!(right.supplied_by(), Some(writer.clone()));
    assert_eq!(right.value(), 20);

    // The resource nobody supplies is open to actions again.
    left.update_with_action(5).unwrap();
    assert_eq!(left.value(), 5);
}

/// Test that subsequent relinking lets a behavior compute its own demands
/// from a resource it supplies.
#[test]
fn subsequent_relink_follows_supplied_list() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let counters: Vec<State<i32>> = (0..3).map(|_| extent.state(1)).collect();
    let select = extent.typed_moment::<usize>();
    let watched = extent.state(Vec::<usize>::new());
    let sum = extent.state(0);

    let (w, links) = (watched.clone(), counters.clone());
    let (sel, w_run, s_run, c_run) = (select.clone(), watched.clone(), sum.clone(), counters.clone());
    let summer = extent
        .behavior()
        .demands(&[&select])
        .supplies(&[&watched, &sum])
        .dynamic_demands_with(&[&watched], RelinkingOrder::Subsequent, move || {
            w.value().iter().map(|&i| links[i].link()).collect()
        })
        .runs(move |_| {
            let mut indexes = w_run.value();
            if let Some(index) = sel.value() {
                if !indexes.contains(&index) {
                    indexes.push(index);
                    w_run.update(indexes.clone())?;
                }
            }
            s_run.update(indexes.iter().map(|&i| c_run[i].value()).sum())?;
            Ok(())
        });
    extent.add_to_graph_with_action().unwrap();

    select.update_with_action(0).unwrap();
    select.update_with_action(2).unwrap();
    assert_eq!(sum.value(), 2);
    assert!(summer.demands().contains(&counters[2].id()));
    assert!(!summer.demands().contains(&counters[1].id()));

    counters[2].update_with_action(5).unwrap();
    assert_eq!(sum.value(), 6);
    counters[1].update_with_action(100).unwrap();
    assert_eq!(sum.value(), 6);
}

/// Test that relinking before the behavior from a resource it supplies is a
/// cycle.
#[test]
fn prior_relink_of_own_supply_is_cycle() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let watched = extent.state(0);
    extent
        .behavior()
        .supplies(&[&watched])
        .dynamic_demands(&[&watched], Vec::new)
        .runs(|_| Ok(()));

    let err = extent.add_to_graph_with_action().unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }), "{err}");
}

/// Test that demanding a resource of an extent outside the graph fails.
#[test]
fn demand_on_unadded_extent_is_illegal() {
    let graph = Graph::new();
    let live = Extent::new(&graph);
    let pending = Extent::named(&graph, "pending");
    let elsewhere = pending.moment();
    let behavior = live.behavior().runs(|_| Ok(()));
    live.add_to_graph_with_action().unwrap();

    let (b, e) = (behavior.clone(), elsewhere.clone());
    let err = graph
        .action(move || Ok(b.set_dynamic_demands([e.link()])?))
        .unwrap_err();
    assert!(matches!(err, GraphError::IllegalUse { .. }), "{err}");
    assert!(err.to_string().contains("pending"));
}

/// Test that a relink closing a loop is reported as a cycle.
#[test]
fn relink_into_cycle_is_reported() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let x = extent.state(0);
    let y = extent.state(0);
    extent
        .behavior()
        .demands(&[&x])
        .supplies(&[&y])
        .runs(|_| Ok(()));
    let closer = extent.behavior().supplies(&[&x]).runs(|_| Ok(()));
    extent.add_to_graph_with_action().unwrap();

    let (c, yy) = (closer.clone(), y.clone());
    let err = graph
        .action(move || Ok(c.set_dynamic_demands([yy.link()])?))
        .unwrap_err();
    match &err {
        GraphError::Cycle { cycle, .. } => assert_eq!(cycle.len(), 2),
        other => panic!("expected cycle, got {other}"),
    }

    // The relink is rolled back and the old order still holds.
    assert!(closer.demands().is_empty());
    assert!(graph.debug_cycle(&closer).is_empty());
    graph.action(|| Ok(())).unwrap();
}

/// Test that an ordering-only dynamic demand orders without activating.
#[test]
fn dynamic_order_link_does_not_activate() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let trigger = extent.moment();
    let produced = extent.moment();
    let runs = counter();

    let p = produced.clone();
    let producer = extent
        .behavior()
        .demands(&[&trigger])
        .supplies(&[&produced])
        .runs(move |_| {
            p.update()?;
            Ok(())
        });
    let r = runs.clone();
    let follower = extent.behavior().runs(move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    extent.add_to_graph_with_action().unwrap();

    let (f, p) = (follower.clone(), produced.clone());
    graph
        .action(move || Ok(f.set_dynamic_demands([p.order()])?))
        .unwrap();
    assert!(follower.order() > producer.order());

    trigger.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(produced.event().is_some());
}

/// Test that a behavior with declarative demands created on an extent that
/// is already in the graph computes its links without waiting for a trigger.
#[test]
fn late_dynamic_behavior_links_immediately() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let trigger = extent.state(0);
    let target = extent.moment();
    extent.add_to_graph_with_action().unwrap();

    let runs = counter();
    let created: Arc<Mutex<Option<Behavior>>> = Arc::new(Mutex::new(None));
    let (ext, trig, tgt, r, slot) = (
        extent.clone(),
        trigger.clone(),
        target.clone(),
        runs.clone(),
        created.clone(),
    );
    graph
        .action(move || {
            let behavior = ext
                .behavior()
                .named("late watcher")
                .dynamic_demands(&[&trig], move || vec![tgt.link()])
                .runs(move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            *slot.lock() = Some(behavior);
            Ok(())
        })
        .unwrap();
    let behavior = created.lock().clone().unwrap();
    assert!(behavior.demands().contains(&target.id()));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    target.update_with_action().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Test the same for a behavior created between events.
#[test]
fn late_dynamic_behavior_links_in_next_event() {
    let graph = Graph::new();
    let extent = Extent::new(&graph);
    let trigger = extent.state(0);
    let target = extent.moment();
    extent.add_to_graph_with_action().unwrap();

    let runs = counter();
    let (linked, r) = (target.clone(), runs.clone());
    let behavior = extent
        .behavior()
        .dynamic_demands(&[&trigger], move || vec![linked.link()])
        .runs(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    target.update_with_action().unwrap();
    assert!(behavior.demands().contains(&target.id()));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
