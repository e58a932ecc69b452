//! Integration tests for graph operations.
//!
//! Tests dependency management, cycle detection, hierarchy, and ready work
//! calculation.

mod common;

use common::{TestEnv, error_kind};
use trellis::{CycleKind, ErrorKind, Status, StoreError};

// =============================================================================
// Ready Work Calculation Tests
// =============================================================================

#[test]
fn test_ready_empty_store() {
    let env = TestEnv::new();
    assert!(env.store.ready_queue().is_empty());
    assert!(env.store.blocked_list().is_empty());
}

#[test]
fn test_ready_multiple_independent_tasks() {
    let env = TestEnv::new();
    let task1 = env.create_task("Task 1");
    let task2 = env.create_task("Task 2");
    let task3 = env.create_task("Task 3");

    env.assert_ready(&task1);
    env.assert_ready(&task2);
    env.assert_ready(&task3);
    assert_eq!(env.ready_count(), 3);
}

#[test]
fn test_dependency_scenario() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b);

    env.assert_blocked(&a);
    env.assert_not_ready(&a);
    env.assert_ready(&b);

    // In progress is still ready work.
    env.store.start(&b.id).unwrap();
    env.assert_blocked(&a);
    env.assert_ready(&b);

    env.store.complete(&b.id).unwrap();
    env.assert_ready(&a);
    assert!(env.store.blocked_list().is_empty());
}

#[test]
fn test_ready_needs_every_prerequisite() {
    let env = TestEnv::new();
    let target = env.create_task("Target");
    let first = env.create_task("First");
    let second = env.create_task("Second");
    env.depend(&target, &first);
    env.depend(&target, &second);

    env.finish(&first);
    env.assert_blocked(&target);

    env.finish(&second);
    env.assert_ready(&target);
}

#[test]
fn test_readiness_is_direct_only() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    let c = env.create_task("C");
    env.depend(&a, &b);
    env.depend(&b, &c);

    // A waits on B only; C is B's concern.
    env.finish(&b);
    env.assert_ready(&a);
    env.assert_ready(&c);
}

#[test]
fn test_prerequisites_and_dependents() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    let c = env.create_task("C");
    env.depend(&a, &c);
    env.depend(&b, &c);

    let prereqs = env.store.prerequisites_of(&a.id).unwrap();
    assert_eq!(prereqs.len(), 1);
    assert_eq!(prereqs[0].id, c.id);

    let dependents: Vec<String> = env
        .store
        .dependents_of(&c.id)
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(dependents, vec!["B", "A"]);
    assert!(env.store.dependents_of(&a.id).unwrap().is_empty());
}

// =============================================================================
// Cycle Detection Tests
// =============================================================================

#[test]
fn test_two_node_cycle_rejected() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b);

    let err = env.store.add_edge(&b.id, &a.id).unwrap_err();
    assert_eq!(
        err.downcast_ref::<StoreError>(),
        Some(&StoreError::Cycle {
            kind: CycleKind::Dependency,
            task_id: b.id.clone(),
            target_id: a.id.clone(),
        })
    );
}

#[test]
fn test_long_cycle_rejected() {
    let env = TestEnv::new();
    let tasks: Vec<_> = (0..20).map(|i| env.create_task(&format!("Task {}", i))).collect();
    for pair in tasks.windows(2) {
        env.depend(&pair[0], &pair[1]);
    }

    let err = env.store.add_edge(&tasks[19].id, &tasks[0].id).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Cycle));
    assert_eq!(env.store.edges().len(), 19);
}

#[test]
fn test_diamond_is_not_a_cycle() {
    let env = TestEnv::new();
    let top = env.create_task("Top");
    let left = env.create_task("Left");
    let right = env.create_task("Right");
    let bottom = env.create_task("Bottom");
    env.depend(&top, &left);
    env.depend(&top, &right);
    env.depend(&left, &bottom);
    env.depend(&right, &bottom);

    assert_eq!(env.store.edges().len(), 4);
    env.assert_ready(&bottom);
    assert_eq!(env.store.blocked_list().len(), 3);
}

#[test]
fn test_self_dependency_is_validation_error() {
    let env = TestEnv::new();
    let a = env.create_task("A");

    let err = env.store.add_edge(&a.id, &a.id).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
}

#[test]
fn test_edge_to_unknown_task_rejected() {
    let env = TestEnv::new();
    let a = env.create_task("A");

    let err = env.store.add_edge(&a.id, "tl-missing").unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
    let err = env.store.add_edge("tl-missing", &a.id).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
}

#[test]
fn test_removing_edge_unblocks() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b);

    env.store.remove_edge(&a.id, &b.id).unwrap();
    env.assert_ready(&a);

    // Once removed, the reverse edge is legal.
    env.depend(&b, &a);
    env.assert_blocked(&b);
}

// =============================================================================
// Hierarchy Tests
// =============================================================================

#[test]
fn test_reparent_under_descendant_rejected() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_child("B", &a);
    let c = env.create_child("C", &b);

    let err = env.store.reparent(&a.id, Some(&c.id)).unwrap_err();
    assert_eq!(
        err.downcast_ref::<StoreError>(),
        Some(&StoreError::Cycle {
            kind: CycleKind::Hierarchy,
            task_id: a.id.clone(),
            target_id: c.id.clone(),
        })
    );
    assert_eq!(env.store.get(&a.id).unwrap().parent_id, None);
}

#[test]
fn test_hierarchy_and_dependencies_are_independent() {
    let env = TestEnv::new();
    let parent = env.create_task("Parent");
    let child = env.create_child("Child", &parent);

    // A parent may wait on its own child; the reverse edge is a dependency cycle.
    env.depend(&parent, &child);
    env.assert_blocked(&parent);
    env.assert_ready(&child);
    let err = env.store.add_edge(&child.id, &parent.id).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Cycle));
}

#[test]
fn test_subtree_follows_reparent() {
    let env = TestEnv::new();
    let root = env.create_task("Root");
    let a = env.create_child("A", &root);
    let b = env.create_child("B", &root);
    let leaf = env.create_child("Leaf", &a);

    env.store.reparent(&leaf.id, Some(&b.id)).unwrap();

    let listing = env.store.subtree(&root.id).unwrap();
    let rows: Vec<(usize, &str)> = listing.iter().map(|e| (e.depth, e.task.title.as_str())).collect();
    assert_eq!(rows, vec![(0, "Root"), (1, "B"), (2, "Leaf"), (1, "A")]);
}

// =============================================================================
// Delete Cascade Tests
// =============================================================================

#[test]
fn test_delete_parent_clears_children() {
    let env = TestEnv::new();
    let parent = env.create_task("P");
    let child = env.create_child("C", &parent);

    env.store.delete(&parent.id).unwrap();

    assert!(env.store.get(&parent.id).is_none());
    assert_eq!(env.store.get(&child.id).unwrap().parent_id, None);
}

#[test]
fn test_delete_prerequisite_unblocks_dependent() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b);

    env.store.delete(&b.id).unwrap();

    env.assert_ready(&a);
    assert!(env.store.edges().is_empty());
    assert!(env.store.prerequisites_of(&a.id).unwrap().is_empty());
}

#[test]
fn test_status_counts() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.create_task("C");
    env.finish(&a);
    env.store.cancel(&b.id).unwrap();

    assert_eq!(env.total_count(), 3);
    assert_eq!(env.count_by_status(Status::Pending), 1);
    assert_eq!(env.count_by_status(Status::Completed), 1);
    assert_eq!(env.count_by_status(Status::Cancelled), 1);
}
