//! Integration tests for persistence.
//!
//! Tests reopen round-trips, change notification order, atomicity when the
//! backend fails, cache rebuilds, and concurrent readers.

mod common;

use common::{TestEnv, error_kind};
use eyre::Result;
use std::fs;
use std::sync::Arc;
use std::thread;
use trellis::{
    Change, Config, ErrorKind, MemoryStorage, NewEntity, Persistence, Snapshot, Status, Store, StoreBuilderExt,
    vacuum,
};

/// Backend that accepts `budget` batches and then fails every write.
struct FlakyStorage {
    inner: MemoryStorage,
    budget: usize,
}

impl Persistence for FlakyStorage {
    fn load(&mut self) -> Result<Snapshot> {
        self.inner.load()
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        if self.budget == 0 {
            eyre::bail!("disk full");
        }
        self.budget -= 1;
        self.inner.apply(changes)
    }
}

fn ops(changes: &[Change]) -> Vec<&'static str> {
    changes.iter().map(Change::op).collect()
}

// =============================================================================
// Reopen Round-Trips
// =============================================================================

#[test]
fn test_full_state_survives_reopen() {
    let env = TestEnv::new();
    env.store
        .upsert_entity(NewEntity::new("ada", "Ada Lovelace", "person"))
        .unwrap();
    let parent = env.create_task("Parent");
    let child = env.store.build("Child").parent(&parent.id).tag("math").entity("ada").create().unwrap();
    let other = env.create_task("Other");
    env.depend(&child, &other);
    env.store.start(&other.id).unwrap();
    let before = env.store.snapshot();

    let env = env.reopen();

    assert_eq!(env.store.snapshot(), before);
    env.assert_blocked(&child);
    assert_eq!(env.store.children(&parent.id).unwrap()[0].id, child.id);
    assert_eq!(env.store.tasks_by_entity("ada").unwrap()[0].id, child.id);
}

#[test]
fn test_record_updates_keep_associations_after_reopen() {
    let env = TestEnv::new();
    env.store
        .upsert_entity(NewEntity::new("bob", "Bob", "person"))
        .unwrap();
    let a = env.store.build("A").tag("home").entity("bob").create().unwrap();
    let b = env.create_child("B", &a);
    env.depend(&b, &a);

    env.store.start(&a.id).unwrap();
    env.store.set_schedule(&a.id, None, None).unwrap();
    env.store
        .upsert_entity(NewEntity::new("bob", "Robert", "person"))
        .unwrap();

    let env = env.reopen();
    assert_eq!(env.store.edges().len(), 1);
    env.assert_blocked(&b);
    assert_eq!(env.store.get(&b.id).unwrap().parent_id, Some(a.id.clone()));
    assert_eq!(env.store.tags_of(&a.id).unwrap(), vec!["home"]);
    assert_eq!(env.store.entities_of(&a.id).unwrap()[0].name, "Robert");
}

#[test]
fn test_delete_cascade_survives_reopen() {
    let env = TestEnv::new();
    let root = env.create_task("Root");
    let mid = env.create_child("Mid", &root);
    let leaf = env.create_child("Leaf", &mid);
    let other = env.create_task("Other");
    env.depend(&mid, &other);
    env.store.add_tag(&mid.id, "keep").unwrap();

    env.store.delete(&root.id).unwrap();

    let env = env.reopen();
    assert_eq!(env.store.get(&mid.id).unwrap().parent_id, None);
    assert_eq!(env.store.get(&leaf.id).unwrap().parent_id, Some(mid.id.clone()));
    env.assert_blocked(&mid);
    assert_eq!(env.store.tags_of(&mid.id).unwrap(), vec!["keep"]);
}

#[test]
fn test_timestamps_keep_increasing_after_reopen() {
    let env = TestEnv::new();
    let task = env.create_task("Task");
    let started = env.store.start(&task.id).unwrap();

    let env = env.reopen();
    let done = env.store.complete(&task.id).unwrap();
    assert!(done.updated_at > started.updated_at);
}

#[test]
fn test_cache_rebuilt_when_database_missing() {
    let env = TestEnv::new();
    let task = env.create_task("Task");
    env.store.add_tag(&task.id, "keep").unwrap();
    let root = env.temp_dir.path().to_path_buf();
    let TestEnv { temp_dir, store } = env;
    store.close().unwrap();

    fs::remove_file(root.join(".trellis/trellis.db")).unwrap();

    let store = Store::open(&root).unwrap();
    assert_eq!(store.get(&task.id).unwrap().title, "Task");
    assert_eq!(store.tags_of(&task.id).unwrap(), vec!["keep"]);
    drop(temp_dir);
}

#[test]
fn test_journal_lines_are_changes() {
    let env = TestEnv::new();
    let a = env.create_task("A");
    let b = env.create_task("B");
    env.depend(&a, &b);

    let journal = fs::read_to_string(env.temp_dir.path().join(".trellis/journal.jsonl")).unwrap();
    let changes: Vec<Change> = journal.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(ops(&changes), vec!["put_task", "put_task", "add_dependency"]);
}

#[test]
fn test_vacuum_then_reopen() {
    let env = TestEnv::new();
    let task = env.create_task("Task");
    env.finish(&task);
    let before = env.store.snapshot();
    let TestEnv { temp_dir, store } = env;
    store.close().unwrap();

    let result = vacuum(temp_dir.path()).unwrap();
    assert_eq!(result.journal_after, 1);

    let store = Store::open(temp_dir.path()).unwrap();
    assert_eq!(store.snapshot(), before);
}

// =============================================================================
// Notifications
// =============================================================================

#[test]
fn test_delete_notifies_in_cascade_order() {
    let storage = MemoryStorage::new();
    let log = storage.log();
    let store = Store::with_backend(storage, Config::default()).unwrap();

    store.upsert_entity(NewEntity::new("bob", "Bob", "person")).unwrap();
    let parent = store.create("Parent", None, None).unwrap();
    let target = store.build("Target").parent(&parent.id).tag("x").entity("bob").create().unwrap();
    let child = store.create("Child", None, Some(&target.id)).unwrap();
    let prereq = store.create("Prereq", None, None).unwrap();
    store.add_edge(&target.id, &prereq.id).unwrap();
    log.clear();

    store.delete(&target.id).unwrap();

    let changes = log.changes();
    assert_eq!(
        ops(&changes),
        vec!["remove_dependency", "remove_tag", "remove_entity_link", "put_task", "delete_task"]
    );
    match &changes[3] {
        Change::PutTask { task } => {
            assert_eq!(task.id, child.id);
            assert_eq!(task.parent_id, None);
        }
        other => panic!("unexpected change {:?}", other),
    }
}

#[test]
fn test_create_task_is_one_batch() {
    let storage = MemoryStorage::new();
    let log = storage.log();
    let store = Store::with_backend(storage, Config::default()).unwrap();
    store.upsert_entity(NewEntity::new("bob", "Bob", "person")).unwrap();
    log.clear();

    store.build("Call").tag("phone").entity("bob").create().unwrap();
    assert_eq!(ops(&log.changes()), vec!["put_task", "add_tag", "add_entity_link"]);
}

#[test]
fn test_noops_notify_nothing() {
    let storage = MemoryStorage::new();
    let log = storage.log();
    let store = Store::with_backend(storage, Config::default()).unwrap();
    let a = store.create("A", None, None).unwrap();
    let b = store.create("B", None, None).unwrap();
    store.add_edge(&a.id, &b.id).unwrap();
    store.add_tag(&a.id, "t").unwrap();
    log.clear();

    store.add_edge(&a.id, &b.id).unwrap();
    store.remove_edge(&b.id, &a.id).unwrap();
    store.add_tag(&a.id, "t").unwrap();
    store.remove_tag(&a.id, "other").unwrap();
    assert!(log.is_empty());
}

#[test]
fn test_rejected_mutation_notifies_nothing() {
    let storage = MemoryStorage::new();
    let log = storage.log();
    let store = Store::with_backend(storage, Config::default()).unwrap();
    let a = store.create("A", None, None).unwrap();
    let b = store.create("B", None, None).unwrap();
    store.add_edge(&a.id, &b.id).unwrap();
    log.clear();

    assert!(store.add_edge(&b.id, &a.id).is_err());
    assert!(store.create("", None, None).is_err());
    assert!(store.transition(&a.id, Status::Pending).is_err());
    assert!(log.is_empty());
}

#[test]
fn test_store_loads_initial_snapshot() {
    let seed = Store::in_memory();
    let a = seed.create("A", None, None).unwrap();
    let b = seed.create("B", None, None).unwrap();
    seed.add_edge(&a.id, &b.id).unwrap();

    let store = Store::with_backend(MemoryStorage::with_snapshot(seed.snapshot()), Config::default()).unwrap();
    assert_eq!(store.is_blocked(&a.id), Some(true));
    let err = store.add_edge(&b.id, &a.id).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Cycle));
}

#[test]
fn test_cyclic_snapshot_rejected() {
    let seed = Store::in_memory();
    let a = seed.create("A", None, None).unwrap();
    let b = seed.create("B", None, None).unwrap();
    seed.add_edge(&a.id, &b.id).unwrap();
    let mut snapshot = seed.snapshot();
    snapshot.dependencies.push(trellis::Dependency::new(b.id, a.id));

    assert!(Store::with_backend(MemoryStorage::with_snapshot(snapshot), Config::default()).is_err());
}

// =============================================================================
// Atomicity
// =============================================================================

#[test]
fn test_backend_failure_leaves_state_unchanged() {
    let backend = FlakyStorage {
        inner: MemoryStorage::new(),
        budget: 2,
    };
    let store = Store::with_backend(backend, Config::default()).unwrap();
    let parent = store.create("Parent", None, None).unwrap();
    let child = store.create("Child", None, Some(&parent.id)).unwrap();
    let before = store.snapshot();

    let err = store.delete(&parent.id).unwrap_err();
    assert!(error_kind(&err).is_none());
    assert!(err.chain().any(|cause| cause.to_string() == "disk full"));
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.get(&child.id).unwrap().parent_id, Some(parent.id.clone()));

    assert!(store.start(&parent.id).is_err());
    assert_eq!(store.get(&parent.id).unwrap().status, Status::Pending);
}

#[test]
fn test_failed_write_leaves_journal_untouched() {
    let env = TestEnv::new();
    env.create_task("A");
    let journal_path = env.temp_dir.path().join(".trellis/journal.jsonl");
    let before = fs::read_to_string(&journal_path).unwrap();

    assert!(env.store.create("", None, None).is_err());
    assert!(env.store.add_edge("tl-x", "tl-y").is_err());

    assert_eq!(fs::read_to_string(&journal_path).unwrap(), before);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let store = Arc::new(Store::in_memory());
    let root = store.create("Root", None, None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            let root_id = root.id.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let task = store
                        .create(&format!("w{} t{}", worker, i), None, Some(&root_id))
                        .unwrap();
                    store.add_edge(&root_id, &task.id).unwrap();
                    assert!(store.ready_queue().iter().all(|t| t.id != root_id));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.children(&root.id).unwrap().len(), 100);
    assert_eq!(store.prerequisites_of(&root.id).unwrap().len(), 100);
    assert_eq!(store.is_blocked(&root.id), Some(true));
}
