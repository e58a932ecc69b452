//! Shared test infrastructure for trellis integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use trellis::{Dependency, ErrorKind, Filter, Status, Store, StoreError, Task};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Close the store and open it again from disk.
    pub fn reopen(self) -> Self {
        let TestEnv { temp_dir, store } = self;
        store.close().expect("Failed to close store");
        let store = Store::open(temp_dir.path()).expect("Failed to reopen store");
        Self { temp_dir, store }
    }

    /// Create a top-level task with no description.
    pub fn create_task(&self, title: &str) -> Task {
        self.store.create(title, None, None).expect("Failed to create task")
    }

    /// Create a task under `parent`.
    pub fn create_child(&self, title: &str, parent: &Task) -> Task {
        self.store
            .create(title, None, Some(&parent.id))
            .expect("Failed to create task")
    }

    /// Make `task` depend on `prerequisite`.
    pub fn depend(&self, task: &Task, prerequisite: &Task) -> Dependency {
        self.store
            .add_edge(&task.id, &prerequisite.id)
            .expect("Failed to add edge")
    }

    /// Start then complete a task.
    pub fn finish(&self, task: &Task) -> Task {
        self.store.start(&task.id).expect("Failed to start task");
        self.store.complete(&task.id).expect("Failed to complete task")
    }

    /// Assert that a task is in the ready queue.
    pub fn assert_ready(&self, task: &Task) {
        let ready = self.store.ready_queue();
        assert!(
            ready.iter().any(|t| t.id == task.id),
            "Expected task {} to be ready, but it wasn't. Ready tasks: {:?}",
            task.id,
            ready.iter().map(|t| &t.id).collect::<Vec<_>>()
        );
    }

    /// Assert that a task is NOT in the ready queue.
    pub fn assert_not_ready(&self, task: &Task) {
        let ready = self.store.ready_queue();
        assert!(
            !ready.iter().any(|t| t.id == task.id),
            "Expected task {} to NOT be ready, but it was",
            task.id
        );
    }

    /// Assert that a task is in the blocked list.
    pub fn assert_blocked(&self, task: &Task) {
        let blocked = self.store.blocked_list();
        assert!(
            blocked.iter().any(|t| t.id == task.id),
            "Expected task {} to be blocked, but it wasn't",
            task.id
        );
    }

    pub fn ready_count(&self) -> usize {
        self.store.ready_queue().len()
    }

    pub fn total_count(&self) -> usize {
        self.store.list(&Filter::new()).len()
    }

    pub fn count_by_status(&self, status: Status) -> usize {
        self.store.list(&Filter::new().status(status)).len()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of engine rejection carried by a report, if any.
pub fn error_kind(err: &eyre::Report) -> Option<ErrorKind> {
    err.downcast_ref::<StoreError>().map(StoreError::kind)
}
