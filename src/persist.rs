//! The persistence seam: snapshots in, change batches out.

use crate::change::Change;
use crate::types::{Dependency, Entity, EntityLink, TagLink, Task};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Full contents of a store, one collection per record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub entities: Vec<Entity>,
    pub dependencies: Vec<Dependency>,
    pub tags: Vec<TagLink>,
    pub entity_links: Vec<EntityLink>,
}

impl Snapshot {
    /// The changes that rebuild this snapshot from an empty store, in
    /// dependency order (records before the rows that reference them).
    pub fn to_changes(&self) -> Vec<Change> {
        let mut changes = Vec::new();
        changes.extend(self.entities.iter().cloned().map(|entity| Change::PutEntity { entity }));
        changes.extend(self.tasks.iter().cloned().map(|task| Change::PutTask { task }));
        changes.extend(self.dependencies.iter().cloned().map(|edge| Change::AddDependency { edge }));
        changes.extend(self.tags.iter().cloned().map(|link| Change::AddTag { link }));
        changes.extend(
            self.entity_links
                .iter()
                .cloned()
                .map(|link| Change::AddEntityLink { link }),
        );
        changes
    }
}

/// Durable backing for a `Store`.
///
/// `apply` receives every change of one mutation as a single batch, before
/// the store commits it in memory. If it fails, the mutation is rejected and
/// the in-memory state is left untouched.
pub trait Persistence: Send {
    /// Load everything persisted so far.
    fn load(&mut self) -> Result<Snapshot>;

    /// Persist the changes of one committed mutation, in order.
    fn apply(&mut self, changes: &[Change]) -> Result<()>;

    /// Make everything applied so far durable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared view of the changes a `MemoryStorage` has accepted.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog(Arc<Mutex<Vec<Change>>>);

impl ChangeLog {
    /// Every change applied so far, in order.
    pub fn changes(&self) -> Vec<Change> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn extend(&self, changes: &[Change]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(changes);
    }
}

/// In-process backend for ephemeral stores. Accepted changes are recorded
/// in a `ChangeLog` that can be inspected while the store owns the backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    initial: Snapshot,
    log: ChangeLog,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a pre-populated snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            initial: snapshot,
            log: ChangeLog::default(),
        }
    }

    /// Handle on the changes this backend accepts.
    pub fn log(&self) -> ChangeLog {
        self.log.clone()
    }
}

impl Persistence for MemoryStorage {
    fn load(&mut self) -> Result<Snapshot> {
        Ok(self.initial.clone())
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        self.log.extend(changes);
        Ok(())
    }
}
