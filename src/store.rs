//! High-level store API for trellis.
//!
//! `Store` is the single coordinating component: it owns the in-memory
//! state, serializes writers behind one lock, validates every mutation
//! against current state, hands the resulting changes to the persistence
//! backend, and only then commits them in memory.

use crate::change::Change;
use crate::config::Config;
use crate::id::generate_task_id;
use crate::persist::{MemoryStorage, Persistence};
use crate::state::State;
use crate::storage::Storage;
use crate::types::{Dependency, EntityLink, Status, TagLink, Task, ValidationError, is_blank};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Which acyclic structure a rejected edge would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Dependency,
    Hierarchy,
}

/// Broad classes of rejected operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    Cycle,
}

/// Errors that reject a store operation. State is unchanged after any of them.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Malformed input, blank field, unknown reference, bad window.
    Validation(ValidationError),
    /// Status change not permitted from the current state.
    InvalidTransition { id: String, from: Status, to: Status },
    /// Adding `task_id -> target_id` would close a cycle.
    Cycle {
        kind: CycleKind,
        task_id: String,
        target_id: String,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            StoreError::Cycle { .. } => ErrorKind::Cycle,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
            StoreError::InvalidTransition { id, from, to } => {
                write!(f, "invalid status transition for {} from {} to {}", id, from, to)
            }
            StoreError::Cycle {
                kind: CycleKind::Dependency,
                task_id,
                target_id,
            } => write!(f, "{} depending on {} would create a dependency cycle", task_id, target_id),
            StoreError::Cycle {
                kind: CycleKind::Hierarchy,
                task_id,
                target_id,
            } => write!(f, "moving {} under {} would create a hierarchy cycle", task_id, target_id),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

/// Everything needed to create a task in one atomic commit.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Stable external id; generated when absent
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub note: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Field edits for `Store::update`. `None` leaves a field alone; for the
/// optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub note: Option<Option<String>>,
}

/// The main trellis store.
pub struct Store {
    root: Option<PathBuf>,
    config: Config,
    state: RwLock<State>,
    backend: Mutex<Box<dyn Persistence>>,
}

pub(crate) type Mutation<T> = std::result::Result<(Vec<Change>, T), StoreError>;

pub(crate) fn require_task<'a>(state: &'a State, id: &str) -> std::result::Result<&'a Task, StoreError> {
    state
        .task(id)
        .ok_or_else(|| ValidationError::UnknownTask(id.to_string()).into())
}

impl Store {
    /// Initialize a new store in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let storage = Storage::init(root)?;
        let config = Config::load(root)?;
        Self::with_backend_at(Box::new(storage), config, Some(root.to_path_buf()))
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage::open(root)?;
        let config = Config::load(root)?;
        Self::with_backend_at(Box::new(storage), config, Some(root.to_path_buf()))
    }

    /// An ephemeral store with nothing persisted.
    pub fn in_memory() -> Self {
        Self::from_state(State::default(), Box::new(MemoryStorage::new()), Config::default(), None)
    }

    /// A store over any persistence backend, loaded from its snapshot.
    pub fn with_backend(backend: impl Persistence + 'static, config: Config) -> Result<Self> {
        Self::with_backend_at(Box::new(backend), config, None)
    }

    fn with_backend_at(mut backend: Box<dyn Persistence>, config: Config, root: Option<PathBuf>) -> Result<Self> {
        let snapshot = backend.load().context("Failed to load snapshot")?;
        let state = State::from_snapshot(snapshot).context("Snapshot violates store invariants")?;
        info!(
            "Loaded {} tasks, {} entities, {} dependencies",
            state.tasks.len(),
            state.entities.len(),
            state.dependencies.len()
        );
        Ok(Self::from_state(state, backend, config, root))
    }

    fn from_state(state: State, backend: Box<dyn Persistence>, config: Config, root: Option<PathBuf>) -> Self {
        Self {
            root,
            config,
            state: RwLock::new(state),
            backend: Mutex::new(backend),
        }
    }

    /// Directory the store was opened from, if it is on disk.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flush the backend.
    pub fn flush(&self) -> Result<()> {
        let _state = self.write();
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .context("Failed to flush store")
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!("Store closed");
        Ok(())
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one mutation under the writer lock.
    ///
    /// `op` validates against the current state and returns the changes to
    /// commit. Nothing is touched unless validation and persistence both
    /// succeed.
    pub(crate) fn mutate<T>(&self, name: &str, op: impl FnOnce(&mut State) -> Mutation<T>) -> Result<T> {
        let mut state = self.write();

        let (changes, value) = op(&mut *state).map_err(|e| {
            debug!("{} rejected: {}", name, e);
            eyre::eyre!(e)
        })?;

        if !changes.is_empty() {
            self.backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(&changes)
                .with_context(|| format!("Failed to persist {}", name))?;

            for change in &changes {
                state.apply(change);
            }
            debug!("{} committed {} change(s)", name, changes.len());
        }

        Ok(value)
    }

    /// Snapshot of everything currently held.
    pub fn snapshot(&self) -> crate::persist::Snapshot {
        self.read().snapshot()
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Create a new pending task.
    pub fn create(&self, title: &str, description: Option<&str>, parent_id: Option<&str>) -> Result<Task> {
        self.create_task(NewTask {
            title: title.to_string(),
            description: description.map(String::from),
            parent_id: parent_id.map(String::from),
            ..Default::default()
        })
    }

    /// Create a task together with its schedule and links.
    pub fn create_task(&self, spec: NewTask) -> Result<Task> {
        self.mutate("create", |state| {
            if is_blank(&spec.title) {
                return Err(ValidationError::BlankTitle.into());
            }
            if let Some(id) = &spec.id {
                if is_blank(id) {
                    return Err(ValidationError::BlankId.into());
                }
                if state.tasks.contains_key(id) {
                    return Err(ValidationError::DuplicateId(id.clone()).into());
                }
            }
            if let Some(parent) = &spec.parent_id {
                require_task(state, parent)?;
            }
            let tags: BTreeSet<&String> = spec.tags.iter().collect();
            if tags.iter().any(|tag| is_blank(tag)) {
                return Err(ValidationError::BlankTag.into());
            }
            let entities: BTreeSet<&String> = spec.entities.iter().collect();
            if let Some(missing) = entities.iter().find(|id| !state.entities.contains_key(id.as_str())) {
                return Err(ValidationError::UnknownEntity(missing.to_string()).into());
            }

            let now = state.next_timestamp();
            let id = match &spec.id {
                Some(id) => id.clone(),
                None => loop {
                    let id = generate_task_id(&spec.title, now);
                    if !state.tasks.contains_key(&id) {
                        break id;
                    }
                },
            };

            let task = Task {
                id,
                title: spec.title.clone(),
                description: spec.description.clone(),
                status: Status::Pending,
                parent_id: spec.parent_id.clone(),
                scheduled_start: spec.scheduled_start,
                scheduled_end: spec.scheduled_end,
                actual_start: None,
                actual_end: None,
                note: spec.note.clone(),
                created_at: now,
                updated_at: now,
                completed_at: None,
            };
            task.validate()?;

            let mut changes = vec![Change::PutTask { task: task.clone() }];
            changes.extend(tags.into_iter().map(|tag| Change::AddTag {
                link: TagLink {
                    task_id: task.id.clone(),
                    tag: tag.clone(),
                },
            }));
            changes.extend(entities.into_iter().map(|entity_id| Change::AddEntityLink {
                link: EntityLink {
                    task_id: task.id.clone(),
                    entity_id: entity_id.clone(),
                },
            }));

            Ok((changes, task))
        })
    }

    /// Get a task by ID.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.read().task(id).cloned()
    }

    /// Edit a task's descriptive fields.
    pub fn update(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        self.mutate("update", |state| {
            let mut task = require_task(state, id)?.clone();

            if let Some(title) = update.title {
                task.title = title;
            }
            if let Some(description) = update.description {
                task.description = description;
            }
            if let Some(note) = update.note {
                task.note = note;
            }
            task.updated_at = state.next_timestamp();
            task.validate()?;

            Ok((vec![Change::PutTask { task: task.clone() }], task))
        })
    }

    /// Change a task's status. The only way status ever changes.
    pub fn transition(&self, id: &str, target: Status) -> Result<Task> {
        self.mutate("transition", |state| {
            let mut task = require_task(state, id)?.clone();

            if !task.status.can_transition_to(&target) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: task.status,
                    to: target,
                });
            }

            let now = state.next_timestamp();
            task.status = target;
            task.updated_at = now;
            match target {
                Status::InProgress => {
                    task.actual_start.get_or_insert(now);
                }
                Status::Completed | Status::Cancelled => {
                    task.completed_at = Some(now);
                    task.actual_end.get_or_insert(now);
                }
                Status::Pending => {}
            }
            task.validate()?;

            Ok((vec![Change::PutTask { task: task.clone() }], task))
        })
    }

    /// Start working on a task.
    pub fn start(&self, id: &str) -> Result<Task> {
        self.transition(id, Status::InProgress)
    }

    pub fn complete(&self, id: &str) -> Result<Task> {
        self.transition(id, Status::Completed)
    }

    pub fn cancel(&self, id: &str) -> Result<Task> {
        self.transition(id, Status::Cancelled)
    }

    /// Set (or clear) the planned window.
    pub fn set_schedule(&self, id: &str, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Task> {
        self.mutate("set_schedule", |state| {
            let mut task = require_task(state, id)?.clone();

            if let (Some(start), Some(end)) = (start, end)
                && start >= end
            {
                return Err(ValidationError::InvalidScheduledWindow.into());
            }

            task.scheduled_start = start;
            task.scheduled_end = end;
            task.updated_at = state.next_timestamp();
            task.validate()?;

            Ok((vec![Change::PutTask { task: task.clone() }], task))
        })
    }

    /// Move a task under a new parent, or detach it with `None`.
    pub fn reparent(&self, id: &str, new_parent: Option<&str>) -> Result<Task> {
        self.mutate("reparent", |state| {
            let mut task = require_task(state, id)?.clone();

            if let Some(parent) = new_parent {
                if parent == id {
                    return Err(ValidationError::SelfParent.into());
                }
                require_task(state, parent)?;
                if state.hierarchy.is_descendant(id, parent) {
                    return Err(StoreError::Cycle {
                        kind: CycleKind::Hierarchy,
                        task_id: id.to_string(),
                        target_id: parent.to_string(),
                    });
                }
            }

            if task.parent_id.as_deref() == new_parent {
                return Ok((vec![], task));
            }

            task.parent_id = new_parent.map(String::from);
            task.updated_at = state.next_timestamp();
            task.validate()?;

            Ok((vec![Change::PutTask { task: task.clone() }], task))
        })
    }

    /// Delete a task. Its edges and links go first, its children are
    /// detached, then the record itself is removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.mutate("delete", |state| {
            require_task(state, id)?;

            let mut changes: Vec<Change> = state
                .dependencies
                .edges_touching(id)
                .into_iter()
                .map(|edge| Change::RemoveDependency { edge })
                .collect();

            let (tags, entities) = state.links.links_of_task(id);
            changes.extend(tags.into_iter().map(|link| Change::RemoveTag { link }));
            changes.extend(entities.into_iter().map(|link| Change::RemoveEntityLink { link }));

            let children: Vec<String> = state.hierarchy.children(id).map(String::from).collect();
            if !children.is_empty() {
                let now = state.next_timestamp();
                for child in children {
                    let mut task = require_task(state, &child)?.clone();
                    task.parent_id = None;
                    task.updated_at = now;
                    changes.push(Change::PutTask { task });
                }
            }

            changes.push(Change::DeleteTask { id: id.to_string() });
            Ok((changes, ()))
        })
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    /// Record that `task_id` depends on `depends_on_id`.
    pub fn add_edge(&self, task_id: &str, depends_on_id: &str) -> Result<Dependency> {
        self.mutate("add_edge", |state| {
            require_task(state, task_id)?;
            require_task(state, depends_on_id)?;
            if task_id == depends_on_id {
                return Err(ValidationError::SelfDependency.into());
            }

            let edge = Dependency::new(task_id, depends_on_id);
            if state.dependencies.contains(&edge) {
                return Ok((vec![], edge));
            }

            if state.dependencies.would_create_cycle(task_id, depends_on_id) {
                return Err(StoreError::Cycle {
                    kind: CycleKind::Dependency,
                    task_id: task_id.to_string(),
                    target_id: depends_on_id.to_string(),
                });
            }

            Ok((vec![Change::AddDependency { edge: edge.clone() }], edge))
        })
    }

    /// Remove a dependency edge. Absent edges are a no-op.
    pub fn remove_edge(&self, task_id: &str, depends_on_id: &str) -> Result<()> {
        self.mutate("remove_edge", |state| {
            let edge = Dependency::new(task_id, depends_on_id);
            if !state.dependencies.contains(&edge) {
                return Ok((vec![], ()));
            }
            Ok((vec![Change::RemoveDependency { edge }], ()))
        })
    }

    /// Whether a task can be worked on now. `None` for unknown ids.
    pub fn is_ready(&self, id: &str) -> Option<bool> {
        let state = self.read();
        state.task(id).map(|task| state.is_ready(task))
    }

    /// Whether a task is waiting on an incomplete prerequisite. `None` for
    /// unknown ids.
    pub fn is_blocked(&self, id: &str) -> Option<bool> {
        let state = self.read();
        state.task(id).map(|task| state.is_blocked(task))
    }

    /// Direct prerequisites of a task, in queue order.
    pub fn prerequisites_of(&self, id: &str) -> Option<Vec<Task>> {
        let state = self.read();
        state.task(id)?;
        Some(crate::query::collect_ordered(
            &state,
            state.dependencies.prerequisites(id),
            crate::query::queue_order,
        ))
    }

    /// Tasks that directly depend on `id`, in queue order.
    pub fn dependents_of(&self, id: &str) -> Option<Vec<Task>> {
        let state = self.read();
        state.task(id)?;
        Some(crate::query::collect_ordered(
            &state,
            state.dependencies.dependents(id),
            crate::query::queue_order,
        ))
    }

    /// Every dependency edge, sorted.
    pub fn edges(&self) -> Vec<Dependency> {
        let mut edges: Vec<Dependency> = self.read().dependencies.edges().collect();
        edges.sort();
        edges
    }
}
