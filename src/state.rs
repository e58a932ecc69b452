//! In-memory state: the task and entity arenas plus the graph and link indexes.

use crate::change::Change;
use crate::graph::{DependencyGraph, Hierarchy};
use crate::links::LinkIndex;
use crate::persist::Snapshot;
use crate::types::{Entity, Task};
use chrono::{DateTime, Duration, Utc};
use eyre::{Result, bail};
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct State {
    pub tasks: HashMap<String, Task>,
    pub entities: HashMap<String, Entity>,
    pub dependencies: DependencyGraph,
    pub hierarchy: Hierarchy,
    pub links: LinkIndex,
    last_issued: Option<DateTime<Utc>>,
}

impl State {
    /// Build state from a persisted snapshot, re-checking every invariant.
    ///
    /// Invalid records and cycles are errors. Rows that point at missing
    /// records are dropped with a warning.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut state = State::default();

        for entity in snapshot.entities {
            if let Err(e) = entity.validate() {
                bail!("invalid entity {} in snapshot: {}", entity.id, e);
            }
            state.observe(entity.updated_at);
            state.entities.insert(entity.id.clone(), entity);
        }

        for task in snapshot.tasks {
            if let Err(e) = task.validate() {
                bail!("invalid task {} in snapshot: {}", task.id, e);
            }
            state.observe(task.updated_at);
            state.tasks.insert(task.id.clone(), task);
        }

        let dangling: Vec<String> = state
            .tasks
            .values()
            .filter(|task| task.parent_id.as_ref().is_some_and(|p| !state.tasks.contains_key(p)))
            .map(|task| task.id.clone())
            .collect();
        for id in dangling {
            warn!("Task {} points at a missing parent; clearing it", id);
            if let Some(task) = state.tasks.get_mut(&id) {
                task.parent_id = None;
            }
        }

        for task in state.tasks.values() {
            if let Some(parent) = task.parent_id.as_deref() {
                if state.hierarchy.is_descendant(&task.id, parent) {
                    bail!("hierarchy cycle through task {} in snapshot", task.id);
                }
                state.hierarchy.set_parent(&task.id, None, Some(parent));
            }
        }

        for edge in snapshot.dependencies {
            if !state.tasks.contains_key(&edge.task_id) || !state.tasks.contains_key(&edge.depends_on_id) {
                warn!(
                    "Dropping dependency {} -> {}: unknown task",
                    edge.task_id, edge.depends_on_id
                );
                continue;
            }
            if edge.task_id == edge.depends_on_id
                || state.dependencies.would_create_cycle(&edge.task_id, &edge.depends_on_id)
            {
                bail!(
                    "dependency cycle through {} -> {} in snapshot",
                    edge.task_id,
                    edge.depends_on_id
                );
            }
            state.dependencies.insert(&edge);
        }

        for link in snapshot.tags {
            if !state.tasks.contains_key(&link.task_id) || crate::types::is_blank(&link.tag) {
                warn!("Dropping tag '{}' on {}: unknown task or blank tag", link.tag, link.task_id);
                continue;
            }
            state.links.add_tag(&link);
        }

        for link in snapshot.entity_links {
            if !state.tasks.contains_key(&link.task_id) || !state.entities.contains_key(&link.entity_id) {
                warn!(
                    "Dropping entity link {} -> {}: unknown task or entity",
                    link.task_id, link.entity_id
                );
                continue;
            }
            state.links.add_entity_link(&link);
        }

        Ok(state)
    }

    /// Everything currently held, in a stable order.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            tasks: self.tasks.values().cloned().collect(),
            entities: self.entities.values().cloned().collect(),
            dependencies: self.dependencies.edges().collect(),
            tags: self.links.tag_links().collect(),
            entity_links: self.links.entity_links().collect(),
        };
        snapshot.tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshot.entities.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.dependencies.sort();
        snapshot.tags.sort();
        snapshot.entity_links.sort();
        snapshot
    }

    /// Issue a timestamp strictly after every timestamp issued or loaded so far.
    pub fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let issued = match self.last_issued {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_issued = Some(issued);
        issued
    }

    fn observe(&mut self, at: DateTime<Utc>) {
        if self.last_issued.is_none_or(|last| at > last) {
            self.last_issued = Some(at);
        }
    }

    /// Commit one validated change.
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::PutTask { task } => {
                let old_parent = self.tasks.get(&task.id).and_then(|t| t.parent_id.clone());
                self.hierarchy
                    .set_parent(&task.id, old_parent.as_deref(), task.parent_id.as_deref());
                self.observe(task.updated_at);
                self.tasks.insert(task.id.clone(), task.clone());
            }
            Change::DeleteTask { id } => {
                if let Some(task) = self.tasks.remove(id) {
                    self.hierarchy.set_parent(id, task.parent_id.as_deref(), None);
                }
                self.hierarchy.remove_node(id);
            }
            Change::PutEntity { entity } => {
                self.observe(entity.updated_at);
                self.entities.insert(entity.id.clone(), entity.clone());
            }
            Change::DeleteEntity { id } => {
                self.entities.remove(id);
            }
            Change::AddDependency { edge } => {
                self.dependencies.insert(edge);
            }
            Change::RemoveDependency { edge } => {
                self.dependencies.remove(edge);
            }
            Change::AddTag { link } => {
                self.links.add_tag(link);
            }
            Change::RemoveTag { link } => {
                self.links.remove_tag(link);
            }
            Change::AddEntityLink { link } => {
                self.links.add_entity_link(link);
            }
            Change::RemoveEntityLink { link } => {
                self.links.remove_entity_link(link);
            }
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// A task is ready when it is not terminal and every direct prerequisite
    /// is completed.
    pub fn is_ready(&self, task: &Task) -> bool {
        !task.status.is_terminal() && self.unmet_prerequisites(&task.id) == 0
    }

    pub fn is_blocked(&self, task: &Task) -> bool {
        !task.status.is_terminal() && self.unmet_prerequisites(&task.id) > 0
    }

    fn unmet_prerequisites(&self, id: &str) -> usize {
        self.dependencies
            .prerequisites(id)
            .filter(|dep| {
                self.tasks
                    .get(*dep)
                    .is_none_or(|t| t.status != crate::types::Status::Completed)
            })
            .count()
    }
}
