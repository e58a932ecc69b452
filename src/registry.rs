//! Entity registry and the task link operations.

use crate::change::Change;
use crate::query::{collect_ordered, recent_first};
use crate::store::{Store, StoreError, require_task};
use crate::types::{Entity, EntityLink, TagLink, Task, ValidationError, is_blank};
use eyre::Result;

/// Registration payload for `Store::upsert_entity`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEntity {
    pub id: String,
    pub name: String,
    /// Open string; see `SUGGESTED_ENTITY_TYPES`
    pub kind: String,
    pub aliases: Vec<String>,
    pub note: Option<String>,
}

impl NewEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }
}

fn require_entity<'a>(state: &'a crate::state::State, id: &str) -> std::result::Result<&'a Entity, StoreError> {
    state
        .entities
        .get(id)
        .ok_or_else(|| ValidationError::UnknownEntity(id.to_string()).into())
}

impl Store {
    /// Register an entity, or update the one already registered under the
    /// same id. Updates keep `created_at` and bump `updated_at`; an update
    /// that changes nothing is a no-op.
    pub fn upsert_entity(&self, spec: NewEntity) -> Result<Entity> {
        self.mutate("upsert_entity", |state| {
            if is_blank(&spec.id) {
                return Err(ValidationError::BlankId.into());
            }

            let entity = match state.entities.get(&spec.id) {
                Some(existing)
                    if existing.name == spec.name
                        && existing.kind == spec.kind
                        && existing.aliases == spec.aliases
                        && existing.note == spec.note =>
                {
                    return Ok((vec![], existing.clone()));
                }
                Some(existing) => {
                    let created_at = existing.created_at;
                    Entity {
                        id: spec.id,
                        name: spec.name,
                        kind: spec.kind,
                        aliases: spec.aliases,
                        note: spec.note,
                        created_at,
                        updated_at: state.next_timestamp(),
                    }
                }
                None => {
                    let now = state.next_timestamp();
                    Entity {
                        id: spec.id,
                        name: spec.name,
                        kind: spec.kind,
                        aliases: spec.aliases,
                        note: spec.note,
                        created_at: now,
                        updated_at: now,
                    }
                }
            };
            entity.validate()?;

            Ok((vec![Change::PutEntity { entity: entity.clone() }], entity))
        })
    }

    pub fn get_entity(&self, id: &str) -> Option<Entity> {
        self.read().entities.get(id).cloned()
    }

    /// Delete an entity and every link pointing at it.
    pub fn delete_entity(&self, id: &str) -> Result<()> {
        self.mutate("delete_entity", |state| {
            require_entity(state, id)?;

            let mut changes: Vec<Change> = state
                .links
                .links_of_entity(id)
                .into_iter()
                .map(|link| Change::RemoveEntityLink { link })
                .collect();
            changes.push(Change::DeleteEntity { id: id.to_string() });
            Ok((changes, ()))
        })
    }

    /// All entities, by name.
    pub fn entities(&self) -> Vec<Entity> {
        let state = self.read();
        let mut entities: Vec<Entity> = state.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        entities
    }

    /// Entities of one type, by name.
    pub fn entities_by_type(&self, kind: &str) -> Vec<Entity> {
        let mut entities = self.entities();
        entities.retain(|e| e.kind == kind);
        entities
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Tag a task. Already-present tags are a no-op.
    pub fn add_tag(&self, task_id: &str, tag: &str) -> Result<()> {
        self.mutate("add_tag", |state| {
            require_task(state, task_id)?;
            if is_blank(tag) {
                return Err(ValidationError::BlankTag.into());
            }
            let link = TagLink {
                task_id: task_id.to_string(),
                tag: tag.to_string(),
            };
            if state.links.has_tag(&link) {
                return Ok((vec![], ()));
            }
            Ok((vec![Change::AddTag { link }], ()))
        })
    }

    /// Untag a task. The task must exist; an absent tag is a no-op.
    pub fn remove_tag(&self, task_id: &str, tag: &str) -> Result<()> {
        self.mutate("remove_tag", |state| {
            require_task(state, task_id)?;
            let link = TagLink {
                task_id: task_id.to_string(),
                tag: tag.to_string(),
            };
            if !state.links.has_tag(&link) {
                return Ok((vec![], ()));
            }
            Ok((vec![Change::RemoveTag { link }], ()))
        })
    }

    /// Point a task at an entity. Existing links are a no-op.
    pub fn add_entity_link(&self, task_id: &str, entity_id: &str) -> Result<()> {
        self.mutate("add_entity_link", |state| {
            require_task(state, task_id)?;
            require_entity(state, entity_id)?;
            let link = EntityLink {
                task_id: task_id.to_string(),
                entity_id: entity_id.to_string(),
            };
            if state.links.has_entity_link(&link) {
                return Ok((vec![], ()));
            }
            Ok((vec![Change::AddEntityLink { link }], ()))
        })
    }

    /// Remove a task-entity link. Both must exist; an absent link is a no-op.
    pub fn remove_entity_link(&self, task_id: &str, entity_id: &str) -> Result<()> {
        self.mutate("remove_entity_link", |state| {
            require_task(state, task_id)?;
            require_entity(state, entity_id)?;
            let link = EntityLink {
                task_id: task_id.to_string(),
                entity_id: entity_id.to_string(),
            };
            if !state.links.has_entity_link(&link) {
                return Ok((vec![], ()));
            }
            Ok((vec![Change::RemoveEntityLink { link }], ()))
        })
    }

    /// Tasks carrying `tag`, most recently updated first.
    pub fn tasks_by_tag(&self, tag: &str) -> Vec<Task> {
        let state = self.read();
        let ids = state.links.tasks_with_tag(tag);
        collect_ordered(&state, ids.iter().map(String::as_str), recent_first)
    }

    /// Tasks linked to an entity, most recently updated first. `None` for
    /// unknown entities.
    pub fn tasks_by_entity(&self, entity_id: &str) -> Option<Vec<Task>> {
        let state = self.read();
        state.entities.get(entity_id)?;
        let ids = state.links.tasks_with_entity(entity_id);
        Some(collect_ordered(&state, ids.iter().map(String::as_str), recent_first))
    }

    /// Tags on a task, by tag. `None` for unknown tasks.
    pub fn tags_of(&self, task_id: &str) -> Option<Vec<String>> {
        let state = self.read();
        state.task(task_id)?;
        let mut tags = state.links.tags_of(task_id);
        tags.sort();
        Some(tags)
    }

    /// Entities a task points at, by name. `None` for unknown tasks.
    pub fn entities_of(&self, task_id: &str) -> Option<Vec<Entity>> {
        let state = self.read();
        state.task(task_id)?;
        let mut entities: Vec<Entity> = state
            .links
            .entities_of(task_id)
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Some(entities)
    }

    /// Every tag in use, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        self.read().links.all_tags()
    }
}
