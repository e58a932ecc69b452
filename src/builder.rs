//! Builder pattern API for creating tasks.

use crate::store::{NewTask, Store};
use crate::types::Task;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};

/// Builder for creating tasks with a fluent API. Everything set on the
/// builder is validated and committed together by `create`.
///
/// # Example
///
/// ```ignore
/// let task = store.build("Book flights")
///     .parent(&trip.id)
///     .tag("travel")
///     .entity("paris")
///     .schedule(start, end)
///     .create()?;
/// ```
pub struct TaskBuilder<'a> {
    store: &'a Store,
    spec: NewTask,
}

impl<'a> TaskBuilder<'a> {
    /// Create a new builder with the given title.
    pub fn new(store: &'a Store, title: impl Into<String>) -> Self {
        Self {
            store,
            spec: NewTask::new(title),
        }
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.spec.id = Some(id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = Some(description.into());
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.spec.note = Some(note.into());
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.spec.parent_id = Some(parent_id.into());
        self
    }

    /// Set the planned window.
    pub fn schedule(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.spec.scheduled_start = Some(start);
        self.spec.scheduled_end = Some(end);
        self
    }

    /// Set only the planned start.
    pub fn starts_at(mut self, start: DateTime<Utc>) -> Self {
        self.spec.scheduled_start = Some(start);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.spec.tags.push(tag.into());
        self
    }

    /// Add multiple tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.spec.tags.extend(tags.into_iter().map(|t| t.into()));
        self
    }

    /// Link an already-registered entity.
    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.spec.entities.push(entity_id.into());
        self
    }

    /// Create the task.
    pub fn create(self) -> Result<Task> {
        self.store.create_task(self.spec).context("Failed to create task")
    }
}

/// Extension trait to add builder method to Store.
pub trait StoreBuilderExt {
    /// Start building a new task with the given title.
    fn build(&self, title: impl Into<String>) -> TaskBuilder<'_>;
}

impl StoreBuilderExt for Store {
    fn build(&self, title: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder::new(self, title)
    }
}
