//! Read-only queries: work queues, hierarchy listings, filtered listings and
//! entity search.

use crate::config::SearchMode;
use crate::state::State;
use crate::store::Store;
use crate::types::{Entity, Status, Task};
use std::cmp::Ordering;

/// Queue order: scheduled tasks first by `scheduled_start`, unscheduled
/// tasks last, then newest `created_at` first. Ties break on id.
pub(crate) fn queue_order(a: &Task, b: &Task) -> Ordering {
    match (a.scheduled_start, b.scheduled_start) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.created_at.cmp(&a.created_at))
    .then_with(|| a.id.cmp(&b.id))
}

/// Most recently touched first.
pub(crate) fn recent_first(a: &Task, b: &Task) -> Ordering {
    b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id))
}

/// Resolve ids against the arena and sort them. Unknown ids are skipped.
pub(crate) fn collect_ordered<'a>(
    state: &State,
    ids: impl IntoIterator<Item = &'a str>,
    order: fn(&Task, &Task) -> Ordering,
) -> Vec<Task> {
    let mut tasks: Vec<Task> = ids.into_iter().filter_map(|id| state.task(id).cloned()).collect();
    tasks.sort_by(order);
    tasks
}

/// One row of a subtree listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtreeEntry {
    /// 0 for the root of the listing
    pub depth: usize,
    pub task: Task,
}

/// Criteria for `Store::list`. Every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub status: Option<Status>,
    pub tag: Option<String>,
    pub entity_id: Option<String>,
    pub parent_id: Option<String>,
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Case-insensitive title substring.
    pub fn title_contains(mut self, substring: impl Into<String>) -> Self {
        self.title_contains = Some(substring.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, state: &State, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if let Some(parent) = &self.parent_id
            && task.parent_id.as_ref() != Some(parent)
        {
            return false;
        }
        if let Some(needle) = &self.title_contains
            && !task.title.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !state.links.has_tag(&crate::types::TagLink {
                task_id: task.id.clone(),
                tag: tag.clone(),
            })
        {
            return false;
        }
        if let Some(entity_id) = &self.entity_id
            && !state.links.has_entity_link(&crate::types::EntityLink {
                task_id: task.id.clone(),
                entity_id: entity_id.clone(),
            })
        {
            return false;
        }
        true
    }
}

/// Fluent front end over `Filter`.
///
/// ```no_run
/// # use trellis::{Store, Status};
/// # let store = Store::in_memory();
/// let recent = store.query().status(Status::Pending).tag("home").limit(5).execute();
/// ```
pub struct Query<'a> {
    store: &'a Store,
    filter: Filter,
}

impl<'a> Query<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            filter: Filter::new(),
        }
    }

    pub fn status(mut self, status: Status) -> Self {
        self.filter = self.filter.status(status);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.filter = self.filter.tag(tag);
        self
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.filter = self.filter.entity(entity_id);
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.filter = self.filter.parent(parent_id);
        self
    }

    pub fn title_contains(mut self, substring: impl Into<String>) -> Self {
        self.filter = self.filter.title_contains(substring);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.filter = self.filter.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.filter = self.filter.offset(offset);
        self
    }

    /// Run the query.
    pub fn execute(self) -> Vec<Task> {
        self.store.list(&self.filter)
    }

    /// Count matches, ignoring limit and offset.
    pub fn count(self) -> usize {
        let state = self.store.read();
        state.tasks.values().filter(|t| self.filter.matches(&state, t)).count()
    }
}

impl Store {
    /// Ready tasks, in queue order.
    pub fn ready_queue(&self) -> Vec<Task> {
        let state = self.read();
        let mut tasks: Vec<Task> = state.tasks.values().filter(|t| state.is_ready(t)).cloned().collect();
        tasks.sort_by(queue_order);
        tasks
    }

    /// Blocked tasks, in queue order.
    pub fn blocked_list(&self) -> Vec<Task> {
        let state = self.read();
        let mut tasks: Vec<Task> = state.tasks.values().filter(|t| state.is_blocked(t)).cloned().collect();
        tasks.sort_by(queue_order);
        tasks
    }

    /// Direct children of a task, in queue order.
    pub fn children(&self, id: &str) -> Option<Vec<Task>> {
        let state = self.read();
        state.task(id)?;
        Some(collect_ordered(&state, state.hierarchy.children(id), queue_order))
    }

    /// Depth-first pre-order listing rooted at `id`, siblings in queue order.
    pub fn subtree(&self, id: &str) -> Option<Vec<SubtreeEntry>> {
        let state = self.read();
        let root = state.task(id)?.clone();

        let mut listing = Vec::new();
        let mut stack = vec![(0, root)];
        while let Some((depth, task)) = stack.pop() {
            let children = collect_ordered(&state, state.hierarchy.children(&task.id), queue_order);
            stack.extend(children.into_iter().rev().map(|child| (depth + 1, child)));
            listing.push(SubtreeEntry { depth, task });
        }
        Some(listing)
    }

    /// Tasks matching a filter, most recently updated first.
    pub fn list(&self, filter: &Filter) -> Vec<Task> {
        let state = self.read();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(&state, t))
            .cloned()
            .collect();
        tasks.sort_by(recent_first);

        tasks
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Start building a filtered listing.
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    /// Entities whose name or an alias matches, using the configured mode.
    pub fn search(&self, pattern: &str) -> Vec<Entity> {
        self.search_with(pattern, self.config().search.mode)
    }

    /// Entities whose name or an alias matches under `mode`, by name.
    pub fn search_with(&self, pattern: &str, mode: SearchMode) -> Vec<Entity> {
        let state = self.read();
        let mut found: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| e.names().any(|name| mode.matches(name, pattern)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }
}
