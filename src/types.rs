//! Core data types for the trellis task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity types suggested for `Entity::kind`. The field itself is open.
pub const SUGGESTED_ENTITY_TYPES: [&str; 4] = ["person", "place", "organization", "project"];

/// The canonical unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier: caller supplied, or "tl-" + 10 hex chars
    pub id: String,

    /// Short description of the work
    pub title: String,

    /// Optional longer description (markdown)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current state
    pub status: Status,

    /// Parent in the task hierarchy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Planned window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,

    /// Execution window, opened and closed by status transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// When created
    pub created_at: DateTime<Utc>,

    /// Last modification of any task field
    pub updated_at: DateTime<Utc>,

    /// Set exactly when the task is completed or cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Task status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pending, Status::InProgress, Status::Completed, Status::Cancelled];

    /// Check if a status transition is valid.
    ///
    /// Terminal states accept nothing, and re-entering the current state is
    /// not a transition.
    pub fn can_transition_to(&self, target: &Status) -> bool {
        use Status::*;
        matches!(
            (self, target),
            (Pending, InProgress)
                | (Pending, Completed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    /// Completed and cancelled tasks accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// A canonical reference (person, place, organization, project, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Stable external key
    pub id: String,

    pub name: String,

    /// Open-ended type; see `SUGGESTED_ENTITY_TYPES`
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Prerequisite edge: `task_id` is not ready until `depends_on_id` completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: String,
    pub depends_on_id: String,
}

impl Dependency {
    pub fn new(task_id: impl Into<String>, depends_on_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            depends_on_id: depends_on_id.into(),
        }
    }
}

/// Free-form tag attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagLink {
    pub task_id: String,
    pub tag: String,
}

/// Association between a task and an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityLink {
    pub task_id: String,
    pub entity_id: String,
}

/// Validation errors for records and references.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    BlankId,
    BlankTitle,
    BlankName,
    BlankType,
    BlankTag,
    DuplicateId(String),
    UnknownTask(String),
    UnknownEntity(String),
    SelfParent,
    SelfDependency,
    InvalidScheduledWindow,
    InvalidActualWindow,
    InvalidTimestamp,
    CompletedAtMismatch,
    CompletedBeforeCreated,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BlankId => write!(f, "id cannot be blank"),
            ValidationError::BlankTitle => write!(f, "title cannot be blank"),
            ValidationError::BlankName => write!(f, "entity name cannot be blank"),
            ValidationError::BlankType => write!(f, "entity type cannot be blank"),
            ValidationError::BlankTag => write!(f, "tag cannot be blank"),
            ValidationError::DuplicateId(id) => write!(f, "id already in use: {}", id),
            ValidationError::UnknownTask(id) => write!(f, "task not found: {}", id),
            ValidationError::UnknownEntity(id) => write!(f, "entity not found: {}", id),
            ValidationError::SelfParent => write!(f, "a task cannot be its own parent"),
            ValidationError::SelfDependency => write!(f, "a task cannot depend on itself"),
            ValidationError::InvalidScheduledWindow => {
                write!(f, "scheduled_start must be before scheduled_end")
            }
            ValidationError::InvalidActualWindow => write!(f, "actual_start must be before actual_end"),
            ValidationError::InvalidTimestamp => write!(f, "updated_at cannot be before created_at"),
            ValidationError::CompletedAtMismatch => {
                write!(f, "completed_at must be set exactly when status is completed or cancelled")
            }
            ValidationError::CompletedBeforeCreated => write!(f, "completed_at cannot be before created_at"),
        }
    }
}

impl std::error::Error for ValidationError {}

pub(crate) fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn window_ok(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => start < end,
        _ => true,
    }
}

impl Task {
    /// Validate the task's own fields. References are checked by the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.id) {
            return Err(ValidationError::BlankId);
        }
        if is_blank(&self.title) {
            return Err(ValidationError::BlankTitle);
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::SelfParent);
        }
        if !window_ok(self.scheduled_start, self.scheduled_end) {
            return Err(ValidationError::InvalidScheduledWindow);
        }
        if !window_ok(self.actual_start, self.actual_end) {
            return Err(ValidationError::InvalidActualWindow);
        }
        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(ValidationError::CompletedAtMismatch);
        }
        if let Some(completed_at) = self.completed_at
            && completed_at < self.created_at
        {
            return Err(ValidationError::CompletedBeforeCreated);
        }
        Ok(())
    }
}

impl Entity {
    /// Validate the entity's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.id) {
            return Err(ValidationError::BlankId);
        }
        if is_blank(&self.name) {
            return Err(ValidationError::BlankName);
        }
        if is_blank(&self.kind) {
            return Err(ValidationError::BlankType);
        }
        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }
        Ok(())
    }

    /// Name and aliases, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}
