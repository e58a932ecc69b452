//! Persistence notifications.
//!
//! Every committed mutation is described by an ordered list of `Change`s.
//! The same records are the line format of the on-disk journal, so replaying
//! a journal from the top rebuilds the store.

use crate::types::{Dependency, Entity, EntityLink, TagLink, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Insert or replace a task record.
    PutTask { task: Task },
    DeleteTask { id: String },
    /// Insert or replace an entity record.
    PutEntity { entity: Entity },
    DeleteEntity { id: String },
    AddDependency { edge: Dependency },
    RemoveDependency { edge: Dependency },
    AddTag { link: TagLink },
    RemoveTag { link: TagLink },
    AddEntityLink { link: EntityLink },
    RemoveEntityLink { link: EntityLink },
}

impl Change {
    /// Short label used in logs.
    pub fn op(&self) -> &'static str {
        match self {
            Change::PutTask { .. } => "put_task",
            Change::DeleteTask { .. } => "delete_task",
            Change::PutEntity { .. } => "put_entity",
            Change::DeleteEntity { .. } => "delete_entity",
            Change::AddDependency { .. } => "add_dependency",
            Change::RemoveDependency { .. } => "remove_dependency",
            Change::AddTag { .. } => "add_tag",
            Change::RemoveTag { .. } => "remove_tag",
            Change::AddEntityLink { .. } => "add_entity_link",
            Change::RemoveEntityLink { .. } => "remove_entity_link",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_line_format() {
        let change = Change::AddDependency {
            edge: Dependency::new("tl-a", "tl-b"),
        };
        let line = serde_json::to_string(&change).unwrap();
        assert_eq!(
            line,
            r#"{"op":"add_dependency","edge":{"task_id":"tl-a","depends_on_id":"tl-b"}}"#
        );
        assert_eq!(change.op(), "add_dependency");
    }

    #[test]
    fn test_change_parses_delete() {
        let change: Change = serde_json::from_str(r#"{"op":"delete_task","id":"tl-a"}"#).unwrap();
        assert_eq!(change, Change::DeleteTask { id: "tl-a".to_string() });
    }
}
