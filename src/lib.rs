//! Trellis: a task-and-dependency graph engine.
//!
//! Trellis keeps tasks, their parent/child hierarchy, prerequisite edges
//! between them, tags, and links to canonical entities (people, places,
//! organizations, projects). Every mutation is validated against current
//! state, so both the dependency graph and the hierarchy stay acyclic and
//! the status state machine is never bypassed. A JSONL journal is the
//! source of truth; SQLite caches the current rows.
//!
//! # Example
//!
//! ```no_run
//! use trellis::{Store, Status};
//! use std::path::Path;
//!
//! // Initialize a new store
//! let store = Store::init(Path::new(".")).unwrap();
//!
//! // Create tasks
//! let design = store.create("Design schema", None, None).unwrap();
//! let migrate = store.create("Write migration", None, None).unwrap();
//!
//! // Migration waits on the design
//! store.add_edge(&migrate.id, &design.id).unwrap();
//!
//! // Query ready work
//! let ready = store.ready_queue();
//! assert_eq!(ready.len(), 1);
//! assert_eq!(ready[0].id, design.id);
//!
//! // Finish the design; the migration becomes ready
//! store.start(&design.id).unwrap();
//! store.complete(&design.id).unwrap();
//! assert_eq!(store.is_ready(&migrate.id), Some(true));
//! assert_eq!(store.get(&design.id).unwrap().status, Status::Completed);
//! ```

mod change;
mod graph;
mod id;
mod links;
mod persist;
mod state;
mod storage;
mod store;
mod types;

pub mod builder;
pub mod config;
pub mod query;
pub mod registry;
pub mod vacuum;

// Re-export public API
pub use builder::{StoreBuilderExt, TaskBuilder};
pub use change::Change;
pub use config::{Config, SearchConfig, SearchMode};
pub use id::TASK_ID_PREFIX;
pub use persist::{ChangeLog, MemoryStorage, Persistence, Snapshot};
pub use query::{Filter, Query, SubtreeEntry};
pub use registry::NewEntity;
pub use storage::{Storage, TRELLIS_DIR};
pub use store::{CycleKind, ErrorKind, NewTask, Store, StoreError, TaskUpdate};
pub use types::{
    Dependency, Entity, EntityLink, SUGGESTED_ENTITY_TYPES, Status, TagLink, Task, ValidationError,
};
pub use vacuum::{VacuumResult, vacuum};
