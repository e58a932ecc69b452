//! Vacuum operations for store maintenance.
//!
//! Vacuum compacts the journal down to one line per live record, rebuilds
//! the SQLite cache from it, and runs SQLite's built-in vacuum to reclaim
//! space. Run it on a store nobody else has open.

use crate::state::State;
use crate::storage::Storage;
use eyre::{Context, Result};
use log::info;
use std::path::Path;

/// Result of a vacuum operation.
#[derive(Debug)]
pub struct VacuumResult {
    /// Size of database before vacuum (bytes).
    pub size_before: u64,
    /// Size of database after vacuum (bytes).
    pub size_after: u64,
    /// Journal lines before compaction.
    pub journal_before: usize,
    /// Journal lines after compaction.
    pub journal_after: usize,
    pub task_count: usize,
    pub dependency_count: usize,
}

/// Vacuum the trellis store at the given path.
pub fn vacuum(root: &Path) -> Result<VacuumResult> {
    let mut storage = Storage::open(root).context("Failed to open storage for vacuum")?;
    let db_path = storage.db_path();
    let size_before = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let journal_before = storage.journal_len()?;

    // Round-trip through State so dangling rows are dropped, not rewritten.
    let snapshot = storage.load_snapshot()?;
    let state = State::from_snapshot(snapshot).context("Refusing to compact an inconsistent store")?;
    let changes = state.snapshot().to_changes();

    storage
        .rewrite_journal(&changes)
        .context("Failed to compact journal")?;
    storage.vacuum().context("Failed to run SQLite vacuum")?;

    let result = VacuumResult {
        size_before,
        size_after: std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0),
        journal_before,
        journal_after: storage.journal_len()?,
        task_count: storage.count_tasks()?,
        dependency_count: storage.count_dependencies()?,
    };
    info!(
        "Vacuumed store: journal {} -> {} lines",
        result.journal_before, result.journal_after
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use tempfile::TempDir;

    #[test]
    fn test_vacuum_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        Store::init(temp_dir.path()).unwrap();

        let result = vacuum(temp_dir.path()).unwrap();

        assert_eq!(result.task_count, 0);
        assert_eq!(result.dependency_count, 0);
        assert_eq!(result.journal_after, 0);
    }

    #[test]
    fn test_vacuum_compacts_history() {
        let temp_dir = TempDir::new().unwrap();
        let (a, b) = {
            let store = Store::init(temp_dir.path()).unwrap();
            let a = store.create("Task 1", None, None).unwrap();
            let b = store.create("Task 2", None, None).unwrap();
            let gone = store.create("Scratch", None, None).unwrap();
            store.add_edge(&b.id, &a.id).unwrap();
            store.add_tag(&a.id, "home").unwrap();
            store.start(&a.id).unwrap();
            store.complete(&a.id).unwrap();
            store.delete(&gone.id).unwrap();
            store.close().unwrap();
            (a, b)
        };

        let result = vacuum(temp_dir.path()).unwrap();

        assert_eq!(result.task_count, 2);
        assert_eq!(result.dependency_count, 1);
        assert!(result.journal_after < result.journal_before);
        // two tasks, one edge, one tag
        assert_eq!(result.journal_after, 4);

        let store = Store::open(temp_dir.path()).unwrap();
        assert_eq!(store.get(&a.id).unwrap().status, crate::Status::Completed);
        assert_eq!(store.is_ready(&b.id), Some(true));
        assert_eq!(store.tags_of(&a.id).unwrap(), vec!["home"]);
    }
}
