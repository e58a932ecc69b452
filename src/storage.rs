//! Storage layer for trellis: JSONL journal + SQLite cache.
//!
//! The journal is the source of truth: one `Change` per line, appended per
//! committed mutation. The SQLite database mirrors the current rows with
//! the same CHECK constraints the engine enforces, and is what snapshots
//! are read from. It is rebuilt from the journal whenever the two disagree.

use crate::change::Change;
use crate::persist::{Persistence, Snapshot};
use crate::types::{Dependency, Entity, EntityLink, Status, TagLink, Task};
use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use log::{debug, info, warn};
use rusqlite::{Connection, params};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Storage directory name.
pub const TRELLIS_DIR: &str = ".trellis";

/// Append-only change journal.
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// SQLite cache file.
pub const DB_FILE: &str = "trellis.db";

/// Storage handle for reading/writing trellis data.
pub struct Storage {
    root: PathBuf,
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join(TRELLIS_DIR);
        fs::create_dir_all(&dir).context("Failed to create .trellis directory")?;

        let journal_path = dir.join(JOURNAL_FILE);
        if !journal_path.exists() {
            File::create(&journal_path).context("Failed to create journal.jsonl")?;
        }

        let db = Connection::open(dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;
        storage.rebuild_from_journal()?;

        info!("Initialized storage in {}", dir.display());
        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(TRELLIS_DIR);
        if !dir.exists() {
            eyre::bail!("No .trellis directory found. Run 'tl init' first.");
        }

        let db = Connection::open(dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;

        if storage.needs_rebuild()? {
            info!("SQLite cache out of date, rebuilding from journal");
            storage.rebuild_from_journal()?;
        }

        Ok(storage)
    }

    /// The .trellis directory.
    pub fn dir(&self) -> PathBuf {
        self.root.join(TRELLIS_DIR)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir().join(JOURNAL_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir().join(DB_FILE)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL,
                    aliases TEXT,
                    note TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK (length(trim(id)) > 0),
                    CHECK (length(trim(name)) > 0),
                    CHECK (length(trim(type)) > 0),
                    CHECK (aliases IS NULL OR (json_valid(aliases) AND json_type(aliases) = 'array')),
                    CHECK (updated_at >= created_at)
                );
                CREATE INDEX IF NOT EXISTS entities_name_idx ON entities(name);
                CREATE INDEX IF NOT EXISTS entities_type_idx ON entities(type);

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL,
                    parent_id TEXT,
                    scheduled_start TEXT,
                    scheduled_end TEXT,
                    actual_start TEXT,
                    actual_end TEXT,
                    note TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    completed_at TEXT,
                    CHECK (length(trim(id)) > 0),
                    CHECK (length(trim(title)) > 0),
                    CHECK (status IN ('pending', 'in_progress', 'completed', 'cancelled')),
                    CHECK (updated_at >= created_at),
                    CHECK (completed_at IS NULL OR completed_at >= created_at),
                    CHECK (
                        (status IN ('completed', 'cancelled') AND completed_at IS NOT NULL) OR
                        (status IN ('pending', 'in_progress') AND completed_at IS NULL)
                    ),
                    CHECK (parent_id IS NULL OR parent_id <> id),
                    CHECK (scheduled_start IS NULL OR scheduled_end IS NULL OR scheduled_start < scheduled_end),
                    CHECK (actual_start IS NULL OR actual_end IS NULL OR actual_start < actual_end)
                );
                CREATE INDEX IF NOT EXISTS tasks_parent_id_idx ON tasks(parent_id);
                CREATE INDEX IF NOT EXISTS tasks_status_idx ON tasks(status);
                CREATE INDEX IF NOT EXISTS tasks_completed_at_idx ON tasks(completed_at);

                CREATE TABLE IF NOT EXISTS task_dependencies (
                    task_id TEXT NOT NULL,
                    depends_on_id TEXT NOT NULL,
                    PRIMARY KEY (task_id, depends_on_id),
                    CHECK (task_id <> depends_on_id)
                );
                CREATE INDEX IF NOT EXISTS task_dependencies_depends_on_id_idx ON task_dependencies(depends_on_id);

                CREATE TABLE IF NOT EXISTS task_tags (
                    task_id TEXT NOT NULL,
                    tag TEXT NOT NULL,
                    PRIMARY KEY (task_id, tag),
                    CHECK (length(trim(tag)) > 0)
                );
                CREATE INDEX IF NOT EXISTS task_tags_tag_idx ON task_tags(tag);

                CREATE TABLE IF NOT EXISTS task_entities (
                    task_id TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    PRIMARY KEY (task_id, entity_id)
                );
                CREATE INDEX IF NOT EXISTS task_entities_entity_id_idx ON task_entities(entity_id);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Check if SQLite needs to be rebuilt from the journal.
    fn needs_rebuild(&self) -> Result<bool> {
        let journal_lines = count_lines(&self.journal_path())?;
        Ok(journal_lines as i64 != self.stored_journal_lines())
    }

    fn stored_journal_lines(&self) -> i64 {
        self.db
            .query_row(
                "SELECT CAST(COALESCE((SELECT value FROM meta WHERE key = 'journal_lines'), '0') AS INTEGER)",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0)
    }

    /// Rebuild the SQLite cache by replaying the journal.
    pub fn rebuild_from_journal(&mut self) -> Result<()> {
        let journal_path = self.journal_path();
        let mut changes = Vec::new();
        let mut line_count = 0usize;

        if journal_path.exists() {
            let file = File::open(&journal_path).context("Failed to open journal.jsonl")?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                line_count += 1;
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("Failed to read journal line {}: {}", line_count, e);
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Change>(&line) {
                    Ok(change) => changes.push(change),
                    Err(e) => warn!("Failed to parse journal line {}: {}", line_count, e),
                }
            }
        }

        let tx = self.db.transaction().context("Failed to start rebuild transaction")?;
        tx.execute_batch(
            r#"
            DELETE FROM task_entities;
            DELETE FROM task_tags;
            DELETE FROM task_dependencies;
            DELETE FROM tasks;
            DELETE FROM entities;
        "#,
        )
        .context("Failed to clear tables")?;

        for (i, change) in changes.iter().enumerate() {
            apply_to_db(&tx, change)
                .with_context(|| format!("Failed to replay journal entry {} ({})", i + 1, change.op()))?;
        }

        set_journal_lines(&tx, line_count)?;
        tx.commit().context("Failed to commit rebuild")?;

        debug!("Replayed {} journal entries", changes.len());
        Ok(())
    }

    /// Persist one batch: the SQLite rows and the journal lines land together
    /// or not at all.
    pub fn append(&mut self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let journal_path = self.journal_path();
        let mut payload = String::new();
        for change in changes {
            let json = serde_json::to_string(change).context("Failed to serialize change")?;
            payload.push_str(&json);
            payload.push('\n');
        }

        let lines_after = self.stored_journal_lines() as usize + changes.len();

        let tx = self.db.transaction().context("Failed to start transaction")?;
        for change in changes {
            apply_to_db(&tx, change).with_context(|| format!("Failed to apply {} to SQLite", change.op()))?;
        }
        set_journal_lines(&tx, lines_after)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .context("Failed to open journal.jsonl for append")?;
        let previous_len = file.metadata().context("Failed to stat journal.jsonl")?.len();

        let written = file
            .write_all(payload.as_bytes())
            .and_then(|_| file.sync_all())
            .context("Failed to write to journal.jsonl");

        let result = written.and_then(|_| tx.commit().context("Failed to commit SQLite transaction"));
        if result.is_err() {
            // Keep the journal in step with the rolled-back cache.
            if let Err(e) = file.set_len(previous_len) {
                warn!("Failed to truncate journal after error: {}", e);
            }
        }
        result
    }

    /// Read every row back out of SQLite.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let mut stmt = self.db.prepare(
            r#"
            SELECT id, name, type, aliases, note, created_at, updated_at
            FROM entities ORDER BY id
            "#,
        )?;
        let entities = stmt
            .query_map([], row_to_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load entities")?;

        let mut stmt = self.db.prepare(
            r#"
            SELECT id, title, description, status, parent_id, scheduled_start, scheduled_end,
                   actual_start, actual_end, note, created_at, updated_at, completed_at
            FROM tasks ORDER BY created_at, id
            "#,
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load tasks")?;

        let mut stmt = self
            .db
            .prepare("SELECT task_id, depends_on_id FROM task_dependencies ORDER BY task_id, depends_on_id")?;
        let dependencies = stmt
            .query_map([], |row| {
                Ok(Dependency {
                    task_id: row.get(0)?,
                    depends_on_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load dependencies")?;

        let mut stmt = self.db.prepare("SELECT task_id, tag FROM task_tags ORDER BY task_id, tag")?;
        let tags = stmt
            .query_map([], |row| {
                Ok(TagLink {
                    task_id: row.get(0)?,
                    tag: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load tags")?;

        let mut stmt = self
            .db
            .prepare("SELECT task_id, entity_id FROM task_entities ORDER BY task_id, entity_id")?;
        let entity_links = stmt
            .query_map([], |row| {
                Ok(EntityLink {
                    task_id: row.get(0)?,
                    entity_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load entity links")?;

        Ok(Snapshot {
            tasks,
            entities,
            dependencies,
            tags,
            entity_links,
        })
    }

    /// Replace the journal with `changes` and rebuild the cache from it.
    pub fn rewrite_journal(&mut self, changes: &[Change]) -> Result<()> {
        let journal_path = self.journal_path();
        let tmp_path = self.dir().join(format!("{}.tmp", JOURNAL_FILE));

        {
            let mut file = File::create(&tmp_path).context("Failed to create temporary journal")?;
            for change in changes {
                let json = serde_json::to_string(change).context("Failed to serialize change")?;
                writeln!(file, "{}", json).context("Failed to write temporary journal")?;
            }
            file.sync_all().context("Failed to sync temporary journal")?;
        }

        fs::rename(&tmp_path, &journal_path).context("Failed to replace journal.jsonl")?;
        self.rebuild_from_journal()
    }

    /// Run SQLite's VACUUM.
    pub fn vacuum(&self) -> Result<()> {
        self.db.execute_batch("VACUUM").context("Failed to vacuum database")?;
        Ok(())
    }

    /// Number of lines currently in the journal.
    pub fn journal_len(&self) -> Result<usize> {
        count_lines(&self.journal_path())
    }

    pub fn count_tasks(&self) -> Result<usize> {
        let count: i64 = self.db.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_dependencies(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM task_dependencies", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl Persistence for Storage {
    fn load(&mut self) -> Result<Snapshot> {
        self.load_snapshot()
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        self.append(changes)
    }

    fn flush(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(self.journal_path())
            .context("Failed to open journal.jsonl for sync")?;
        file.sync_all().context("Failed to sync journal.jsonl")?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so text comparison in CHECK constraints matches
/// chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn set_journal_lines(conn: &Connection, lines: usize) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('journal_lines', ?)",
        params![lines.to_string()],
    )?;
    Ok(())
}

/// Apply one change to the SQLite mirror.
fn apply_to_db(conn: &Connection, change: &Change) -> Result<()> {
    match change {
        Change::PutTask { task } => {
            conn.execute(
                r#"
                INSERT INTO tasks (
                    id, title, description, status, parent_id,
                    scheduled_start, scheduled_end, actual_start, actual_end,
                    note, created_at, updated_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    status = excluded.status,
                    parent_id = excluded.parent_id,
                    scheduled_start = excluded.scheduled_start,
                    scheduled_end = excluded.scheduled_end,
                    actual_start = excluded.actual_start,
                    actual_end = excluded.actual_end,
                    note = excluded.note,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    completed_at = excluded.completed_at
                "#,
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.parent_id,
                    task.scheduled_start.as_ref().map(ts),
                    task.scheduled_end.as_ref().map(ts),
                    task.actual_start.as_ref().map(ts),
                    task.actual_end.as_ref().map(ts),
                    task.note,
                    ts(&task.created_at),
                    ts(&task.updated_at),
                    task.completed_at.as_ref().map(ts),
                ],
            )?;
        }
        Change::DeleteTask { id } => {
            conn.execute("DELETE FROM task_dependencies WHERE task_id = ?1 OR depends_on_id = ?1", params![id])?;
            conn.execute("DELETE FROM task_tags WHERE task_id = ?", params![id])?;
            conn.execute("DELETE FROM task_entities WHERE task_id = ?", params![id])?;
            conn.execute("UPDATE tasks SET parent_id = NULL WHERE parent_id = ?", params![id])?;
            conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        }
        Change::PutEntity { entity } => {
            let aliases = if entity.aliases.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&entity.aliases).context("Failed to serialize aliases")?)
            };
            conn.execute(
                r#"
                INSERT INTO entities (id, name, type, aliases, note, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    aliases = excluded.aliases,
                    note = excluded.note,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    entity.id,
                    entity.name,
                    entity.kind,
                    aliases,
                    entity.note,
                    ts(&entity.created_at),
                    ts(&entity.updated_at),
                ],
            )?;
        }
        Change::DeleteEntity { id } => {
            conn.execute("DELETE FROM task_entities WHERE entity_id = ?", params![id])?;
            conn.execute("DELETE FROM entities WHERE id = ?", params![id])?;
        }
        Change::AddDependency { edge } => {
            conn.execute(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)",
                params![edge.task_id, edge.depends_on_id],
            )?;
        }
        Change::RemoveDependency { edge } => {
            conn.execute(
                "DELETE FROM task_dependencies WHERE task_id = ? AND depends_on_id = ?",
                params![edge.task_id, edge.depends_on_id],
            )?;
        }
        Change::AddTag { link } => {
            conn.execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag) VALUES (?, ?)",
                params![link.task_id, link.tag],
            )?;
        }
        Change::RemoveTag { link } => {
            conn.execute(
                "DELETE FROM task_tags WHERE task_id = ? AND tag = ?",
                params![link.task_id, link.tag],
            )?;
        }
        Change::AddEntityLink { link } => {
            conn.execute(
                "INSERT OR IGNORE INTO task_entities (task_id, entity_id) VALUES (?, ?)",
                params![link.task_id, link.entity_id],
            )?;
        }
        Change::RemoveEntityLink { link } => {
            conn.execute(
                "DELETE FROM task_entities WHERE task_id = ? AND entity_id = ?",
                params![link.task_id, link.entity_id],
            )?;
        }
    }
    Ok(())
}

/// Convert a database row to a Task.
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(3)?;
    let status = status_str.parse::<Status>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        parent_id: row.get(4)?,
        scheduled_start: parse_opt_ts(5, row.get(5)?)?,
        scheduled_end: parse_opt_ts(6, row.get(6)?)?,
        actual_start: parse_opt_ts(7, row.get(7)?)?,
        actual_end: parse_opt_ts(8, row.get(8)?)?,
        note: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
        updated_at: parse_ts(11, &updated_at)?,
        completed_at: parse_opt_ts(12, row.get(12)?)?,
    })
}

/// Convert a database row to an Entity.
fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let aliases: Option<String> = row.get(3)?;
    let aliases = match aliases {
        Some(json) => serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => Vec::new(),
    };

    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        aliases,
        note: row.get(4)?,
        created_at: parse_ts(5, &created_at)?,
        updated_at: parse_ts(6, &updated_at)?,
    })
}

/// Count lines in a file.
fn count_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).context("Failed to open file for line count")?;
    let reader = BufReader::new(file);
    Ok(reader.lines().count())
}
