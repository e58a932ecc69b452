//! CLI argument parsing for trellis.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tl",
    about = "Tasks, prerequisites and the people and places they involve",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/trellis/logs/trellis.log"
)]
pub struct Cli {
    /// Path to the trellis store directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new trellis store in the current directory
    Init,

    /// Create a new task
    Create {
        /// Task title
        title: String,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Parent task ID
        #[arg(short, long)]
        parent: Option<String>,

        /// Tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Linked entity IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        entities: Option<Vec<String>>,
    },

    /// Get a task by ID
    Get {
        /// Task ID
        id: String,
    },

    /// List tasks, most recently updated first
    List {
        /// Filter by status (pending, in_progress, completed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Maximum number of tasks to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show tasks that are ready to work on
    Ready,

    /// Show tasks waiting on a prerequisite
    Blocked,

    /// Start working on a task
    Start {
        /// Task ID
        id: String,
    },

    /// Mark a task completed
    Complete {
        /// Task ID
        id: String,
    },

    /// Cancel a task
    Cancel {
        /// Task ID
        id: String,
    },

    /// Record that a task depends on another
    Depend {
        /// Task that waits
        task_id: String,

        /// Task that must be completed first
        depends_on_id: String,
    },

    /// Remove a dependency
    Undepend {
        /// Task that waits
        task_id: String,

        /// Task it waits on
        depends_on_id: String,
    },

    /// Move a task under a new parent
    Reparent {
        /// Task ID
        id: String,

        /// New parent ID (omit to detach)
        parent_id: Option<String>,
    },

    /// Delete a task
    Delete {
        /// Task ID
        id: String,
    },

    /// Add or remove a tag
    Tag {
        /// Task ID
        id: String,

        /// Tag
        tag: String,

        /// Remove the tag instead of adding it
        #[arg(short, long)]
        remove: bool,
    },

    /// Manage entities
    #[command(subcommand)]
    Entity(EntityCommand),

    /// Show a task and everything under it
    Tree {
        /// Root task ID
        id: String,
    },

    /// Compact the journal and reclaim database space
    Vacuum,
}

#[derive(Subcommand)]
pub enum EntityCommand {
    /// Register or update an entity
    Add {
        /// Stable entity ID
        id: String,

        /// Display name
        name: String,

        /// Type (person, place, organization, project, ...)
        #[arg(short = 'T', long = "type", default_value = "person")]
        kind: String,

        /// Aliases (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        aliases: Option<Vec<String>>,
    },

    /// Search entities by name or alias
    Search {
        /// Name pattern
        pattern: String,
    },

    /// Link a task to an entity
    Link {
        /// Task ID
        task_id: String,

        /// Entity ID
        entity_id: String,
    },
}
