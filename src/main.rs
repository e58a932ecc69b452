//! Trellis CLI - tasks, prerequisites and the entities they involve.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use trellis::{Filter, NewEntity, NewTask, Status, Store, Task, vacuum};

mod cli;

use cli::{Cli, Command, EntityCommand};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trellis")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("trellis.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Pending => "pending".green(),
        Status::InProgress => "in_progress".yellow(),
        Status::Completed => "completed".blue(),
        Status::Cancelled => "cancelled".dimmed(),
    }
}

fn print_task_line(task: &Task) {
    println!("  {} {} {}", format_status(&task.status), task.id.cyan(), task.title);
}

fn not_found(what: &str, id: &str) -> ! {
    eprintln!("{} {} not found: {}", "✗".red(), what, id);
    std::process::exit(1);
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);

    if let Command::Init = cli.command {
        Store::init(&store_dir).context("Failed to initialize trellis store")?;
        println!("{} Initialized trellis store in {}", "✓".green(), store_dir.display());
        return Ok(());
    }
    if let Command::Vacuum = cli.command {
        let result = vacuum(&store_dir).context("Failed to vacuum store")?;
        println!(
            "{} Vacuumed: journal {} -> {} lines, database {} -> {} bytes ({} tasks, {} dependencies)",
            "✓".green(),
            result.journal_before,
            result.journal_after,
            result.size_before,
            result.size_after,
            result.task_count,
            result.dependency_count
        );
        return Ok(());
    }

    let store = Store::open(&store_dir).context("Failed to open store")?;

    match cli.command {
        Command::Init | Command::Vacuum => {}

        Command::Create {
            title,
            description,
            parent,
            tags,
            entities,
        } => {
            let task = store
                .create_task(NewTask {
                    title,
                    description,
                    parent_id: parent,
                    tags: tags.unwrap_or_default(),
                    entities: entities.unwrap_or_default(),
                    ..Default::default()
                })
                .context("Failed to create task")?;

            println!("{} Created: {} {}", "✓".green(), task.id.cyan(), task.title);
        }

        Command::Get { id } => {
            let Some(task) = store.get(&id) else {
                not_found("Task", &id);
            };

            println!("{}: {}", "ID".bold(), task.id.cyan());
            println!("{}: {}", "Title".bold(), task.title);
            println!("{}: {}", "Status".bold(), format_status(&task.status));
            if let Some(parent) = &task.parent_id {
                println!("{}: {}", "Parent".bold(), parent.cyan());
            }
            if let Some(desc) = &task.description {
                println!("{}: {}", "Description".bold(), desc);
            }
            if let Some(note) = &task.note {
                println!("{}: {}", "Note".bold(), note);
            }
            let tags = store.tags_of(&task.id).unwrap_or_default();
            if !tags.is_empty() {
                println!("{}: {}", "Tags".bold(), tags.join(", "));
            }
            let entities = store.entities_of(&task.id).unwrap_or_default();
            if !entities.is_empty() {
                let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
                println!("{}: {}", "Entities".bold(), names.join(", "));
            }
            let prerequisites = store.prerequisites_of(&task.id).unwrap_or_default();
            if !prerequisites.is_empty() {
                let ids: Vec<&str> = prerequisites.iter().map(|t| t.id.as_str()).collect();
                println!("{}: {}", "Depends on".bold(), ids.join(", "));
            }
            println!("{}: {}", "Created".bold(), task.created_at);
            println!("{}: {}", "Updated".bold(), task.updated_at);
            if let Some(completed_at) = &task.completed_at {
                println!("{}: {}", "Finished".bold(), completed_at);
            }
        }

        Command::List { status, tag, limit } => {
            let mut filter = Filter::new();
            if let Some(status) = status {
                filter = filter.status(status.parse().map_err(|e: String| eyre::eyre!(e))?);
            }
            if let Some(tag) = tag {
                filter = filter.tag(tag);
            }
            if let Some(limit) = limit {
                filter = filter.limit(limit);
            }

            let tasks = store.list(&filter);
            if tasks.is_empty() {
                println!("{}", "No tasks found".dimmed());
            } else {
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }

        Command::Ready => {
            let tasks = store.ready_queue();
            if tasks.is_empty() {
                println!("{}", "No ready tasks".dimmed());
            } else {
                println!("{} {} task(s) ready to work on:", "→".blue(), tasks.len());
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }

        Command::Blocked => {
            let tasks = store.blocked_list();
            if tasks.is_empty() {
                println!("{}", "No blocked tasks".dimmed());
            } else {
                println!("{} {} task(s) blocked:", "⊘".red(), tasks.len());
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }

        Command::Start { id } => {
            let task = store.start(&id).context("Failed to start task")?;
            println!("{} Started: {} {}", "→".blue(), task.id.cyan(), task.title);
        }

        Command::Complete { id } => {
            let task = store.complete(&id).context("Failed to complete task")?;
            println!("{} Completed: {} {}", "✓".green(), task.id.cyan(), task.title);
        }

        Command::Cancel { id } => {
            let task = store.cancel(&id).context("Failed to cancel task")?;
            println!("{} Cancelled: {} {}", "✓".green(), task.id.cyan(), task.title);
        }

        Command::Depend { task_id, depends_on_id } => {
            store
                .add_edge(&task_id, &depends_on_id)
                .context("Failed to add dependency")?;
            println!(
                "{} {} now depends on {}",
                "✓".green(),
                task_id.cyan(),
                depends_on_id.cyan()
            );
        }

        Command::Undepend { task_id, depends_on_id } => {
            store
                .remove_edge(&task_id, &depends_on_id)
                .context("Failed to remove dependency")?;
            println!(
                "{} {} no longer depends on {}",
                "✓".green(),
                task_id.cyan(),
                depends_on_id.cyan()
            );
        }

        Command::Reparent { id, parent_id } => {
            let task = store
                .reparent(&id, parent_id.as_deref())
                .context("Failed to reparent task")?;
            match &task.parent_id {
                Some(parent) => println!("{} {} is now a child of {}", "✓".green(), task.id.cyan(), parent.cyan()),
                None => println!("{} {} is now a top-level task", "✓".green(), task.id.cyan()),
            }
        }

        Command::Delete { id } => {
            store.delete(&id).context("Failed to delete task")?;
            println!("{} Deleted: {}", "✓".green(), id.cyan());
        }

        Command::Tag { id, tag, remove } => {
            if remove {
                store.remove_tag(&id, &tag).context("Failed to remove tag")?;
                println!("{} Untagged {} from {}", "✓".green(), tag, id.cyan());
            } else {
                store.add_tag(&id, &tag).context("Failed to add tag")?;
                println!("{} Tagged {} with {}", "✓".green(), id.cyan(), tag);
            }
        }

        Command::Entity(EntityCommand::Add { id, name, kind, aliases }) => {
            let entity = store
                .upsert_entity(NewEntity {
                    id,
                    name,
                    kind,
                    aliases: aliases.unwrap_or_default(),
                    note: None,
                })
                .context("Failed to register entity")?;
            println!(
                "{} Registered: {} {} ({})",
                "✓".green(),
                entity.id.cyan(),
                entity.name,
                entity.kind
            );
        }

        Command::Entity(EntityCommand::Search { pattern }) => {
            let found = store.search(&pattern);
            if found.is_empty() {
                println!("{}", "No entities found".dimmed());
            } else {
                for entity in found {
                    let aliases = if entity.aliases.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", entity.aliases.join(", "))
                    };
                    println!(
                        "  {} {} ({}){}",
                        entity.id.cyan(),
                        entity.name,
                        entity.kind,
                        aliases.dimmed()
                    );
                }
            }
        }

        Command::Entity(EntityCommand::Link { task_id, entity_id }) => {
            store
                .add_entity_link(&task_id, &entity_id)
                .context("Failed to link entity")?;
            println!("{} {} now involves {}", "✓".green(), task_id.cyan(), entity_id.cyan());
        }

        Command::Tree { id } => {
            let Some(listing) = store.subtree(&id) else {
                not_found("Task", &id);
            };
            for entry in listing {
                println!(
                    "{}{} {} {}",
                    "  ".repeat(entry.depth),
                    format_status(&entry.task.status),
                    entry.task.id.cyan(),
                    entry.task.title
                );
            }
        }
    }

    store.close()
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
