//! rewind - checkpoint and rewind AI coding agent sessions
//!
//! Thin CLI over rewind-core: every command resolves the project root from
//! the working directory, loads the merged configuration, and drives the
//! engine. Exit code 0 covers success and "no changes"; any failure exits 1
//! with a single-line, category-prefixed message on stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rewind_core::hooks::capture_chat_context;
use rewind_core::linker::ContextLinker;
use rewind_core::restore::{RestoreCoordinator, RestoreOptions, RestoreOutcome};
use rewind_core::snapshot::{CheckpointStore, CreateOutcome};
use rewind_core::transcript::{self, AgentProfile};
use rewind_core::{Config, RestoreMode, StorageLayout, StorageMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Checkpoint and rewind AI coding agent sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Snapshot the project tree (and current session transcript)
    Save {
        /// Checkpoint description
        description: Option<String>,
        /// Override the generated name slug
        #[arg(long)]
        name: Option<String>,
        /// Snapshot even when nothing changed
        #[arg(long)]
        force: bool,
    },
    /// List checkpoints, newest first
    List,
    /// Restore a checkpoint (code, context, or both)
    Restore {
        /// `last`, `prev`, an index, a name, or a name fragment
        selector: String,
        #[arg(long, default_value = "both")]
        mode: RestoreMode,
        /// Truncate the live transcript instead of forking
        #[arg(long)]
        in_place: bool,
        /// Report the plan without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Continue even if the emergency snapshot fails
        #[arg(long)]
        skip_backup: bool,
    },
    /// Restore the newest checkpoint
    Undo {
        #[arg(long, default_value = "both")]
        mode: RestoreMode,
    },
    /// Rewind the conversation N user turns
    Back {
        turns: usize,
        /// Also restore the matching code checkpoint
        #[arg(long)]
        both: bool,
        /// Truncate the live transcript instead of forking
        #[arg(long)]
        in_place: bool,
    },
    /// Show storage mode, checkpoints, and session state
    Status,
    /// Check snapshot and metadata integrity
    Validate,
    /// Prune checkpoints and sweep stale metadata
    Cleanup,
    /// Create the storage layout
    Init {
        #[arg(long, default_value = "project")]
        mode: StorageMode,
    },
    /// Set a configuration key
    Config {
        key: String,
        value: String,
        /// Write to the user-level config instead of the project config
        #[arg(long)]
        global: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let project_root = std::env::current_dir().context("cannot determine working directory")?;
    let config = Config::load_for_project(&project_root);
    let _log_guard = rewind_core::logging::init(&config.logging).ok();

    let layout = StorageLayout::resolve(&project_root, config.storage)?;

    match cli.command {
        Command::Save {
            description,
            name,
            force,
        } => cmd_save(&layout, &config, description, name, force),
        Command::List => cmd_list(&layout, &config),
        Command::Restore {
            selector,
            mode,
            in_place,
            dry_run,
            skip_backup,
        } => cmd_restore(
            &layout,
            &config,
            &selector,
            RestoreOptions {
                mode,
                in_place,
                dry_run,
                skip_backup,
            },
        ),
        Command::Undo { mode } => cmd_restore(
            &layout,
            &config,
            "last",
            RestoreOptions {
                mode,
                ..Default::default()
            },
        ),
        Command::Back {
            turns,
            both,
            in_place,
        } => {
            let coordinator = RestoreCoordinator::new(&layout, &config);
            let outcome = coordinator.back(turns, both, in_place)?;
            print_outcome(&outcome);
            Ok(0)
        }
        Command::Status => cmd_status(&layout, &config),
        Command::Validate => cmd_validate(&layout, &config),
        Command::Cleanup => cmd_cleanup(&layout, &config),
        Command::Init { mode } => cmd_init(&project_root, mode),
        Command::Config { key, value, global } => {
            if global {
                rewind_core::config::set_user_key(&key, &value)?;
                println!("Set {} = {} (user config)", key, value);
            } else {
                rewind_core::config::set_project_key(&layout, &key, &value)?;
                println!("Set {} = {} (project config)", key, value);
            }
            Ok(0)
        }
    }
}

fn cmd_save(
    layout: &StorageLayout,
    config: &Config,
    description: Option<String>,
    name: Option<String>,
    force: bool,
) -> Result<i32> {
    let store = CheckpointStore::new(layout, config);
    let captured = capture_chat_context(layout.project_root(), None, None);
    let (attachment, context) = match captured {
        Some(c) => (Some(c.attachment), Some(c.context)),
        None => (None, None),
    };

    let description = description.unwrap_or_default();
    let outcome = store.create(&description, force, name.as_deref(), attachment)?;

    match outcome {
        CreateOutcome::Created(manifest) => {
            if let Some(context) = context {
                ContextLinker::new(layout).add(&manifest.name, context)?;
            }
            println!(
                "Created checkpoint {} ({} files, {})",
                manifest.name,
                manifest.file_count,
                format_bytes(manifest.total_bytes)
            );
        }
        CreateOutcome::NoChanges { .. } => {
            println!("No changes since last checkpoint");
        }
    }
    Ok(0)
}

fn cmd_list(layout: &StorageLayout, config: &Config) -> Result<i32> {
    let store = CheckpointStore::new(layout, config);
    let manifests = store.list()?;
    if manifests.is_empty() {
        println!("No checkpoints yet. Run 'rewind save' to create one.");
        return Ok(0);
    }
    for (i, manifest) in manifests.iter().enumerate() {
        println!(
            "{:>3}  {}  {:>5} files  {:>9}  {}",
            i + 1,
            manifest.timestamp.format("%Y-%m-%d %H:%M:%S"),
            manifest.file_count,
            format_bytes(manifest.total_bytes),
            manifest.name,
        );
    }
    Ok(0)
}

fn cmd_restore(
    layout: &StorageLayout,
    config: &Config,
    selector: &str,
    options: RestoreOptions,
) -> Result<i32> {
    let coordinator = RestoreCoordinator::new(layout, config);
    let outcome = coordinator.restore(selector, &options)?;
    print_outcome(&outcome);
    Ok(0)
}

fn print_outcome(outcome: &RestoreOutcome) {
    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }
    if outcome.dry_run {
        println!("Dry run; plan:");
        for step in &outcome.plan {
            println!("  - {}", step);
        }
        return;
    }
    if let Some(emergency) = &outcome.emergency {
        println!("Safety snapshot: {}", emergency);
    }
    if let Some(checkpoint) = &outcome.checkpoint {
        if let Some(applied) = &outcome.applied {
            println!(
                "Restored {} ({} files restored, {} deleted)",
                checkpoint, applied.files_restored, applied.files_deleted
            );
        }
    }
    if let Some(fork) = &outcome.fork {
        println!("Forked conversation into session {}", fork.session_id);
    }
    if let Some(truncation) = &outcome.truncation {
        println!(
            "Truncated transcript (backup at {})",
            truncation.backup_path.display()
        );
    }
    if let Some(directive) = &outcome.directive {
        println!("{}", directive);
    }
}

fn cmd_status(layout: &StorageLayout, config: &Config) -> Result<i32> {
    let store = CheckpointStore::new(layout, config);
    let manifests = store.list()?;

    println!("Project:  {}", layout.project_root().display());
    println!(
        "Storage:  {} ({:?} mode, tier {})",
        layout.storage_root().display(),
        config.storage,
        config.tier.as_str()
    );
    println!(
        "Checkpoints: {} ({})",
        manifests.len(),
        format_bytes(manifests.iter().map(|m| m.total_bytes).sum())
    );

    if let Some(latest) = manifests.first() {
        println!(
            "Latest:   {} at {}",
            latest.name,
            latest.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        let changed = store.current_signature()? != latest.signature;
        println!(
            "Tree:     {}",
            if changed { "modified since latest checkpoint" } else { "unchanged" }
        );
    }

    let agent_kind = transcript::detect(None);
    let profile = AgentProfile::for_kind(agent_kind);
    let session = dirs_home().and_then(|home| {
        transcript::locate_transcript(profile, &home, layout.project_root())
            .ok()
            .flatten()
    });
    match session {
        Some(path) => println!("Session:  {} ({})", path.display(), agent_kind),
        None => println!("Session:  none detected"),
    }
    Ok(0)
}

fn cmd_validate(layout: &StorageLayout, config: &Config) -> Result<i32> {
    let store = CheckpointStore::new(layout, config);
    let mut problems = store.verify()?;

    let names: Vec<String> = store.list()?.into_iter().map(|m| m.name).collect();
    let linker = ContextLinker::new(layout);
    for (name, _) in linker.list()? {
        if !names.contains(&name) {
            problems.push(format!("metadata: {} has no checkpoint", name));
        }
    }

    if problems.is_empty() {
        println!("OK: {} checkpoints verified", names.len());
        Ok(0)
    } else {
        for problem in &problems {
            println!("{}", problem);
        }
        Ok(1)
    }
}

fn cmd_cleanup(layout: &StorageLayout, config: &Config) -> Result<i32> {
    let store = CheckpointStore::new(layout, config);
    let pruned = store.prune()?;

    let names: Vec<String> = store.list()?.into_iter().map(|m| m.name).collect();
    let linker = ContextLinker::new(layout);
    let swept = linker.sweep(names.iter().map(String::as_str))?;

    let engine = rewind_core::hooks::HookEngine::new(layout, config);
    let sessions = engine.sweep_sessions(chrono::Utc::now())?;

    println!(
        "Pruned {} checkpoints, {} metadata records, {} stale sessions",
        pruned.len(),
        swept.len(),
        sessions
    );
    Ok(0)
}

fn cmd_init(project_root: &PathBuf, mode: StorageMode) -> Result<i32> {
    let layout = StorageLayout::resolve(project_root, mode)?;
    layout.ensure()?;
    rewind_core::config::set_project_key(
        &layout,
        "storage",
        match mode {
            StorageMode::Project => "project",
            StorageMode::Global => "global",
        },
    )?;
    println!("Initialized {:?} storage at {}", mode, layout.storage_root().display());
    Ok(0)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
