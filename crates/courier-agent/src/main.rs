//! # courier
//!
//! Operator binary: apply migrations and inspect the event log and outbox.

#![deny(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::logging::{init_subscriber, LogFormat};
use courier_events::{latest_version, new_file, ConnectionConfig, EventStore, OutboxStore};
use courier_settings::CourierSettings;
use serde_json::json;

/// Courier operator CLI.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier event log and outbox tool")]
struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Print a session's events as JSON lines.
    Events {
        /// Session key, `user:agent:thread`.
        session_key: String,
        /// Only events after this sequence number.
        #[arg(long)]
        since: Option<i64>,
    },
    /// Print the next free sequence number of a session.
    NextSeq {
        /// Session key, `user:agent:thread`.
        session_key: String,
    },
    /// Print pending effects as JSON lines, oldest first.
    Effects {
        /// Restrict to one session.
        #[arg(long)]
        session: Option<String>,
        /// Maximum rows.
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Print effect counts by status.
    Stats,
}

fn resolve_db_path(cli_path: Option<PathBuf>, settings: &CourierSettings) -> PathBuf {
    cli_path
        .or_else(|| {
            (!settings.database.path.is_empty()).then(|| PathBuf::from(&settings.database.path))
        })
        .unwrap_or_else(|| courier_settings::courier_home().join("courier.db"))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_stores(db_path: &Path, settings: &CourierSettings) -> Result<(EventStore, OutboxStore)> {
    ensure_parent_dir(db_path)?;
    let db_str = db_path
        .to_str()
        .with_context(|| format!("Database path is not UTF-8: {}", db_path.display()))?;
    let pool = new_file(db_str, &ConnectionConfig::from(&settings.database))
        .context("Failed to open database")?;
    let events = EventStore::new(pool.clone());
    Ok((events, OutboxStore::new(pool)))
}

fn run(command: Command, events: &EventStore, outbox: &OutboxStore, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Migrate => {
            let applied = events.migrate().context("Failed to run migrations")?;
            writeln!(out, "applied {applied} migration(s), schema version {}", latest_version())?;
        }
        Command::Events { session_key, since } => {
            let _ = events.migrate().context("Failed to run migrations")?;
            let rows = match since {
                Some(seq) => events.find_since(&session_key, seq)?,
                None => events.find_by_session(&session_key)?,
            };
            for row in rows {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
        Command::NextSeq { session_key } => {
            let _ = events.migrate().context("Failed to run migrations")?;
            writeln!(out, "{}", events.get_next_seq(&session_key)?)?;
        }
        Command::Effects { session, limit } => {
            let _ = events.migrate().context("Failed to run migrations")?;
            for row in outbox.get_pending(limit, session.as_deref())? {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
        Command::Stats => {
            let _ = events.migrate().context("Failed to run migrations")?;
            let counts = outbox.count_by_status()?;
            let stats = json!({
                "pending": counts.pending,
                "executing": counts.executing,
                "completed": counts.completed,
                "failed": counts.failed,
                "total": counts.total(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = courier_settings::load_settings().context("Failed to load settings")?;
    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    let format = if settings.logging.json { LogFormat::Json } else { LogFormat::Compact };
    init_subscriber(level, format);

    let db_path = resolve_db_path(args.db_path, &settings);
    tracing::debug!(path = %db_path.display(), "using database");
    let (events, outbox) = open_stores(&db_path, &settings)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(args.command, &events, &outbox, &mut out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
