//! Store administration: seed events, load rule documents, list events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use parley::ParleyConfig;
use parley::store::{NewEvent, SqliteStore};
use serde::Deserialize;

/// Manage the parley event and rule store.
#[derive(Parser)]
#[command(name = "parley-admin", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path; overrides the configured one.
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert events from a TOML file with one `[[events]]` table per event.
    SeedEvents { file: PathBuf },

    /// Load rule documents from a JSON Lines file.
    LoadRules { file: PathBuf },

    /// Print every stored event.
    ListEvents,
}

#[derive(Debug, Deserialize)]
struct EventFile {
    #[serde(default)]
    events: Vec<EventEntry>,
}

#[derive(Debug, Deserialize)]
struct EventEntry {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    organizer: String,
    #[serde(default)]
    contact_info: String,
    /// RFC 3339 timestamp.
    starts_at: DateTime<Utc>,
}

impl From<EventEntry> for NewEvent {
    fn from(e: EventEntry) -> Self {
        Self {
            title: e.title,
            description: e.description,
            outcome: e.outcome,
            organizer: e.organizer,
            contact_info: e.contact_info,
            starts_at: e.starts_at,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ParleyConfig::from_file(path)?,
        None => ParleyConfig::default(),
    };
    let database = cli.database.unwrap_or(config.store.database_path);
    let store = SqliteStore::open(&database)?;

    match cli.command {
        Command::SeedEvents { file } => {
            let content = std::fs::read_to_string(&file)?;
            let parsed: EventFile = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("{}: {e}", file.display()))?;
            let count = parsed.events.len();
            for entry in parsed.events {
                store.insert_event(entry.into()).await?;
            }
            println!("inserted {count} event(s) into {}", database.display());
        }
        Command::LoadRules { file } => {
            let count = store.load_rules_jsonl(&file).await?;
            println!("loaded {count} rule document(s) into {}", database.display());
        }
        Command::ListEvents => {
            for event in store.list_events().await? {
                println!(
                    "{:>4}  {}  {}",
                    event.id,
                    event.starts_at.to_rfc3339(),
                    event.title
                );
            }
        }
    }
    Ok(())
}
