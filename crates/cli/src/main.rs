//! Clipdo CLI - inspect and manage clipboard/to-do storage.

use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipdo_core::{BackendKind, Session, StorageConfig, StorageEvent};
use clipdo_storage::{StorageCoordinator, SwitchOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipdo")]
#[command(about = "Clipboard manager and to-do storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory for every local medium and the config file
    #[arg(short, long, env = "CLIPDO_DATA_DIR", default_value = ".clipdo")]
    data_dir: PathBuf,

    /// Signed-in user id for cloud storage
    #[arg(long, env = "CLIPDO_USER_ID", requires = "access_token")]
    user_id: Option<String>,

    /// Access token for cloud storage
    #[arg(long, env = "CLIPDO_ACCESS_TOKEN", hide_env_values = true, requires = "user_id")]
    access_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Storage key
        key: String,
    },
    /// Store a JSON value under a key
    Set {
        /// Storage key
        key: String,
        /// JSON value (bare words are stored as strings)
        value: String,
    },
    /// Remove a key
    Remove {
        /// Storage key
        key: String,
    },
    /// Remove every key except storage preferences
    Clear,
    /// Print every key and value
    List,
    /// Move all data to another backend
    Switch {
        /// Target backend: cookie, local or cloud
        backend: BackendKind,
    },
    /// Show the active backend
    Status,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let config = StorageConfig::load(&cli.data_dir)
        .with_context(|| format!("Failed to load config from {}", cli.data_dir.display()))?;
    let session = cli
        .user_id
        .zip(cli.access_token)
        .map(|(user_id, token)| Session::new(user_id, token));

    let storage = StorageCoordinator::open(&config, session)
        .await
        .context("Failed to open storage")?;

    match cli.command {
        Commands::Get { key } => match storage.get_item(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(absent)"),
        },
        Commands::Set { key, value } => {
            storage
                .set_item(&key, &parse_value(&value))
                .await
                .with_context(|| format!("Failed to store {}", key))?;
            println!("Stored {}", key);
        }
        Commands::Remove { key } => {
            storage.remove_item(&key).await?;
            println!("Removed {}", key);
        }
        Commands::Clear => {
            storage.clear_all().await?;
            println!("Cleared all data (storage preferences kept)");
        }
        Commands::List => {
            let items = storage.snapshot().await?;
            println!("Items ({})", items.len());
            for (key, value) in items {
                println!("  {} = {}", key, value);
            }
        }
        Commands::Switch { backend } => {
            let mut events = storage.subscribe();
            match storage.change_backend(backend).await {
                Ok(SwitchOutcome::Unchanged) => println!("Already using {} storage", backend),
                Ok(SwitchOutcome::Switched { from, to, migrated }) => {
                    info!("Moved {} key(s)", migrated);
                    println!("Switched storage {} -> {}", from, to);
                }
                Err(e) => {
                    if let Ok(StorageEvent::SwitchFailed { reason, .. }) = events.try_recv() {
                        eprintln!("Storage switch failed: {}", reason);
                    }
                    return Err(e).context("Storage switch failed; previous backend kept");
                }
            }
        }
        Commands::Status => {
            let active = storage.active_backend().await?;
            println!("Active backend: {}", active);
            let preserved: Vec<&str> = storage.preserved_keys().iter().collect();
            println!("Preserved keys: {}", preserved.join(", "));
        }
    }

    Ok(())
}
