//! lounge-ntfy CLI - manage a relay user's ntfy notification settings.
//!
//! This is the operator entry point. See the `lounge_ntfy` library for the
//! notification engine and listener registry the relay embeds.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lounge_ntfy::{ConfigStore, HostConfig, NotificationEngine, NtfyNotifier, SetOutcome};

/// Env var directing logs to a file instead of stderr.
const LOG_FILE_ENV: &str = "LOUNGE_NTFY_LOG_FILE";

// CLI
#[derive(Parser)]
#[command(name = "lounge-ntfy")]
#[command(version)]
#[command(about = "ntfy push notifications for IRC relay users")]
struct Cli {
    /// Relay user whose configuration to operate on
    #[arg(long, short)]
    user: String,

    /// Storage root (defaults to LOUNGE_NTFY_STORAGE_DIR, then the platform config dir)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the user's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Send a test notification with the current configuration
    Test,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a global setting (e.g. notification.topic)
    Set {
        /// Setting key
        key: String,
        /// Value; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },
    /// Clear a global setting
    Remove {
        /// Setting key
        key: String,
    },
    /// Print the configuration and any validation warnings
    Print,
    /// Per-network settings
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Set a per-network setting (e.g. routing.notifyOnPrivateMessages)
    Set {
        /// Network id
        network_id: String,
        /// Setting key
        key: String,
        /// Value
        value: String,
    },
    /// Remove a per-network setting
    Remove {
        /// Network id
        network_id: String,
        /// Setting key
        key: String,
    },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file at {path}"))?;
        builder
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .format_timestamp_secs();
    }

    builder.init();
    Ok(())
}

fn report(outcome: SetOutcome) {
    match &outcome {
        SetOutcome::Applied => println!("{outcome}"),
        SetOutcome::Rejected(reason) => eprintln!("{reason}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    let storage_dir = HostConfig::storage_dir(cli.storage_dir.as_deref())?;
    let host = HostConfig::load(&storage_dir)?;
    let store = ConfigStore::open(&storage_dir)
        .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Set { key, value } => {
                report(store.set_global(user, &key, Some(&value.join(" ")))?);
            }
            ConfigAction::Remove { key } => {
                report(store.set_global(user, &key, None)?);
            }
            ConfigAction::Print => {
                let loaded = store.load(user)?;
                for line in loaded.display_lines() {
                    println!("{line}");
                }
                for error in &loaded.errors {
                    println!("Warning: {error}");
                }
            }
            ConfigAction::Network { action } => match action {
                NetworkAction::Set {
                    network_id,
                    key,
                    value,
                } => {
                    report(store.set_per_network(user, &key, &network_id, Some(&value))?);
                }
                NetworkAction::Remove { network_id, key } => {
                    report(store.set_per_network(user, &key, &network_id, None)?);
                }
            },
        },
        Commands::Test => {
            let notifier = NtfyNotifier::new(host.request_timeout())?;
            let engine = NotificationEngine::new(Arc::new(store), Arc::new(notifier), host);

            match engine.send_test_notification(user).await {
                Ok(()) => println!("Test notification sent"),
                Err(reason) => anyhow::bail!("Test notification failed: {reason}"),
            }
        }
    }

    Ok(())
}
