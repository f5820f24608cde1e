use std::time::Duration;

use anyhow::{Context, Result};
use checkpoint_core::{EntrySummary, Snapshot};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[zbus::proxy(
    interface = "org.checkpoint.Checkpoint1",
    default_service = "org.checkpoint.Checkpoint1",
    default_path = "/org/checkpoint/Checkpoint1"
)]
trait Checkpoint {
    async fn start(&self) -> zbus::Result<bool>;
    async fn stop(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_registry(&self) -> zbus::Result<String>;
}

/// Payload of the `Status` method.
#[derive(Deserialize)]
struct StatusReply {
    version: String,
    snapshot: Snapshot,
}

#[derive(Parser)]
#[command(name = "checkpoint", about = "Control the checkpoint face detection daemon")]
struct Cli {
    /// Bus the daemon is published on
    #[arg(long, value_enum, default_value_t = Bus::Session)]
    bus: Bus,

    /// Print raw JSON instead of a summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bus {
    Session,
    System,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current detection state
    Status,
    /// Resume detection
    Start,
    /// Suspend detection
    Stop,
    /// List registry entries and whether they enrolled
    Registry,
    /// Print the status line whenever it changes
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = match cli.bus {
        Bus::Session => zbus::Connection::session().await,
        Bus::System => zbus::Connection::system().await,
    }
    .context("failed to connect to D-Bus")?;
    tracing::debug!(bus = ?cli.bus, "connected");
    let proxy = CheckpointProxy::new(&conn)
        .await
        .context("checkpointd is not reachable")?;

    match cli.command {
        Commands::Status => {
            let raw = proxy.status().await?;
            if cli.json {
                println!("{raw}");
            } else {
                let reply: StatusReply = serde_json::from_str(&raw).context("unexpected status reply")?;
                tracing::debug!(version = %reply.version, "daemon version");
                print_status(&reply.snapshot);
            }
        }
        Commands::Start => {
            if proxy.start().await? {
                println!("Detection started");
            } else {
                println!("Detection cannot start yet (models or registry still loading, or load failed)");
            }
        }
        Commands::Stop => {
            if proxy.stop().await? {
                println!("Detection stopped");
            } else {
                println!("Detection was not running");
            }
        }
        Commands::Registry => {
            let raw = proxy.list_registry().await?;
            if cli.json {
                println!("{raw}");
            } else {
                let entries: Vec<EntrySummary> =
                    serde_json::from_str(&raw).context("unexpected registry reply")?;
                print_registry(&entries);
            }
        }
        Commands::Watch { interval_ms } => {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(50)));
            let mut last = String::new();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        let raw = proxy.status().await?;
                        let reply: StatusReply = serde_json::from_str(&raw)?;
                        let line = status_line(&reply.snapshot);
                        if line != last {
                            println!("{line}");
                            last = line;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn status_line(snapshot: &Snapshot) -> String {
    let Snapshot { state, status, .. } = snapshot;
    match snapshot.countdown {
        Some(secs) => format!("[{state}] {status} (resuming in {secs}s)"),
        None => format!("[{state}] {status}"),
    }
}

fn print_status(snapshot: &Snapshot) {
    println!("{}", status_line(snapshot));
    println!("  identities loaded: {}", snapshot.registry_loaded);
    if let Some(matched) = &snapshot.matched {
        let frame = matched
            .frame_sequence
            .map_or_else(|| "?".to_string(), |seq| seq.to_string());
        println!(
            "  matched: {} (distance {:.3}, frame {frame}) at {}",
            matched.display_name, matched.distance, matched.confirmed_at
        );
    }
}

fn print_registry(entries: &[EntrySummary]) {
    if entries.is_empty() {
        println!("No registry entries");
        return;
    }
    for entry in entries {
        let mark = if entry.enrolled { "enrolled" } else { "FAILED" };
        println!("{:>4}  {:<24} {mark}", entry.id, entry.display_name);
    }
}
