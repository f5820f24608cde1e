use anyhow::{Context, Result};
use checkpoint_core::registry;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod detection_loop;
mod engine;
mod helper;

use config::{BusKind, Config};
use dbus_interface::CheckpointService;
use detection_loop::DetectionLoop;
use engine::SourceOpener;
use helper::HelperExtractor;

const BUS_NAME: &str = "org.checkpoint.Checkpoint1";
const OBJECT_PATH: &str = "/org/checkpoint/Checkpoint1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("checkpointd starting");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    let bus = config.bus_kind()?;
    tracing::info!(
        source = %config.video_source,
        registry = %config.registry_path.display(),
        threshold = config.match_threshold,
        hold_ms = config.hold_ms,
        "configuration loaded"
    );

    let specs = registry::load_file(&config.registry_path)
        .with_context(|| format!("failed to load registry {}", config.registry_path.display()))?;
    tracing::info!(entries = specs.len(), "registry file read");

    let video_source = config.video_source.clone();
    let open_source: SourceOpener = Box::new(move || checkpoint_hw::open_source(&video_source));
    let extractor = HelperExtractor::new(config.extractor_command.clone(), config.runtime_dir.clone());
    let engine = engine::spawn_engine(open_source, Box::new(extractor))?;

    let detection = DetectionLoop::spawn(config.loop_config(), engine, specs);
    let service = CheckpointService::new(detection.control());

    let builder = match bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {bus:?} bus"))?;

    tracing::info!(bus = ?bus, name = BUS_NAME, "checkpointd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("checkpointd shutting down");
    detection.shutdown().await;

    Ok(())
}
