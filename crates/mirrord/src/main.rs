use anyhow::{Context, Result};
use mirror_core::{load_known_identities, CancelToken, EventSink, GalleryStore};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod dbus_interface;
mod engine;
mod sink;

use config::{BusKind, Config};
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::SessionSetup;
use mirror_hw::ProcessEmbedder;
use sink::{DaemonState, JsonlSink, LogSink, StateSink};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("mirrord starting");

    let config = Config::load()?;
    let recognition = config.recognition()?;
    let (program, args) = config.embedder_command()?;

    let identities = load_known_identities(&config.gallery_dir)
        .with_context(|| format!("loading gallery from {}", config.gallery_dir.display()))?;
    let gallery = Arc::new(GalleryStore::load(identities, config.duplicate_policy)?);
    tracing::info!(
        identities = gallery.len(),
        dim = gallery.dim(),
        dir = %config.gallery_dir.display(),
        "gallery loaded"
    );

    let session = Uuid::new_v4();
    let state = Arc::new(Mutex::new(DaemonState::new(session)));

    let mut sinks: Vec<Box<dyn EventSink + Send>> = vec![
        Box::new(LogSink),
        Box::new(StateSink::new(Arc::clone(&state))),
    ];
    if let Some(path) = &config.event_log {
        let jsonl = JsonlSink::open(path, session)
            .with_context(|| format!("opening event log {}", path.display()))?;
        sinks.push(Box::new(jsonl));
        tracing::info!(path = %path.display(), "event log enabled");
    }

    let scratch = std::env::temp_dir().join(format!("mirrord-{session}.png"));
    let setup = SessionSetup {
        camera_device: config.camera_device.clone(),
        capture_width: config.capture_width,
        capture_height: config.capture_height,
        warmup_frames: config.warmup_frames,
        recognition: recognition.clone(),
        embedder: ProcessEmbedder::new(program, args, scratch),
        sinks,
    };

    let cancel = CancelToken::new();
    let mut handle = engine::spawn_session(
        setup,
        Arc::clone(&gallery),
        Arc::clone(&state),
        cancel.clone(),
    )?;

    let service = AttendanceService::new(Arc::clone(&state), gallery, recognition, cancel);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus interface")?;

    tracing::info!(%session, bus = ?config.bus, "mirrord ready");

    let result = tokio::select! {
        result = handle.finished() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupt received; stopping session");
            handle.stop();
            handle.finished().await
        }
    };

    match result {
        Ok(report) => {
            tracing::info!(
                end = ?report.end,
                frames = report.stats.frames,
                events = report.stats.events,
                "mirrord shutting down"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "recognition session failed");
            Err(e.into())
        }
    }
}
