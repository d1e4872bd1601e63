use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirror_core::{
    load_known_identities, parse_encoding, validate_threshold, write_reference, CancelToken,
    DuplicatePolicy, Event, EventSink, EuclideanMatcher, GalleryStore, Matcher,
    RecognitionConfig, RecognitionLoop, RecordedReducer, ReplaySource,
};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "mirror", about = "Smart mirror attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a gallery directory
    CheckGallery {
        /// Directory of <identity>.json reference encodings
        dir: PathBuf,
        /// reject, keep-first or keep-last
        #[arg(long, default_value = "reject")]
        duplicates: DuplicatePolicy,
    },
    /// Add an identity to a gallery from one reference image
    Enroll {
        #[arg(short, long)]
        gallery: PathBuf,
        /// Identity label; becomes <gallery>/<name>.json
        name: String,
        /// Image showing exactly one face
        image: PathBuf,
        /// Embedder helper command; the image path is appended
        #[arg(long, env = "MIRROR_EMBEDDER")]
        embedder: String,
        /// Replace an existing reference for this identity
        #[arg(long)]
        force: bool,
    },
    /// Match one encoding against a gallery
    Compare {
        #[arg(short, long)]
        gallery: PathBuf,
        /// JSON file holding {"encoding": [...]} or a bare array
        encoding: PathBuf,
        #[arg(short, long, default_value_t = mirror_core::matcher::DEFAULT_THRESHOLD)]
        threshold: f32,
    },
    /// Run the recognition loop over a recorded session
    Replay {
        #[arg(short, long)]
        gallery: PathBuf,
        /// JSON-lines recording, one frame per line
        recording: PathBuf,
        #[arg(long, default_value_t = mirror_core::matcher::DEFAULT_THRESHOLD)]
        threshold: f32,
        /// Seconds between two events for the same identity
        #[arg(long, default_value_t = 10.0)]
        cooldown: f32,
        /// Factor the recorded boxes were detected at
        #[arg(long, default_value_t = mirror_core::config::DEFAULT_DOWNSAMPLE_FACTOR)]
        downsample: f32,
    },
    /// Show daemon status
    Status,
    /// Show the most recent events recorded by the daemon
    Events {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Stop the daemon's recognition session
    Stop,
}

// Generates `AttendanceProxy`; only the async variant is used.
#[zbus::proxy(
    interface = "io.smartmirror.Attendance1",
    default_service = "io.smartmirror.Attendance1",
    default_path = "/io/smartmirror/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn recent_events(&self, limit: u32) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

/// A failure with a stable kind, printed as `{"error": kind, "message": ...}`.
struct Diagnostic {
    kind: &'static str,
    message: String,
}

impl Diagnostic {
    fn new(kind: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Diagnostic {
    fn from(err: anyhow::Error) -> Self {
        Self {
            kind: "error",
            message: format!("{err:#}"),
        }
    }
}

/// Prints each event as one JSON line.
struct PrintSink;

impl EventSink for PrintSink {
    fn on_event(&mut self, event: &Event) {
        println!(
            "{}",
            serde_json::json!({
                "identity": event.identity,
                "distance": event.distance,
                "region": event.region,
            })
        );
    }
}

fn load_gallery(dir: &Path, policy: DuplicatePolicy) -> Result<GalleryStore, Diagnostic> {
    let identities = load_known_identities(dir).map_err(|e| Diagnostic::new(e.kind(), e))?;
    GalleryStore::load(identities, policy).map_err(|e| Diagnostic::new(e.kind(), e))
}

fn check_gallery(dir: &Path, policy: DuplicatePolicy) -> Result<(), Diagnostic> {
    let gallery = load_gallery(dir, policy)?;
    let identities: Vec<&str> = gallery.identities().collect();
    println!(
        "{}",
        serde_json::json!({
            "entries": gallery.len(),
            "dim": gallery.dim(),
            "identities": identities,
        })
    );
    Ok(())
}

fn enroll(
    gallery_dir: &Path,
    name: &str,
    image: &Path,
    embedder: &str,
    force: bool,
) -> Result<(), Diagnostic> {
    let command: Vec<String> = embedder.split_whitespace().map(str::to_owned).collect();
    let Some((program, args)) = command.split_first() else {
        return Err(Diagnostic::new("no_embedder", "embedder command is empty"));
    };
    if !image.is_file() {
        return Err(Diagnostic::new(
            "image_not_found",
            format!("{} is not a file", image.display()),
        ));
    }

    let faces = mirror_hw::embed_image(program, args, image)
        .map_err(|e| Diagnostic::new(e.kind(), e))?;
    let embedding = mirror_hw::single_face(faces).map_err(|e| Diagnostic::new(e.kind(), e))?;

    // A new reference must fit the dimension of the gallery it joins.
    if let Ok(existing) = load_known_identities(gallery_dir) {
        let mismatch = existing
            .iter()
            .find(|(identity, e)| identity != name && e.dim() != embedding.dim());
        if let Some((identity, e)) = mismatch {
            return Err(Diagnostic::new(
                "dimension_mismatch",
                format!(
                    "new encoding has {} dimensions, {identity} has {}",
                    embedding.dim(),
                    e.dim()
                ),
            ));
        }
    }

    let path = write_reference(gallery_dir, name, &embedding, force)
        .map_err(|e| Diagnostic::new(e.kind(), e))?;
    println!(
        "{}",
        serde_json::json!({
            "identity": name,
            "dim": embedding.dim(),
            "path": path.display().to_string(),
        })
    );
    Ok(())
}

fn compare(gallery_dir: &Path, encoding: &Path, threshold: f32) -> Result<(), Diagnostic> {
    validate_threshold(threshold).map_err(|e| Diagnostic::new(e.kind(), e))?;
    let gallery = load_gallery(gallery_dir, DuplicatePolicy::Reject)?;

    let raw = std::fs::read_to_string(encoding)
        .with_context(|| format!("reading {}", encoding.display()))?;
    let probe = parse_encoding(&raw).map_err(|e| Diagnostic::new("invalid_encoding", e))?;

    let result = EuclideanMatcher
        .compare(&probe, gallery.lookup_all(), threshold)
        .map_err(|e| Diagnostic::new(e.kind(), e))?;
    println!(
        "{}",
        serde_json::json!({
            "identity": result.identity,
            "distance": result.distance,
            "threshold": threshold,
            "match": result.is_match(),
        })
    );
    Ok(())
}

fn replay(
    gallery_dir: &Path,
    recording: &Path,
    threshold: f32,
    cooldown: f32,
    downsample: f32,
) -> Result<(), Diagnostic> {
    let config = RecognitionConfig::new(threshold, cooldown, downsample)
        .map_err(|e| Diagnostic::new(e.kind(), e))?;
    let gallery = Arc::new(load_gallery(gallery_dir, DuplicatePolicy::Reject)?);

    let file = std::fs::File::open(recording)
        .with_context(|| format!("opening {}", recording.display()))?;
    let mut source = ReplaySource::new(BufReader::new(file), Instant::now());

    let mut session = RecognitionLoop::new(gallery, config);
    let report = session
        .run(&mut source, &mut RecordedReducer, &mut PrintSink, &CancelToken::new())
        .map_err(|e| Diagnostic::new(e.kind(), e))?;

    let stats = report.stats;
    eprintln!(
        "{}",
        serde_json::json!({
            "frames": stats.frames,
            "observations": stats.observations,
            "matches": stats.matches,
            "events": stats.events,
            "suppressed": stats.suppressed,
            "unmatched": stats.unmatched,
            "skipped": stats.skipped,
        })
    );
    Ok(())
}

async fn daemon_proxy(system: bool) -> Result<AttendanceProxy<'static>> {
    tracing::debug!(system, "connecting to mirrord");
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("mirrord is not reachable")
}

async fn run(cli: Cli) -> Result<(), Diagnostic> {
    match cli.command {
        Commands::CheckGallery { dir, duplicates } => check_gallery(&dir, duplicates),
        Commands::Enroll {
            gallery,
            name,
            image,
            embedder,
            force,
        } => enroll(&gallery, &name, &image, &embedder, force),
        Commands::Compare {
            gallery,
            encoding,
            threshold,
        } => compare(&gallery, &encoding, threshold),
        Commands::Replay {
            gallery,
            recording,
            threshold,
            cooldown,
            downsample,
        } => replay(&gallery, &recording, threshold, cooldown, downsample),
        Commands::Status => {
            let proxy = daemon_proxy(cli.system).await?;
            let status = proxy.status().await.map_err(|e| Diagnostic::new("dbus", e))?;
            println!("{status}");
            Ok(())
        }
        Commands::Events { limit } => {
            let proxy = daemon_proxy(cli.system).await?;
            let events = proxy
                .recent_events(limit)
                .await
                .map_err(|e| Diagnostic::new("dbus", e))?;
            println!("{events}");
            Ok(())
        }
        Commands::Stop => {
            let proxy = daemon_proxy(cli.system).await?;
            let stopped = proxy.stop().await.map_err(|e| Diagnostic::new("dbus", e))?;
            println!("{}", serde_json::json!({ "stopped": stopped }));
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(diag) => {
            println!(
                "{}",
                serde_json::json!({ "error": diag.kind, "message": diag.message })
            );
            ExitCode::FAILURE
        }
    }
}
