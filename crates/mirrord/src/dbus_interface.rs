use crate::sink::{self, SessionState, SharedState};
use mirror_core::{CancelToken, GalleryStore, RecognitionConfig};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "io.smartmirror.Attendance1";
pub const OBJECT_PATH: &str = "/io/smartmirror/Attendance1";

/// D-Bus control interface for the attendance daemon.
///
/// Bus name: io.smartmirror.Attendance1
/// Object path: /io/smartmirror/Attendance1
pub struct AttendanceService {
    state: SharedState,
    gallery: Arc<GalleryStore>,
    recognition: RecognitionConfig,
    cancel: CancelToken,
}

impl AttendanceService {
    pub fn new(
        state: SharedState,
        gallery: Arc<GalleryStore>,
        recognition: RecognitionConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            state,
            gallery,
            recognition,
            cancel,
        }
    }

    fn status_json(&self) -> serde_json::Value {
        let state = sink::lock(&self.state);
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": state.session.to_string(),
            "started_at": state.started_at.to_rfc3339(),
            "session_state": state.state,
            "events": state.events,
            "unmatched": state.unmatched,
            "gallery_size": self.gallery.len(),
            "threshold": self.recognition.threshold(),
            "cooldown_seconds": self.recognition.cooldown().as_secs_f32(),
            "downsample_factor": self.recognition.downsample_factor(),
            "stop_requested": self.cancel.is_cancelled(),
        })
    }
}

fn to_fdo<E: std::fmt::Display>(e: E) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "io.smartmirror.Attendance1")]
impl AttendanceService {
    /// Session status and counters as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }

    /// The `limit` most recent events, newest first, as a JSON array.
    async fn recent_events(&self, limit: u32) -> zbus::fdo::Result<String> {
        let recent = sink::lock(&self.state).recent(limit as usize);
        serde_json::to_string(&recent).map_err(to_fdo)
    }

    /// Gallery identities in match order, as a JSON array.
    async fn gallery(&self) -> zbus::fdo::Result<String> {
        let identities: Vec<&str> = self.gallery.identities().collect();
        serde_json::to_string(&serde_json::json!({
            "dim": self.gallery.dim(),
            "identities": identities,
        }))
        .map_err(to_fdo)
    }

    /// Stop the recognition session. Returns false if it was not running.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        let running = sink::lock(&self.state).state == SessionState::Running;
        if running && !self.cancel.is_cancelled() {
            tracing::info!("stop requested over D-Bus");
            self.cancel.cancel();
            return Ok(true);
        }
        Ok(false)
    }
}
