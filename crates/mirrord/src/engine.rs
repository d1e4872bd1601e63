use crate::sink::{self, SessionState, SharedState};
use mirror_core::{
    CancelToken, EventSink, GalleryStore, RecognitionConfig, RecognitionLoop, SessionError,
    SessionReport,
};
use mirror_hw::{Camera, CameraError, ProcessEmbedder};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Camera(_) => "capture_failure",
            Self::Session(e) => e.kind(),
            Self::Spawn(_) | Self::ChannelClosed => "engine_failure",
        }
    }
}

/// Everything a live session needs besides the gallery.
pub struct SessionSetup {
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub warmup_frames: usize,
    pub recognition: RecognitionConfig,
    pub embedder: ProcessEmbedder,
    pub sinks: Vec<Box<dyn EventSink + Send>>,
}

/// Handle to the running session thread.
pub struct SessionHandle {
    cancel: CancelToken,
    done: oneshot::Receiver<Result<SessionReport, EngineError>>,
}

impl SessionHandle {
    /// Ask the loop to stop at the next frame boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session thread to finish. Cancel-safe.
    pub async fn finished(&mut self) -> Result<SessionReport, EngineError> {
        (&mut self.done)
            .await
            .map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the recognition session on a dedicated OS thread.
///
/// Opens the camera synchronously so a missing or busy device fails fast,
/// then hands it to the thread, which discards warmup frames and runs the
/// loop until cancelled or until capture fails. The camera is released
/// when the thread exits.
pub fn spawn_session(
    setup: SessionSetup,
    gallery: Arc<GalleryStore>,
    state: SharedState,
    cancel: CancelToken,
) -> Result<SessionHandle, EngineError> {
    let camera = Camera::open(&setup.camera_device, setup.capture_width, setup.capture_height)?;
    tracing::info!(
        device = %setup.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let (tx, rx) = oneshot::channel();
    let thread_cancel = cancel.clone();

    std::thread::Builder::new()
        .name("mirror-recognition".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let SessionSetup {
                warmup_frames,
                recognition,
                mut embedder,
                mut sinks,
                ..
            } = setup;

            let result = (|| -> Result<SessionReport, EngineError> {
                let mut stream = camera.stream()?;
                if warmup_frames > 0 {
                    tracing::info!(count = warmup_frames, "discarding warmup frames");
                    stream.discard(warmup_frames)?;
                }
                let mut session = RecognitionLoop::new(gallery, recognition);
                Ok(session.run(&mut stream, &mut embedder, &mut sinks, &thread_cancel)?)
            })();

            sink::lock(&state).state = match &result {
                Ok(_) => SessionState::Stopped,
                Err(e) => SessionState::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                },
            };
            let _ = tx.send(result);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(SessionHandle { cancel, done: rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let capture = EngineError::Camera(CameraError::CaptureFailed("dequeue".into()));
        assert_eq!(capture.kind(), "capture_failure");

        let reducer = EngineError::Session(SessionError::ReducerFailure(Box::new(
            std::io::Error::new(std::io::ErrorKind::Other, "embedder crashed"),
        )));
        assert_eq!(reducer.kind(), "reducer_failure");
        assert_eq!(EngineError::ChannelClosed.kind(), "engine_failure");
    }
}
