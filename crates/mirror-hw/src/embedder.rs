//! Frame reducer backed by an external face-embedding helper.
//!
//! Each usable frame is written to a scratch PNG and the helper is run with
//! the image path as its last argument. The helper prints one JSON object:
//!
//! ```text
//! {"faces": [{"box": [x1, y1, x2, y2], "encoding": [...]}]}
//! {"error": "..."}
//! ```
//!
//! Exit status 2 means no face was found.

use crate::frame::{Frame, FrameError};
use mirror_core::{Embedding, FaceRecord, FrameReducer, Observation};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Exit status the helper uses for "no face detected".
const EXIT_NO_FACE: i32 = 2;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("failed to write scratch frame: {0}")]
    Scratch(#[from] FrameError),
    #[error("failed to run embedder {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("embedder exited with {status}: {message}")]
    Failed { status: String, message: String },
    #[error("embedder reported: {0}")]
    Reported(String),
    #[error("unreadable embedder output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("no face found in the image")]
    NoFace,
    #[error("expected one face, found {0}")]
    MultipleFaces(usize),
}

impl EmbedderError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scratch(_) => "scratch_failure",
            Self::Spawn { .. } => "embedder_spawn",
            Self::Failed { .. } | Self::Reported(_) => "embedder_failure",
            Self::Output(_) => "embedder_output",
            Self::NoFace => "no_face",
            Self::MultipleFaces(_) => "multiple_faces",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Faces { faces: Vec<FaceRecord> },
    Error { error: String },
}

/// Runs the configured helper once per frame.
pub struct ProcessEmbedder {
    program: String,
    args: Vec<String>,
    scratch: PathBuf,
}

impl ProcessEmbedder {
    pub fn new(program: &str, args: &[String], scratch: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            scratch,
        }
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }
}

impl Drop for ProcessEmbedder {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.scratch);
    }
}

impl FrameReducer<Frame> for ProcessEmbedder {
    type Error = EmbedderError;

    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Observation>, EmbedderError> {
        if frame.is_dark {
            return Ok(Vec::new());
        }

        frame.write_image(&self.scratch)?;
        let observations = embed_image(&self.program, &self.args, &self.scratch)?;
        tracing::trace!(
            seq = frame.sequence,
            faces = observations.len(),
            "embedder finished"
        );
        Ok(observations)
    }
}

/// Run the helper once on an image file already on disk.
pub fn embed_image(
    program: &str,
    args: &[String],
    image: &Path,
) -> Result<Vec<Observation>, EmbedderError> {
    let output = Command::new(program)
        .args(args)
        .arg(image)
        .output()
        .map_err(|source| EmbedderError::Spawn {
            program: program.to_string(),
            source,
        })?;
    parse_output(output.status.code(), &output.stdout, &output.stderr)
}

/// The embedding of the only face in a reference image.
///
/// A reference must show exactly one person, so zero or several faces are
/// both refused.
pub fn single_face(observations: Vec<Observation>) -> Result<Embedding, EmbedderError> {
    let count = observations.len();
    let mut faces = observations.into_iter();
    match (faces.next(), count) {
        (None, _) => Err(EmbedderError::NoFace),
        (Some(face), 1) => Ok(face.embedding),
        (Some(_), n) => Err(EmbedderError::MultipleFaces(n)),
    }
}

/// Interpret the helper's exit status and stdout.
fn parse_output(
    code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Vec<Observation>, EmbedderError> {
    match code {
        Some(0) => {}
        Some(EXIT_NO_FACE) => return Ok(Vec::new()),
        other => {
            let status = other.map_or_else(|| "signal".to_string(), |c| format!("status {c}"));
            let message = match serde_json::from_slice::<Reply>(stdout) {
                Ok(Reply::Error { error }) => error,
                _ => String::from_utf8_lossy(stderr).trim().to_string(),
            };
            return Err(EmbedderError::Failed { status, message });
        }
    }

    match serde_json::from_slice::<Reply>(stdout)? {
        Reply::Faces { faces } => Ok(faces.into_iter().map(Observation::from).collect()),
        Reply::Error { error } => Err(EmbedderError::Reported(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::BoundingBox;

    #[test]
    fn test_parse_faces() {
        let stdout = br#"{"faces": [{"box": [4, 8, 20, 30], "encoding": [0.1, 0.2, 0.3]}]}"#;
        let observations = parse_output(Some(0), stdout, b"").unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].region, BoundingBox::new(4.0, 8.0, 20.0, 30.0));
        assert_eq!(observations[0].embedding.dim(), 3);
    }

    #[test]
    fn test_parse_no_faces() {
        let observations = parse_output(Some(0), br#"{"faces": []}"#, b"").unwrap();
        assert!(observations.is_empty());
    }

    #[test]
    fn test_no_face_exit_status() {
        let stdout = br#"{"error": "No face detected"}"#;
        assert!(parse_output(Some(2), stdout, b"").unwrap().is_empty());
    }

    #[test]
    fn test_reported_error_on_success_status() {
        let err = parse_output(Some(0), br#"{"error": "model missing"}"#, b"").unwrap_err();
        assert!(matches!(err, EmbedderError::Reported(ref m) if m == "model missing"));
    }

    #[test]
    fn test_failure_prefers_json_error() {
        let err = parse_output(Some(1), br#"{"error": "Processing error: bad image"}"#, b"trace")
            .unwrap_err();
        match err {
            EmbedderError::Failed { status, message } => {
                assert_eq!(status, "status 1");
                assert_eq!(message, "Processing error: bad image");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_failure_falls_back_to_stderr() {
        let err = parse_output(None, b"", b"Segmentation fault\n").unwrap_err();
        match err {
            EmbedderError::Failed { status, message } => {
                assert_eq!(status, "signal");
                assert_eq!(message, "Segmentation fault");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_single_face_accepts_one() {
        let stdout = br#"{"faces": [{"box": [4, 8, 20, 30], "encoding": [0.1, 0.2]}]}"#;
        let embedding = single_face(parse_output(Some(0), stdout, b"").unwrap()).unwrap();
        assert_eq!(embedding.values(), &[0.1, 0.2]);
    }

    #[test]
    fn test_single_face_rejects_none() {
        let faces = parse_output(Some(2), br#"{"error": "No face detected"}"#, b"").unwrap();
        let err = single_face(faces).unwrap_err();
        assert_eq!(err.kind(), "no_face");
    }

    #[test]
    fn test_single_face_rejects_several() {
        let stdout = br#"{"faces": [
            {"box": [0, 0, 10, 10], "encoding": [0.1, 0.2]},
            {"box": [20, 0, 30, 10], "encoding": [0.3, 0.4]}
        ]}"#;
        let err = single_face(parse_output(Some(0), stdout, b"").unwrap()).unwrap_err();
        assert!(matches!(err, EmbedderError::MultipleFaces(2)));
        assert_eq!(err.kind(), "multiple_faces");
    }

    #[test]
    fn test_embed_image_missing_program() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = embed_image("/nonexistent/embed-faces", &[], &dir.path().join("ref.png"))
            .unwrap_err();
        assert_eq!(err.kind(), "embedder_spawn");
    }

    #[test]
    fn test_garbage_output() {
        let err = parse_output(Some(0), b"Traceback (most recent call last)", b"").unwrap_err();
        assert!(matches!(err, EmbedderError::Output(_)));
    }

    #[test]
    fn test_dark_frame_skips_helper() {
        let dir = tempfile::TempDir::new().unwrap();
        // A program that cannot exist: reaching it would be a Spawn error.
        let mut embedder = ProcessEmbedder::new(
            "/nonexistent/embed-faces",
            &[],
            dir.path().join("frame.png"),
        );
        let frame = Frame::new(vec![0u8; 64], 8, 8, std::time::Instant::now(), 0);
        assert!(embedder.detect_and_embed(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut embedder = ProcessEmbedder::new(
            "/nonexistent/embed-faces",
            &[],
            dir.path().join("frame.png"),
        );
        let frame = Frame::new(vec![180u8; 64], 8, 8, std::time::Instant::now(), 0);
        let err = embedder.detect_and_embed(&frame).unwrap_err();
        assert!(matches!(err, EmbedderError::Spawn { .. }));
        assert!(embedder.scratch_path().exists());
    }
}
