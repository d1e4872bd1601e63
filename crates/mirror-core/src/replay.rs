//! Recorded sessions in JSON-lines form.
//!
//! One frame per line:
//!
//! ```text
//! {"t": 0.0, "faces": [{"box": [x1, y1, x2, y2], "encoding": [...]}]}
//! ```
//!
//! `t` is seconds since the start of the recording. Boxes are in detection
//! coordinates, i.e. on the reduced frame the recorder embedded.

use crate::recognition::{CapturedFrame, FrameReducer, FrameSource};
use crate::types::{BoundingBox, Embedding, Observation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::io::BufRead;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}: invalid frame time {t}")]
    InvalidTime { line: usize, t: f64 },
}

/// One face as exchanged with embedder tools and stored in recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    #[serde(rename = "box")]
    pub region: [f32; 4],
    pub encoding: Vec<f32>,
}

impl From<FaceRecord> for Observation {
    fn from(face: FaceRecord) -> Self {
        Observation {
            region: BoundingBox::from(face.region),
            embedding: Embedding::new(face.encoding),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    t: f64,
    #[serde(default)]
    faces: Vec<FaceRecord>,
}

/// A recorded frame: its capture time and the faces found on it.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub captured_at: Instant,
    pub observations: Vec<Observation>,
}

impl CapturedFrame for ReplayFrame {
    fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Recordings already hold detection-space boxes, so there is nothing to reduce.
    fn downsample(&self, _factor: f32) -> Self {
        self.clone()
    }
}

/// Frame source reading a recording line by line.
pub struct ReplaySource<R> {
    reader: R,
    start: Instant,
    line: usize,
    buf: String,
}

impl<R: BufRead> ReplaySource<R> {
    /// Frame times are placed relative to `start`.
    pub fn new(reader: R, start: Instant) -> Self {
        Self {
            reader,
            start,
            line: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    type Frame = ReplayFrame;
    type Error = ReplayError;

    fn next_frame(&mut self) -> Result<Option<ReplayFrame>, ReplayError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let trimmed = self.buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: FrameRecord =
                serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
                    line: self.line,
                    source,
                })?;
            let invalid_time = ReplayError::InvalidTime {
                line: self.line,
                t: record.t,
            };
            let captured_at = match Duration::try_from_secs_f64(record.t) {
                Ok(offset) => self.start.checked_add(offset).ok_or(invalid_time)?,
                Err(_) => return Err(invalid_time),
            };

            return Ok(Some(ReplayFrame {
                captured_at,
                observations: record.faces.into_iter().map(Observation::from).collect(),
            }));
        }
    }
}

/// Reducer for recordings: hands back the faces stored with each frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordedReducer;

impl FrameReducer<ReplayFrame> for RecordedReducer {
    type Error = Infallible;

    fn detect_and_embed(&mut self, frame: &ReplayFrame) -> Result<Vec<Observation>, Infallible> {
        Ok(frame.observations.clone())
    }
}
