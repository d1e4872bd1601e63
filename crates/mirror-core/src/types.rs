use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Face region in frame coordinates, as two corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Map a region found on a frame reduced by `reduction_factor` back to
    /// the original frame: every coordinate is divided by the factor.
    pub fn rescale(&self, reduction_factor: f32) -> Self {
        Self {
            x1: self.x1 / reduction_factor,
            y1: self.y1 / reduction_factor,
            x2: self.x2 / reduction_factor,
            y2: self.y2 / reduction_factor,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// Face embedding vector (128-dimensional for the reference encoder).
///
/// Embeddings are only ever compared by distance, never for equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`, or `None` when the dimensions differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One detected face within a single frame.
#[derive(Debug, Clone)]
pub struct Observation {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Result of matching one observed embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity of the nearest gallery entry, if it lies within the threshold.
    pub identity: Option<String>,
    /// Distance to the nearest gallery entry, reported for non-matches too.
    pub distance: f32,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// A confirmed sighting that passed the debounce gate.
#[derive(Debug, Clone)]
pub struct Event {
    pub identity: String,
    pub distance: f32,
    /// Region in original-frame coordinates.
    pub region: BoundingBox,
    pub timestamp: Instant,
}
