//! Nearest-neighbour matching of a probe embedding against the gallery.

use crate::gallery::GalleryEntry;
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

/// Default Euclidean threshold, calibrated for 128-d dlib-style encodings.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Distances within this epsilon of the minimum count as ties.
pub const TIE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding has {actual} dimensions, gallery expects {expected}")]
    EmbeddingShapeMismatch { expected: usize, actual: usize },
}

impl MatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmbeddingShapeMismatch { .. } => "embedding_shape_mismatch",
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbour matcher with a deterministic tie-break.
///
/// The minimum distance is compared against `threshold` (inclusive) and is
/// always the reported distance. On a match, the identity is the earliest
/// entry in gallery order whose distance lies within [`TIE_EPSILON`] of
/// that minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let distances = gallery
            .iter()
            .map(|entry| {
                probe
                    .euclidean_distance(&entry.embedding)
                    .ok_or(MatchError::EmbeddingShapeMismatch {
                        expected: entry.embedding.dim(),
                        actual: probe.dim(),
                    })
            })
            .collect::<Result<Vec<f32>, _>>()?;

        // The minimum decides match or no match and is what gets reported.
        // The epsilon only picks which identity a near-tie resolves to.
        let min = distances.iter().copied().fold(f32::INFINITY, f32::min);
        let identity = if min <= threshold {
            distances
                .iter()
                .position(|&d| d <= min + TIE_EPSILON)
                .map(|idx| gallery[idx].identity.clone())
        } else {
            None
        };

        Ok(MatchResult {
            identity,
            distance: min,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            identity: name.to_string(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_exact_match() {
        let gallery = vec![entry("alice", vec![1.0, 0.0]), entry("bob", vec![0.0, 1.0])];
        let probe = Embedding::new(vec![0.0, 1.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("bob"));
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_nearest_entry_wins_regardless_of_position() {
        let gallery = vec![
            entry("decoy1", vec![0.0, 1.0, 0.0]),
            entry("decoy2", vec![0.0, 0.0, 1.0]),
            entry("match", vec![0.9, 0.1, 0.0]),
        ];
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("match"));
    }

    #[test]
    fn test_no_match_still_reports_distance() {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![3.0, 4.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        assert!(!result.is_match());
        assert!((result.distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![0.5, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.5).unwrap();
        assert_eq!(result.identity.as_deref(), Some("alice"));
        assert_eq!(result.distance, 0.5);

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.49).unwrap();
        assert!(result.identity.is_none());
    }

    #[test]
    fn test_tie_break_prefers_earlier_entry() {
        let gallery = vec![
            entry("first", vec![1.0, 0.0]),
            entry("second", vec![-1.0, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        for _ in 0..10 {
            let result = EuclideanMatcher.compare(&probe, &gallery, 1.0).unwrap();
            assert_eq!(result.identity.as_deref(), Some("first"));
        }

        let reversed = vec![gallery[1].clone(), gallery[0].clone()];
        let result = EuclideanMatcher.compare(&probe, &reversed, 1.0).unwrap();
        assert_eq!(result.identity.as_deref(), Some("second"));
    }

    #[test]
    fn test_near_tie_within_epsilon_prefers_earlier_entry() {
        let gallery = vec![
            entry("first", vec![0.5 + 1e-7]),
            entry("second", vec![0.5]),
        ];
        let probe = Embedding::new(vec![0.0]);
        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_near_tie_above_threshold_does_not_hide_match() {
        let gallery = vec![
            entry("first", vec![0.6000005]),
            entry("second", vec![0.6]),
        ];
        let face = Embedding::new(vec![0.0]);
        let result = EuclideanMatcher.compare(&face, &gallery, 0.6).unwrap();
        assert!(result.is_match());
        assert_eq!(result.identity.as_deref(), Some("first"));
        assert_eq!(result.distance, 0.6);
    }

    #[test]
    fn test_reports_minimum_distance_on_near_tie() {
        let gallery = vec![
            entry("first", vec![0.5 + 1e-7]),
            entry("second", vec![0.5]),
        ];
        let face = Embedding::new(vec![0.0]);
        let result = EuclideanMatcher.compare(&face, &gallery, 0.6).unwrap();
        assert_eq!(result.distance, 0.5);

        let result = EuclideanMatcher.compare(&face, &gallery, 0.4).unwrap();
        assert!(result.identity.is_none());
        assert_eq!(result.distance, 0.5);
    }

    #[test]
    fn test_deterministic() {
        let gallery = vec![entry("alice", vec![0.1, 0.2, 0.3]), entry("bob", vec![0.3, 0.2, 0.1])];
        let probe = Embedding::new(vec![0.2, 0.2, 0.2]);
        let a = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        let b = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_mismatch() {
        let gallery = vec![entry("alice", vec![1.0, 0.0])];
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let err = EuclideanMatcher.compare(&probe, &gallery, 0.6).unwrap_err();
        assert_eq!(
            err,
            MatchError::EmbeddingShapeMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(err.kind(), "embedding_shape_mismatch");
    }

    #[test]
    fn test_empty_gallery_slice() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &[], 0.6).unwrap();
        assert!(!result.is_match());
        assert_eq!(result.distance, f32::INFINITY);
    }
}
