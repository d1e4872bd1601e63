//! Gallery of known identities and their reference embeddings.
//!
//! The gallery is loaded once at startup and is read-only for the
//! lifetime of a recognition session.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery is empty, nothing to match against")]
    EmptyGallery,
    #[error("duplicate identity in gallery: {identity}")]
    DuplicateIdentity { identity: String },
    #[error("embedding for {identity} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
    #[error("embedding for {identity} is empty")]
    EmptyEmbedding { identity: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{identity:?} cannot be used as a gallery file name")]
    InvalidIdentity { identity: String },
    #[error("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },
}

impl GalleryError {
    /// Stable diagnostic code for CLI and log consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyGallery => "empty_gallery",
            Self::DuplicateIdentity { .. } => "duplicate_identity",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::EmptyEmbedding { .. } => "empty_embedding",
            Self::Io { .. } => "gallery_io",
            Self::Parse { .. } => "gallery_parse",
            Self::InvalidIdentity { .. } => "invalid_identity",
            Self::AlreadyExists { .. } => "identity_exists",
        }
    }
}

/// How to resolve two entries carrying the same identity label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail the load with [`GalleryError::DuplicateIdentity`].
    #[default]
    Reject,
    /// Keep the first entry, ignore later ones.
    KeepFirst,
    /// Later entries replace the embedding, in the slot of the first occurrence.
    KeepLast,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "keep-first" => Ok(Self::KeepFirst),
            "keep-last" => Ok(Self::KeepLast),
            other => Err(format!(
                "unknown duplicate policy {other:?} (expected reject, keep-first or keep-last)"
            )),
        }
    }
}

/// A known identity and its reference embedding.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: String,
    pub embedding: Embedding,
}

/// Ordered, validated set of gallery entries.
///
/// Order is load order and is what the matcher's tie-break relies on.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    entries: Vec<GalleryEntry>,
    dim: usize,
}

impl GalleryStore {
    /// Validate and take ownership of the loaded identities.
    ///
    /// All embeddings must share the first entry's dimensionality, including
    /// entries that the duplicate policy ends up discarding.
    pub fn load<I>(entries: I, policy: DuplicatePolicy) -> Result<Self, GalleryError>
    where
        I: IntoIterator<Item = (String, Embedding)>,
    {
        let mut store: Vec<GalleryEntry> = Vec::new();
        let mut dim: Option<usize> = None;

        for (identity, embedding) in entries {
            if embedding.dim() == 0 {
                return Err(GalleryError::EmptyEmbedding { identity });
            }
            let expected = *dim.get_or_insert(embedding.dim());
            if embedding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    identity,
                    expected,
                    actual: embedding.dim(),
                });
            }

            match store.iter_mut().find(|e| e.identity == identity) {
                None => store.push(GalleryEntry { identity, embedding }),
                Some(existing) => match policy {
                    DuplicatePolicy::Reject => {
                        return Err(GalleryError::DuplicateIdentity { identity });
                    }
                    DuplicatePolicy::KeepFirst => {
                        tracing::warn!(identity = %identity, "duplicate identity ignored");
                    }
                    DuplicatePolicy::KeepLast => {
                        tracing::warn!(identity = %identity, "duplicate identity replaces earlier entry");
                        existing.embedding = embedding;
                    }
                },
            }
        }

        let dim = dim.ok_or(GalleryError::EmptyGallery)?;
        tracing::debug!(entries = store.len(), dim, "gallery loaded");
        Ok(Self {
            entries: store,
            dim,
        })
    }

    /// All entries in stable load order.
    pub fn lookup_all(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Embedding dimensionality shared by every entry.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.as_str())
    }
}

/// On-disk encoding file: either `{"encoding": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum EncodingFile {
    Wrapped { encoding: Vec<f32> },
    Bare(Vec<f32>),
}

#[derive(Serialize)]
struct ReferenceFile<'a> {
    encoding: &'a [f32],
}

/// Parse one reference encoding, `{"encoding": [...]}` or a bare array.
pub fn parse_encoding(raw: &str) -> Result<Embedding, serde_json::Error> {
    let values = match serde_json::from_str::<EncodingFile>(raw)? {
        EncodingFile::Wrapped { encoding } => encoding,
        EncodingFile::Bare(values) => values,
    };
    Ok(Embedding::new(values))
}

/// Write `<dir>/<identity>.json` in the form [`load_known_identities`] reads.
///
/// The identity must be usable as a plain file stem. An existing file is
/// only replaced when `overwrite` is set.
pub fn write_reference(
    dir: &Path,
    identity: &str,
    embedding: &Embedding,
    overwrite: bool,
) -> Result<PathBuf, GalleryError> {
    let usable = !identity.is_empty()
        && !identity.starts_with('.')
        && !identity.contains(['/', '\\', '\0']);
    if !usable {
        return Err(GalleryError::InvalidIdentity {
            identity: identity.to_string(),
        });
    }
    if embedding.dim() == 0 {
        return Err(GalleryError::EmptyEmbedding {
            identity: identity.to_string(),
        });
    }

    let path = dir.join(format!("{identity}.json"));
    if path.exists() && !overwrite {
        return Err(GalleryError::AlreadyExists { path });
    }

    let body = serde_json::to_string(&ReferenceFile {
        encoding: embedding.values(),
    })
    .map_err(|source| GalleryError::Parse {
        path: path.clone(),
        source,
    })?;
    std::fs::create_dir_all(dir)
        .and_then(|()| std::fs::write(&path, body))
        .map_err(|source| GalleryError::Io {
            path: path.clone(),
            source,
        })?;

    tracing::info!(identity, path = %path.display(), dim = embedding.dim(), "reference encoding written");
    Ok(path)
}

/// Read `(identity, embedding)` pairs from a directory of `*.json` files.
///
/// The identity is the file stem. Files are visited in name order so the
/// resulting gallery order is reproducible across runs and machines.
pub fn load_known_identities(dir: &Path) -> Result<Vec<(String, Embedding)>, GalleryError> {
    let io_err = |source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut identities = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(identity) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
            tracing::warn!(path = %path.display(), "skipping file with non-UTF-8 name");
            continue;
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| GalleryError::Io {
            path: path.clone(),
            source,
        })?;
        let embedding = match parse_encoding(&raw) {
            Ok(embedding) => embedding,
            Err(source) => return Err(GalleryError::Parse { path, source }),
        };

        tracing::debug!(identity = %identity, dim = embedding.dim(), "read reference encoding");
        identities.push((identity, embedding));
    }

    Ok(identities)
}
