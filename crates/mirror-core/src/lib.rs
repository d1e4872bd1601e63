//! mirror-core: Face matching and debounce engine for the smart mirror.
//!
//! Consumes face embeddings produced by an external embedder, matches them
//! against a fixed gallery of known identities, and reports each identity
//! at most once per cool-down window.

pub mod config;
pub mod debounce;
pub mod gallery;
pub mod matcher;
pub mod recognition;
pub mod replay;
pub mod types;

pub use config::{validate_threshold, ConfigError, RecognitionConfig, RecognitionOptions};
pub use debounce::{DebounceGate, DebounceState, SharedDebounceGate};
pub use gallery::{
    load_known_identities, parse_encoding, write_reference, DuplicatePolicy, GalleryEntry,
    GalleryError, GalleryStore,
};
pub use matcher::{EuclideanMatcher, MatchError, Matcher};
pub use recognition::{
    CancelToken, CapturedFrame, EventSink, FrameReducer, FrameSource, FrameSummary,
    RecognitionLoop, SessionEnd, SessionError, SessionReport, SessionStats,
};
pub use replay::{FaceRecord, RecordedReducer, ReplayFrame, ReplaySource};
pub use types::{BoundingBox, Embedding, Event, MatchResult, Observation};
