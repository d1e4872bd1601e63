//! Recognition loop: frame → observations → matches → debounced events.
//!
//! Frames are processed strictly one at a time. Every observation of a
//! frame is matched and debounced before the next frame is requested, so
//! the debounce gate needs no synchronization here.

use crate::config::RecognitionConfig;
use crate::debounce::DebounceGate;
use crate::gallery::GalleryStore;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::{Event, Observation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame capture failed: {0}")]
    CaptureFailure(#[source] BoxError),
    #[error("frame reducer failed: {0}")]
    ReducerFailure(#[source] BoxError),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CaptureFailure(_) => "capture_failure",
            Self::ReducerFailure(_) => "reducer_failure",
        }
    }
}

/// A frame as delivered by a [`FrameSource`].
pub trait CapturedFrame: Sized {
    /// Capture time, used as "now" for debouncing.
    fn captured_at(&self) -> Instant;

    /// Spatially reduced copy used for detection and embedding.
    fn downsample(&self, factor: f32) -> Self;
}

/// Source of frames for a session (camera, recording, ...).
pub trait FrameSource {
    type Frame: CapturedFrame;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Next frame, or `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, Self::Error>;
}

/// Turns a frame into detected regions and their embeddings.
///
/// Regions are in the coordinates of the frame that was passed in.
pub trait FrameReducer<F> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect_and_embed(&mut self, frame: &F) -> Result<Vec<Observation>, Self::Error>;
}

/// Consumer of recognition output.
pub trait EventSink {
    fn on_event(&mut self, event: &Event);

    /// Called for observations that matched nobody. Never touches debounce state.
    fn on_unmatched(&mut self, _observation: &Observation, _distance: f32) {}
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn on_event(&mut self, event: &Event) {
        (**self).on_event(event);
    }

    fn on_unmatched(&mut self, observation: &Observation, distance: f32) {
        (**self).on_unmatched(observation, distance);
    }
}

impl<S: EventSink> EventSink for Vec<S> {
    fn on_event(&mut self, event: &Event) {
        for sink in self.iter_mut() {
            sink.on_event(event);
        }
    }

    fn on_unmatched(&mut self, observation: &Observation, distance: f32) {
        for sink in self.iter_mut() {
            sink.on_unmatched(observation, distance);
        }
    }
}

/// Cooperative stop signal, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Running counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub observations: u64,
    pub matches: u64,
    pub events: u64,
    pub suppressed: u64,
    pub unmatched: u64,
    pub skipped: u64,
}

/// Outcome of processing one frame's observations.
#[derive(Debug, Clone, Default)]
pub struct FrameSummary {
    pub events: Vec<Event>,
    pub suppressed: usize,
    pub unmatched: usize,
    pub skipped: usize,
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfStream,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub stats: SessionStats,
}

/// One recognition session: gallery, tuning, and the session's debounce state.
pub struct RecognitionLoop<M = EuclideanMatcher> {
    gallery: Arc<GalleryStore>,
    matcher: M,
    gate: DebounceGate,
    config: RecognitionConfig,
    stats: SessionStats,
}

impl RecognitionLoop<EuclideanMatcher> {
    pub fn new(gallery: Arc<GalleryStore>, config: RecognitionConfig) -> Self {
        Self::with_matcher(gallery, config, EuclideanMatcher)
    }
}

impl<M: Matcher> RecognitionLoop<M> {
    pub fn with_matcher(gallery: Arc<GalleryStore>, config: RecognitionConfig, matcher: M) -> Self {
        Self {
            gate: DebounceGate::new(config.cooldown()),
            gallery,
            matcher,
            config,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn gate(&self) -> &DebounceGate {
        &self.gate
    }

    /// Match and debounce one frame's observations, in the order given.
    ///
    /// Regions must already be in original-frame coordinates. An observation
    /// whose embedding does not fit the gallery is skipped.
    pub fn process_observations<S>(
        &mut self,
        observations: Vec<Observation>,
        now: Instant,
        sink: &mut S,
    ) -> FrameSummary
    where
        S: EventSink + ?Sized,
    {
        let mut summary = FrameSummary::default();
        self.stats.observations += observations.len() as u64;

        for observation in observations {
            let result = match self.matcher.compare(
                &observation.embedding,
                self.gallery.lookup_all(),
                self.config.threshold(),
            ) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(error = %err, kind = err.kind(), "skipping observation");
                    summary.skipped += 1;
                    self.stats.skipped += 1;
                    continue;
                }
            };

            let Some(identity) = result.identity else {
                tracing::debug!(distance = result.distance, "unmatched face");
                summary.unmatched += 1;
                self.stats.unmatched += 1;
                sink.on_unmatched(&observation, result.distance);
                continue;
            };
            self.stats.matches += 1;

            if !self.gate.should_emit(&identity, now) {
                tracing::debug!(identity = %identity, distance = result.distance, "sighting suppressed");
                summary.suppressed += 1;
                self.stats.suppressed += 1;
                continue;
            }

            tracing::info!(identity = %identity, distance = result.distance, "identity recognized");
            let event = Event {
                identity,
                distance: result.distance,
                region: observation.region,
                timestamp: now,
            };
            sink.on_event(&event);
            self.stats.events += 1;
            summary.events.push(event);
        }

        summary
    }

    /// Reduce, match and debounce one frame.
    ///
    /// With a downsample factor below 1 the reducer sees a reduced copy and
    /// the regions it reports are mapped back to the original frame.
    pub fn process_frame<F, R, S>(
        &mut self,
        frame: &F,
        reducer: &mut R,
        sink: &mut S,
    ) -> Result<FrameSummary, SessionError>
    where
        F: CapturedFrame,
        R: FrameReducer<F> + ?Sized,
        S: EventSink + ?Sized,
    {
        let factor = self.config.downsample_factor();
        self.stats.frames += 1;

        let reduced = if factor < 1.0 {
            let reduced = frame.downsample(factor);
            reducer.detect_and_embed(&reduced)
        } else {
            reducer.detect_and_embed(frame)
        };
        let mut observations = reduced.map_err(|e| SessionError::ReducerFailure(Box::new(e)))?;

        if factor < 1.0 {
            for observation in &mut observations {
                observation.region = observation.region.rescale(factor);
            }
        }

        Ok(self.process_observations(observations, frame.captured_at(), sink))
    }

    /// Drive the session until the stream ends, the token is cancelled, or
    /// a capture or reducer failure occurs. Failures are not retried.
    pub fn run<Src, R, S>(
        &mut self,
        source: &mut Src,
        reducer: &mut R,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<SessionReport, SessionError>
    where
        Src: FrameSource + ?Sized,
        R: FrameReducer<Src::Frame> + ?Sized,
        S: EventSink + ?Sized,
    {
        tracing::info!(
            gallery = self.gallery.len(),
            threshold = self.config.threshold(),
            cooldown_secs = self.config.cooldown().as_secs_f32(),
            downsample_factor = self.config.downsample_factor(),
            "recognition session started"
        );

        let end = loop {
            if cancel.is_cancelled() {
                break SessionEnd::Cancelled;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break SessionEnd::EndOfStream,
                Err(e) => {
                    tracing::error!(error = %e, "capture failed; ending session");
                    return Err(SessionError::CaptureFailure(Box::new(e)));
                }
            };

            self.process_frame(&frame, reducer, sink)?;
        };

        let stats = self.stats;
        tracing::info!(
            end = ?end,
            frames = stats.frames,
            events = stats.events,
            suppressed = stats.suppressed,
            unmatched = stats.unmatched,
            skipped = stats.skipped,
            "recognition session ended"
        );
        Ok(SessionReport { end, stats })
    }
}
