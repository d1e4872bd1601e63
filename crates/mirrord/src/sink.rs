//! Event sinks: log lines, a JSON-lines event log, and the shared state
//! served over D-Bus.

use chrono::{DateTime, Utc};
use mirror_core::{BoundingBox, Event, EventSink, Observation};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Events kept for `RecentEvents`.
pub const RECENT_EVENTS_CAPACITY: usize = 32;

/// Persisted / published form of an event.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub session: Uuid,
    pub identity: String,
    pub distance: f32,
    pub region: BoundingBox,
    pub seen_at: DateTime<Utc>,
}

impl EventRecord {
    fn new(session: Uuid, event: &Event) -> Self {
        Self {
            session,
            identity: event.identity.clone(),
            distance: event.distance,
            region: event.region,
            seen_at: Utc::now(),
        }
    }
}

/// Greets each recognized identity in the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&mut self, event: &Event) {
        tracing::info!(
            identity = %event.identity,
            distance = event.distance,
            x1 = event.region.x1,
            y1 = event.region.y1,
            x2 = event.region.x2,
            y2 = event.region.y2,
            "hello, {}",
            event.identity
        );
    }

    fn on_unmatched(&mut self, observation: &Observation, distance: f32) {
        tracing::debug!(
            distance,
            x1 = observation.region.x1,
            y1 = observation.region.y1,
            "unknown face"
        );
    }
}

/// Appends one JSON object per event to a file.
///
/// Write failures are logged and the session keeps running.
pub struct JsonlSink {
    session: Uuid,
    file: File,
}

impl JsonlSink {
    pub fn open(path: &Path, session: Uuid) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { session, file })
    }
}

impl EventSink for JsonlSink {
    fn on_event(&mut self, event: &Event) {
        let record = EventRecord::new(self.session, event);
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.file, "{line}"));
        if let Err(e) = written {
            tracing::warn!(error = %e, identity = %event.identity, "failed to append event log");
        }
    }
}

/// Lifecycle of the daemon's recognition session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Stopped,
    Failed { kind: String, message: String },
}

/// Session status shared between the engine thread and D-Bus handlers.
#[derive(Debug)]
pub struct DaemonState {
    pub session: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub events: u64,
    pub unmatched: u64,
    recent: VecDeque<EventRecord>,
}

impl DaemonState {
    pub fn new(session: Uuid) -> Self {
        Self {
            session,
            started_at: Utc::now(),
            state: SessionState::Running,
            events: 0,
            unmatched: 0,
            recent: VecDeque::with_capacity(RECENT_EVENTS_CAPACITY),
        }
    }

    fn push(&mut self, record: EventRecord) {
        if self.recent.len() == RECENT_EVENTS_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    /// Up to `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        self.recent.iter().rev().take(limit).cloned().collect()
    }
}

pub type SharedState = Arc<Mutex<DaemonState>>;

/// Lock the shared state, recovering from poisoning.
pub fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, DaemonState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Feeds counters and the recent-events ring buffer.
pub struct StateSink {
    state: SharedState,
}

impl StateSink {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl EventSink for StateSink {
    fn on_event(&mut self, event: &Event) {
        let mut state = lock(&self.state);
        let record = EventRecord::new(state.session, event);
        state.events += 1;
        state.push(record);
    }

    fn on_unmatched(&mut self, _observation: &Observation, _distance: f32) {
        lock(&self.state).unmatched += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::Embedding;
    use std::time::Instant;
    use tempfile::TempDir;

    fn event(identity: &str) -> Event {
        Event {
            identity: identity.to_string(),
            distance: 0.25,
            region: BoundingBox::new(40.0, 80.0, 140.0, 200.0),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let session = Uuid::new_v4();

        let mut sink = JsonlSink::open(&path, session).unwrap();
        sink.on_event(&event("alice"));
        sink.on_event(&event("bob"));
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["identity"], "alice");
        assert_eq!(lines[1]["identity"], "bob");
        assert_eq!(lines[0]["session"], session.to_string());
        assert_eq!(lines[0]["region"]["x2"], 140.0);
        assert!(lines[0]["seen_at"].is_string());
    }

    #[test]
    fn test_state_sink_ring_buffer() {
        let state: SharedState = Arc::new(Mutex::new(DaemonState::new(Uuid::new_v4())));
        let mut sink = StateSink::new(Arc::clone(&state));

        for i in 0..(RECENT_EVENTS_CAPACITY + 5) {
            sink.on_event(&event(&format!("person{i}")));
        }
        let unknown = Observation {
            region: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            embedding: Embedding::new(vec![0.0]),
        };
        sink.on_unmatched(&unknown, 0.9);

        let state = lock(&state);
        assert_eq!(state.events, (RECENT_EVENTS_CAPACITY + 5) as u64);
        assert_eq!(state.unmatched, 1);
        let recent = state.recent(3);
        let names: Vec<_> = recent.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(names, vec!["person36", "person35", "person34"]);
        assert_eq!(state.recent(100).len(), RECENT_EVENTS_CAPACITY);
    }

    #[test]
    fn test_session_state_json() {
        let failed = SessionState::Failed {
            kind: "capture_failure".into(),
            message: "device unplugged".into(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "capture_failure");
        assert_eq!(serde_json::to_value(SessionState::Running).unwrap()["state"], "running");
    }
}
