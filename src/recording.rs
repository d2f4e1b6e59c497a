//! Recording and replaying the session event stream.
//!
//! A recording document looks like
//!
//! ```json
//! {"players": [0, 3], "events": [[0.0, "code", {"id": 0, "text": "sin(2*pi*440*t)"}], [1.5, "reset", null]]}
//! ```
//!
//! with the local participant listed first and events as
//! `[elapsedSeconds, kind, payload]` triples.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::RecordingError;
use crate::protocol::{EventKind, ParticipantId, SessionEvent};

/// One event and when it passed through dispatch, in seconds since recording start.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub elapsed: f64,
    pub event: SessionEvent,
}

impl Serialize for RecordedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tagged = match serde_json::to_value(&self.event).map_err(S::Error::custom)? {
            Value::Object(map) => map,
            _ => return Err(S::Error::custom("session event is not an object")),
        };
        let payload = tagged.remove("payload").unwrap_or(Value::Null);
        (self.elapsed, self.event.kind(), payload).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordedEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (elapsed, kind, payload) = <(f64, EventKind, Value)>::deserialize(deserializer)?;
        let mut tagged = Map::new();
        tagged.insert("kind".into(), serde_json::to_value(kind).map_err(D::Error::custom)?);
        if !payload.is_null() {
            tagged.insert("payload".into(), payload);
        }
        let event = serde_json::from_value(Value::Object(tagged)).map_err(D::Error::custom)?;
        Ok(Self { elapsed, event })
    }
}

/// An exported session: who was there and what happened when.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Roster, local participant first.
    pub players: Vec<ParticipantId>,
    pub events: Vec<RecordedEvent>,
}

impl Recording {
    pub fn to_json(&self) -> Result<String, RecordingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, RecordingError> {
        let recording: Recording = serde_json::from_str(text)?;
        if recording.players.is_empty() {
            return Err(RecordingError::EmptyRoster);
        }
        Ok(recording)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| RecordingError::io(path, e))?;
        info!(path = %path.display(), events = self.events.len(), "recording saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RecordingError::io(path, e))?;
        Self::from_json(&text)
    }

    /// Offset of the last event.
    pub fn duration(&self) -> f64 {
        self.events
            .iter()
            .map(|e| e.elapsed)
            .fold(0.0, f64::max)
    }
}

/// Accumulates dispatched events while a recording is running.
#[derive(Debug)]
pub struct Recorder {
    started: Instant,
    events: Vec<RecordedEvent>,
    seen: Vec<ParticipantId>,
}

impl Recorder {
    /// Start recording now with `roster` already present.
    pub fn new(roster: impl IntoIterator<Item = ParticipantId>) -> Self {
        let mut recorder = Self {
            started: Instant::now(),
            events: Vec::new(),
            seen: Vec::new(),
        };
        for id in roster {
            recorder.note(id);
        }
        debug!(players = recorder.seen.len(), "recorder started");
        recorder
    }

    fn note(&mut self, id: ParticipantId) {
        if !self.seen.contains(&id) {
            self.seen.push(id);
        }
    }

    /// Seconds since the recording started.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Append `event` at the current offset. Hello bootstraps are not recorded.
    pub fn record(&mut self, event: &SessionEvent) {
        let elapsed = self.elapsed();
        self.push(elapsed, event);
    }

    /// Append `event` at offset zero, to describe the starting state.
    pub fn seed(&mut self, event: &SessionEvent) {
        self.push(0.0, event);
    }

    fn push(&mut self, elapsed: f64, event: &SessionEvent) {
        if event.kind() == EventKind::Hello {
            return;
        }
        if let Some(id) = event.participant() {
            self.note(id);
        }
        // Offsets never go backwards, whatever the session clock does.
        let floor = self.events.last().map_or(0.0, |e| e.elapsed);
        self.events.push(RecordedEvent {
            elapsed: elapsed.max(floor),
            event: event.clone(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stop and produce the recording, listing `local` first.
    pub fn finish(self, local: ParticipantId) -> Recording {
        let mut players = vec![local];
        let mut others: Vec<_> = self.seen.into_iter().filter(|&id| id != local).collect();
        others.sort();
        players.extend(others);
        info!(players = players.len(), events = self.events.len(), "recording stopped");
        Recording {
            players,
            events: self.events,
        }
    }
}

/// Schedules a recording's events relative to a start instant.
#[derive(Debug)]
pub struct Playback {
    start: Instant,
    pending: VecDeque<RecordedEvent>,
    fired: usize,
}

impl Playback {
    /// Events are ordered by timestamp; ties keep their recorded order.
    pub fn new(events: Vec<RecordedEvent>, start: Instant) -> Self {
        let mut events = events;
        events.sort_by(|a, b| a.elapsed.total_cmp(&b.elapsed));
        Self {
            start,
            pending: events.into(),
            fired: 0,
        }
    }

    fn due_at(&self, event: &RecordedEvent) -> Instant {
        let offset = Duration::try_from_secs_f64(event.elapsed.max(0.0)).unwrap_or_default();
        self.start + offset
    }

    /// Remove and return every event due at `now`, in order.
    pub fn due(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut due = Vec::new();
        while let Some(next) = self.pending.front() {
            if self.due_at(next) > now {
                break;
            }
            if let Some(next) = self.pending.pop_front() {
                due.push(next.event);
            }
        }
        self.fired += due.len();
        due
    }

    /// When the next event fires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|e| self.due_at(e))
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn fired(&self) -> usize {
        self.fired
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Hello, Pose};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn code(id: u32, text: &str) -> SessionEvent {
        SessionEvent::Code {
            id: ParticipantId(id),
            text: text.into(),
        }
    }

    #[test]
    fn events_serialize_as_triples() {
        let recording = Recording {
            players: vec![ParticipantId(2), ParticipantId(0)],
            events: vec![
                RecordedEvent {
                    elapsed: 0.5,
                    event: code(2, "t"),
                },
                RecordedEvent {
                    elapsed: 1.25,
                    event: SessionEvent::Reset,
                },
            ],
        };
        let value: Value = serde_json::from_str(&recording.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "players": [2, 0],
                "events": [
                    [0.5, "code", {"id": 2, "text": "t"}],
                    [1.25, "reset", null],
                ],
            })
        );
        let back = Recording::from_json(&value.to_string()).unwrap();
        assert_eq!(back, recording);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let text = r#"{"players": [0], "events": [[0.0, "dance", {}]]}"#;
        assert!(matches!(Recording::from_json(text), Err(RecordingError::Json(_))));
    }

    #[test]
    fn empty_roster_is_rejected() {
        let text = r#"{"players": [], "events": []}"#;
        assert!(matches!(Recording::from_json(text), Err(RecordingError::EmptyRoster)));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.kb");
        let recording = Recording {
            players: vec![ParticipantId(0)],
            events: vec![RecordedEvent {
                elapsed: 0.0,
                event: SessionEvent::SpeakerPose {
                    id: ParticipantId(0),
                    pose: Pose { x: 0.25, y: -0.1, angle: 0.5 },
                },
            }],
        };
        recording.save(&path).unwrap();
        assert_eq!(Recording::load(&path).unwrap(), recording);
        assert!(matches!(
            Recording::load(dir.path().join("missing.kb")),
            Err(RecordingError::Io { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recorder_timestamps_and_roster() {
        let mut recorder = Recorder::new([ParticipantId(4)]);
        recorder.seed(&code(4, "0"));
        tokio::time::advance(Duration::from_millis(500)).await;
        recorder.record(&code(7, "t"));
        recorder.record(&SessionEvent::Hello(Hello {
            assigned_id: ParticipantId(4),
            roster: vec![],
            clock_elapsed: 0.0,
        }));
        tokio::time::advance(Duration::from_millis(250)).await;
        recorder.record(&SessionEvent::Reset);

        let recording = recorder.finish(ParticipantId(4));
        assert_eq!(recording.players, vec![ParticipantId(4), ParticipantId(7)]);
        let times: Vec<f64> = recording.events.iter().map(|e| e.elapsed).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.75]);
        assert_eq!(recording.duration(), 0.75);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_fires_in_timestamp_order() {
        let events = vec![
            RecordedEvent { elapsed: 1.0, event: code(0, "b") },
            RecordedEvent { elapsed: 0.5, event: code(0, "a") },
            RecordedEvent { elapsed: 1.0, event: code(0, "c") },
        ];
        let start = Instant::now();
        let mut playback = Playback::new(events, start);
        assert!(playback.due(start).is_empty());
        assert_eq!(playback.next_deadline(), Some(start + Duration::from_millis(500)));

        let first = playback.due(start + Duration::from_millis(600));
        assert_eq!(first, vec![code(0, "a")]);
        let rest = playback.due(start + Duration::from_secs(1));
        assert_eq!(rest, vec![code(0, "b"), code(0, "c")]);
        assert!(playback.is_finished());
        assert_eq!(playback.fired(), 3);
        assert_eq!(playback.next_deadline(), None);
    }
}
