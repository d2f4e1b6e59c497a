//! Session events and the state records they carry.
//!
//! Every change that crosses the network, goes into a recording, or drives a
//! participant is one [`SessionEvent`]. The wire form is one JSON object per
//! line with the event kind under `kind` and its data under `payload`.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Numeric roster identity of a participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    /// Name under which this participant's bus signal is visible to programs.
    pub fn input_name(self) -> String {
        format!("p{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Spatial placement of a participant's speaker, in normalized field coordinates.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Rotation in radians.
    pub angle: f64,
}

/// A location in an editor document.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub ch: u32,
}

/// One selection range; `anchor == head` is a bare cursor.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub head: Position,
}

/// What a remote participant's text view should show.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct EditorState {
    pub cursor: Position,
    pub selections: Vec<Selection>,
    pub content: String,
}

/// One existing participant in a [`Hello`] roster.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub code: String,
    pub pose: Pose,
}

/// Bootstrap sent to a peer when it joins.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub assigned_id: ParticipantId,
    pub roster: Vec<RosterEntry>,
    /// Seconds elapsed on the authoritative session clock.
    pub clock_elapsed: f64,
}

/// Discriminant of a [`SessionEvent`], used for logging and the recording format.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Hello,
    Join,
    Leave,
    Code,
    EditorState,
    SpeakerPose,
    Reset,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Hello => "hello",
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Code => "code",
            EventKind::EditorState => "editorState",
            EventKind::SpeakerPose => "speakerPose",
            EventKind::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// A replicated change to session state.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Full bootstrap for a joining peer.
    Hello(Hello),
    /// A peer joined; create a silent participant for it.
    Join { id: ParticipantId },
    /// A peer left; tear its participant down.
    Leave { id: ParticipantId },
    /// A participant ran new code.
    Code { id: ParticipantId, text: String },
    /// A participant's editor changed.
    EditorState { id: ParticipantId, state: EditorState },
    /// A participant's speaker moved.
    SpeakerPose { id: ParticipantId, pose: Pose },
    /// Re-zero the shared clock.
    Reset,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Hello(_) => EventKind::Hello,
            SessionEvent::Join { .. } => EventKind::Join,
            SessionEvent::Leave { .. } => EventKind::Leave,
            SessionEvent::Code { .. } => EventKind::Code,
            SessionEvent::EditorState { .. } => EventKind::EditorState,
            SessionEvent::SpeakerPose { .. } => EventKind::SpeakerPose,
            SessionEvent::Reset => EventKind::Reset,
        }
    }

    /// The participant this event is about, if any.
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            SessionEvent::Join { id }
            | SessionEvent::Leave { id }
            | SessionEvent::Code { id, .. }
            | SessionEvent::EditorState { id, .. }
            | SessionEvent::SpeakerPose { id, .. } => Some(*id),
            SessionEvent::Hello(_) | SessionEvent::Reset => None,
        }
    }

    /// Rewrite the participant id. The hub uses this to stamp the sender.
    pub fn with_participant(mut self, new_id: ParticipantId) -> Self {
        match &mut self {
            SessionEvent::Join { id }
            | SessionEvent::Leave { id }
            | SessionEvent::Code { id, .. }
            | SessionEvent::EditorState { id, .. }
            | SessionEvent::SpeakerPose { id, .. } => *id = new_id,
            SessionEvent::Hello(_) | SessionEvent::Reset => {}
        }
        self
    }

    /// Encode as one line of the wire protocol (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode one line of the wire protocol.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn code_event_wire_shape() {
        let event = SessionEvent::Code {
            id: ParticipantId(3),
            text: "sin(2*pi*440*t)".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"kind": "code", "payload": {"id": 3, "text": "sin(2*pi*440*t)"}})
        );
    }

    #[test]
    fn hello_uses_camel_case_fields() {
        let event = SessionEvent::Hello(Hello {
            assigned_id: ParticipantId(2),
            roster: vec![RosterEntry {
                id: ParticipantId(0),
                code: "0".into(),
                pose: Pose::default(),
            }],
            clock_elapsed: 12.5,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "hello");
        assert_eq!(value["payload"]["assignedId"], 2);
        assert_eq!(value["payload"]["clockElapsed"], 12.5);
        assert_eq!(value["payload"]["roster"][0]["code"], "0");
    }

    #[test]
    fn reset_has_no_payload() {
        let line = SessionEvent::Reset.to_line().unwrap();
        assert_eq!(line, r#"{"kind":"reset"}"#);
        assert_eq!(SessionEvent::from_line(&line).unwrap(), SessionEvent::Reset);
    }

    #[test]
    fn editor_state_kind_is_camel_case() {
        let event = SessionEvent::EditorState {
            id: ParticipantId(1),
            state: EditorState::default(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "editorState");
        assert_eq!(event.kind().to_string(), "editorState");
    }

    #[test]
    fn stamping_rewrites_only_participant_events() {
        let pose = SessionEvent::SpeakerPose {
            id: ParticipantId(9),
            pose: Pose { x: 0.1, y: 0.2, angle: 0.0 },
        };
        assert_eq!(
            pose.with_participant(ParticipantId(4)).participant(),
            Some(ParticipantId(4))
        );
        assert_eq!(SessionEvent::Reset.with_participant(ParticipantId(4)), SessionEvent::Reset);
    }
}
