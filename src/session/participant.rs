//! One voice plus one code slot.

use core::fmt;

use crate::protocol::{EditorState, ParticipantId, Pose};

use super::editor::{EditorSurface, TextBuffer};

/// Code every participant starts with.
pub const DEFAULT_CODE: &str = "0";

/// Whether a participant is driven from this host or mirrored from a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

/// Session-side state of a participant.
///
/// The running generator, its channel and its spatializer live in the
/// [`Router`](crate::Router) under the same id.
pub struct Participant {
    id: ParticipantId,
    locality: Locality,
    /// Code as last run, which may differ from what the editor shows.
    pub(crate) code: String,
    pub(crate) pose: Pose,
    pub(crate) editor: Box<dyn EditorSurface>,
    pub(crate) last_editor: Option<EditorState>,
    pub(crate) last_pose: Option<Pose>,
    pub(crate) last_error: Option<String>,
}

impl Participant {
    pub fn new(id: ParticipantId, locality: Locality) -> Self {
        Self::with_editor(id, locality, Box::new(TextBuffer::new(DEFAULT_CODE)))
    }

    pub fn with_editor(id: ParticipantId, locality: Locality, editor: Box<dyn EditorSurface>) -> Self {
        Self {
            id,
            locality,
            code: DEFAULT_CODE.to_string(),
            pose: Pose::default(),
            editor,
            last_editor: None,
            last_pose: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Message of the most recent compile error or runtime fault, cleared by a good run.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn editor(&self) -> &dyn EditorSurface {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> &mut dyn EditorSurface {
        self.editor.as_mut()
    }

    /// Editor snapshot if it differs from the last one sent, recording it as sent.
    ///
    /// Equality is field-wise over cursor, selections and content, so two
    /// editors showing the same text with selections listed in a different
    /// order count as different; a change that leaves every field equal is
    /// never sent.
    pub(crate) fn take_editor_change(&mut self) -> Option<EditorState> {
        let snapshot = self.editor.snapshot();
        if self.last_editor.as_ref() == Some(&snapshot) {
            return None;
        }
        self.last_editor = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Pose if it differs from the last one sent, recording it as sent.
    pub(crate) fn take_pose_change(&mut self) -> Option<Pose> {
        if self.last_pose == Some(self.pose) {
            return None;
        }
        self.last_pose = Some(self.pose);
        Some(self.pose)
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("locality", &self.locality)
            .field("code", &self.code)
            .field("pose", &self.pose)
            .finish_non_exhaustive()
    }
}
