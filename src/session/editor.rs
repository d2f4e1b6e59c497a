//! The text surface a participant types into.

use crate::protocol::{EditorState, Position, Selection};

/// A text-editing widget, as far as the session is concerned.
///
/// The session reads the document when the participant runs it and on every
/// sync tick, and writes to it when a remote or replayed participant changes.
pub trait EditorSurface: Send {
    fn content(&self) -> String;
    fn cursor(&self) -> Position;
    fn selections(&self) -> Vec<Selection>;

    fn set_value(&mut self, content: &str);
    fn set_cursor(&mut self, cursor: Position);
    fn set_selections(&mut self, selections: &[Selection]);

    /// Everything the sync loop compares and sends.
    fn snapshot(&self) -> EditorState {
        EditorState {
            cursor: self.cursor(),
            selections: self.selections(),
            content: self.content(),
        }
    }

    /// Mirror a remote participant's editor.
    fn apply(&mut self, state: &EditorState) {
        self.set_value(&state.content);
        self.set_cursor(state.cursor);
        self.set_selections(&state.selections);
    }
}

/// In-memory editor used by headless sessions and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextBuffer {
    content: String,
    cursor: Position,
    selections: Vec<Selection>,
}

impl TextBuffer {
    pub fn new(content: impl Into<String>) -> Self {
        let mut buffer = Self::default();
        buffer.set_value(&content.into());
        buffer
    }

    /// Position just past the last character.
    pub fn end(&self) -> Position {
        let line = self.content.matches('\n').count() as u32;
        let last = self.content.rsplit('\n').next().unwrap_or("");
        Position {
            line,
            ch: last.chars().count() as u32,
        }
    }
}

impl EditorSurface for TextBuffer {
    fn content(&self) -> String {
        self.content.clone()
    }

    fn cursor(&self) -> Position {
        self.cursor
    }

    fn selections(&self) -> Vec<Selection> {
        self.selections.clone()
    }

    /// Replaces the document and parks the cursor at its end, like a fresh load.
    fn set_value(&mut self, content: &str) {
        self.content = content.to_string();
        let end = self.end();
        self.cursor = end;
        self.selections = vec![Selection {
            anchor: end,
            head: end,
        }];
    }

    fn set_cursor(&mut self, cursor: Position) {
        self.cursor = cursor;
    }

    fn set_selections(&mut self, selections: &[Selection]) {
        self.selections = selections.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_moves_cursor_to_end() {
        let buffer = TextBuffer::new("x = 1,\nsin(t)");
        assert_eq!(buffer.cursor(), Position { line: 1, ch: 6 });
        assert_eq!(buffer.selections().len(), 1);
    }

    #[test]
    fn apply_mirrors_a_snapshot() {
        let mut source = TextBuffer::new("t");
        source.set_cursor(Position { line: 0, ch: 0 });
        let mut mirror = TextBuffer::default();
        mirror.apply(&source.snapshot());
        assert_eq!(mirror, source);
    }
}
