//! Error types shared across the crate.
//!
//! Faults are layered so that a broken program never unwinds past the
//! participant that owns it: [`CompileError`] is returned before anything
//! touches the graph, [`EvalFault`] is raised inside a generator unit and
//! travels back to the control thread through a ring buffer, and the network
//! and recording layers have their own types.

use std::path::PathBuf;

use thiserror::Error;

use crate::channels::CAPACITY;
use crate::protocol::ParticipantId;

/// A program could not be turned into a generator unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The source is empty or only whitespace.
    #[error("empty program")]
    Empty,

    /// The source did not parse.
    #[error("syntax error at offset {offset} near {near:?}")]
    Syntax {
        /// Byte offset of the first character that could not be consumed.
        offset: usize,
        /// A short excerpt of the source starting at `offset`.
        near: String,
    },

    /// A name that is neither a variable, a constant, a function, nor a live input.
    #[error("unknown name `{0}`")]
    UnknownName(String),

    /// A function was called with the wrong number of arguments.
    #[error("`{name}` takes {expected} argument(s), got {found}")]
    Arity {
        /// Function name.
        name: String,
        /// Human readable expected count (`"1"`, `"at least 1"`, ...).
        expected: &'static str,
        /// Number of arguments found.
        found: usize,
    },

    /// Left-hand side of an assignment is not a scratch variable.
    #[error("cannot assign to `{0}`")]
    NotAssignable(String),

    /// A literal oscillator slot outside the accumulator bank.
    #[error("oscillator slot {slot} out of range (0..{max})")]
    OscillatorSlot {
        /// The slot used in the source.
        slot: f64,
        /// Number of slots.
        max: usize,
    },

    /// Syntax that parses but has no meaning in this dialect.
    #[error("unsupported expression: {0}")]
    Unsupported(String),

    /// The source exceeds the maximum program length.
    #[error("program is {len} bytes, limit is {max}")]
    TooLong {
        /// Source length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// Brackets nest deeper than the parser allows.
    #[error("brackets nest deeper than {max}")]
    TooDeep {
        /// Limit.
        max: usize,
    },

    /// The expression tree is deeper than the evaluator allows.
    #[error("expression nests deeper than {max} operators")]
    TooComplex {
        /// Limit.
        max: usize,
    },
}

/// A fault raised while a generator unit evaluates its program.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum EvalFault {
    /// A computed oscillator slot fell outside the accumulator bank.
    #[error("oscillator slot {index} out of range")]
    OscillatorSlot {
        /// The evaluated slot expression.
        index: f64,
    },
}

/// Every bus slot is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all {capacity} bus channels are in use")]
pub struct ChannelExhausted {
    /// Fixed bus capacity.
    pub capacity: usize,
}

impl Default for ChannelExhausted {
    fn default() -> Self {
        Self { capacity: CAPACITY }
    }
}

/// Connection failures. Any of these drops the session back to offline mode.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The TCP connection could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting took longer than the configured timeout.
    #[error("connection to {addr} timed out")]
    Timeout {
        /// Address that was dialed.
        addr: String,
    },

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// Framing failed (line too long, socket error while reading).
    #[error("transport error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// A line could not be decoded as a session event.
    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Binding a listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Recording export/import failures.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// The document is not valid recording JSON.
    #[error("malformed recording: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing the recording file failed.
    #[error("recording file '{path}': {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A recording needs at least the local participant.
    #[error("recording has no players")]
    EmptyRoster,
}

impl RecordingError {
    /// Create an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordingError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value in config file '{path}': {message}")]
    Invalid { path: PathBuf, message: String },
}

/// The audio device could not be opened.
#[cfg(feature = "cpal_sink")]
#[derive(Debug, Error)]
pub enum AudioDeviceError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("could not query output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("could not build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("could not start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format {0}")]
    UnsupportedFormat(String),

    #[error("failed to spawn audio thread: {0}")]
    Thread(std::io::Error),

    #[error("audio thread exited before the stream started")]
    StreamGone,
}

/// Session-level failures returned to the caller of a control operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation conflicts with playback, recording or an open connection.
    #[error("session busy: {0}")]
    Busy(&'static str),

    /// The operation is only available while offline.
    #[error("only available while offline")]
    OfflineOnly,

    /// No participant with this id exists.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// No preset with this name.
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),

    /// Compilation failed for a participant's code.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Network failure.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Recording failure.
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn compile_error_display() {
        let err = CompileError::Arity {
            name: "atan2".to_string(),
            expected: "2",
            found: 1,
        };
        assert_eq!(err.to_string(), "`atan2` takes 2 argument(s), got 1");
        assert_eq!(
            CompileError::UnknownName("q".into()).to_string(),
            "unknown name `q`"
        );
    }

    #[test]
    fn channel_exhausted_defaults_to_bus_capacity() {
        let err = ChannelExhausted::default();
        assert_eq!(err.capacity, CAPACITY);
        assert_eq!(err.to_string(), "all 8 bus channels are in use");
    }

    #[test]
    fn recording_io_exposes_source() {
        let err = RecordingError::io(
            "/tmp/x.kb",
            std::io::Error::new(std::io::ErrorKind::NotFound, "mock"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/x.kb"));
    }

    #[test]
    fn session_error_wraps_compile_error_transparently() {
        let err: SessionError = CompileError::Empty.into();
        assert_eq!(err.to_string(), "empty program");
    }
}
