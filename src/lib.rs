//! kilobeat - collaborative live-coded audio
//!
//! Each participant writes a short expression that is evaluated once per
//! sample. Participants hear each other through a shared bus that delays
//! every signal by exactly one block, so any program may read any other,
//! including itself, without a cycle in the graph.
//!
//! Layers, bottom up:
//! - [`program`] compiles and evaluates expressions in a sandbox
//! - [`nodes`] and [`AudioGraph`] render blocks with message-passing control
//! - [`Router`] wires units, the bus, spatialization and the master mix
//! - [`Session`] applies [`SessionEvent`]s, records and replays them
//! - [`net`] relays events between peers through a hub
//! - [`driver`] runs a session against real time
//!
//! Design principles carried through the audio side:
//! - Each graph has a fixed sample rate (from device or explicit)
//! - Nodes receive parameters via message ring buffers, not shared state
//! - No Arc, no locks on the audio thread

extern crate alloc;

mod channels;
mod clock;
mod error;
mod graph;
mod node;
mod recording;
mod router;

pub mod config;
#[cfg(feature = "cpal_sink")]
mod device;
pub mod driver;
pub mod net;
pub mod nodes;
pub mod program;
pub mod protocol;
pub mod session;

pub use channels::{Channel, ChannelAllocator, CAPACITY as BUS_CAPACITY};
pub use clock::SessionClock;
pub use config::KilobeatConfig;
#[cfg(feature = "cpal_sink")]
pub use device::CpalDevice;
#[cfg(feature = "cpal_sink")]
pub use error::AudioDeviceError;
pub use error::{
    ChannelExhausted, CompileError, ConfigError, EvalFault, NetworkError, RecordingError,
    SessionError,
};
pub use graph::{AudioGraph, NodeHandle};
pub use node::{AudioNode, NodeId, ProcessContext};
pub use protocol::{ParticipantId, Pose, SessionEvent};
pub use recording::{Playback, RecordedEvent, Recorder, Recording};
pub use router::{Router, BUS_RING_BLOCKS, DEFAULT_TAP_CAPACITY};
pub use session::Session;
