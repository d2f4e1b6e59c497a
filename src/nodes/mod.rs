//! Built-in audio nodes.
//!
//! ## Sources ([`source`])
//! - [`GeneratorUnit`] - renders one participant's compiled program
//! - [`BusReturn`] - replays the previous block of every bus slot
//!
//! ## Effects ([`effect`])
//! - [`Spatializer`] - pans a voice by its speaker pose
//! - [`Mixer`] - sums every voice
//! - [`Gain`] - master volume with smoothing
//!
//! ## Sinks ([`sink`])
//! - [`RingSink`] - writes blocks into a ring (bus slots, offline output)
//! - [`analysis_tap`] / [`TapReader`] - raw unit output for scopes
//! - [`Collector`] - graph terminal that pulls every sink
//! - [`CpalSink`] - system audio device (requires `cpal_sink` feature)

pub mod effect;
pub mod sink;
pub mod source;

pub use effect::{pose_gains, volume_to_gain, Gain, GainMessage, Mixer, Spatializer, SpatializerMessage};
pub use sink::{analysis_tap, Collector, RingSink, TapReader};
pub use source::{to_sample, BusReturn, BusReturnMessage, FaultReader, GeneratorMessage, GeneratorUnit};

#[cfg(feature = "cpal_sink")]
pub use sink::CpalSink;
