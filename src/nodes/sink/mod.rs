//! Sink nodes (no audio outputs)

mod analysis_tap;
mod collector;
#[cfg(feature = "cpal_sink")]
mod cpal_sink;
mod ring_sink;

pub use analysis_tap::{analysis_tap, TapReader};
pub use collector::Collector;
#[cfg(feature = "cpal_sink")]
pub use cpal_sink::CpalSink;
pub use ring_sink::RingSink;
