//! Effect nodes (inputs → outputs)

mod gain;
mod mixer;
mod spatializer;

pub use gain::{volume_to_gain, Gain, GainMessage, VOLUME_RANGE_DB};
pub use mixer::Mixer;
pub use spatializer::{pose_gains, Spatializer, SpatializerMessage};
