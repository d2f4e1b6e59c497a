//! Source nodes (no audio inputs from outside the graph)

mod bus_return;
mod generator;

pub use bus_return::{BusReturn, BusReturnMessage};
pub use generator::{to_sample, FaultReader, GeneratorMessage, GeneratorUnit};
