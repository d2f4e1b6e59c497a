//! Terminal node that pulls every sink.

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};

/// Takes every sink of the graph as input and does nothing with them.
///
/// The processor only renders what the terminal depends on, so making this
/// the terminal lets one `process()` call run the output, every bus send and
/// every analysis tap once each.
#[derive(Default)]
pub struct Collector;

impl AudioNode for Collector {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
    }

    fn num_inputs(&self) -> usize {
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        0
    }
}
