//! Mixer effect - sums every voice into the master bus

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};

/// Sums any number of inputs with equal weight.
///
/// Mono inputs are copied to every output channel; inputs with more channels
/// than the mixer have the extras ignored.
pub struct Mixer {
    channels: usize,
}

impl Mixer {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
        }
    }

    pub fn stereo() -> Self {
        Self::new(2)
    }

    /// Sum `inputs` into `outputs`.
    pub fn mix<'a>(inputs: impl Iterator<Item = &'a [Buffer]>, outputs: &mut [Buffer]) {
        outputs
            .iter_mut()
            .for_each(|b| b.iter_mut().for_each(|s| *s = 0.0));

        for buffers in inputs {
            let Some(last) = buffers.last() else {
                continue;
            };
            for (ch, out) in outputs.iter_mut().enumerate() {
                let src = buffers.get(ch).unwrap_or(last);
                out.iter_mut().zip(src.iter()).for_each(|(o, &i)| *o += i);
            }
        }
    }
}

impl AudioNode for Mixer {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        Self::mix(inputs.iter().map(|input| input.buffers()), outputs);
    }

    fn num_inputs(&self) -> usize {
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}
