//! Ring buffer sink

use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::trace;

use crate::node::{AudioNode, ProcessContext};

/// A sink that pushes whole blocks of audio into an rtrb ring buffer.
///
/// Multi-channel blocks are written interleaved. A block that does not fit is
/// dropped as a whole, so the reader never sees a torn block. Used for the
/// write side of each bus slot, for analysis taps and for offline output.
pub struct RingSink {
    producer: Producer<f32>,
    channels: usize,
    dropped: u64,
}

impl RingSink {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            dropped: 0,
        }
    }

    pub fn mono(producer: Producer<f32>) -> Self {
        Self::new(producer, 1)
    }

    pub fn stereo(producer: Producer<f32>) -> Self {
        Self::new(producer, 2)
    }

    /// A sink together with the reading end of a ring holding `blocks` blocks.
    pub fn with_blocks(blocks: usize, channels: usize) -> (Self, Consumer<f32>) {
        let channels = channels.max(1);
        let (producer, consumer) = RingBuffer::new(blocks.max(1) * Buffer::LEN * channels);
        (Self::new(producer, channels), consumer)
    }

    /// Free sample slots
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Blocks dropped because the reader fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Write one block; returns `false` if it was dropped.
    pub fn write(&mut self, buffers: &[Buffer]) -> bool {
        let Some(first) = buffers.first() else {
            return false;
        };
        let frames = first.len();
        let channels = self.channels;
        let chunk = match self.producer.write_chunk_uninit(frames * channels) {
            Ok(chunk) => chunk,
            Err(_) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "ring sink full, block dropped");
                return false;
            }
        };
        let interleaved = (0..frames).flat_map(|i| {
            (0..channels).map(move |ch| buffers[ch.min(buffers.len() - 1)][i])
        });
        chunk.fill_from_iter(interleaved);
        true
    }
}

impl AudioNode for RingSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        if let Some(input) = inputs.first() {
            self.write(input.buffers());
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Buffer {
        let mut b = Buffer::SILENT;
        b.iter_mut().enumerate().for_each(|(i, s)| *s = i as f32);
        b
    }

    #[test]
    fn interleaves_and_upmixes_mono() {
        let (mut sink, mut consumer) = RingSink::with_blocks(2, 2);
        assert!(sink.write(&[ramp()]));
        assert_eq!(consumer.slots(), Buffer::LEN * 2);
        let first: Vec<f32> = (0..4).map(|_| consumer.pop().unwrap()).collect();
        assert_eq!(first, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn full_ring_drops_whole_blocks() {
        let (mut sink, consumer) = RingSink::with_blocks(1, 1);
        assert!(sink.write(&[ramp()]));
        assert!(!sink.write(&[ramp()]));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(consumer.slots(), Buffer::LEN);
    }

    #[test]
    fn nothing_to_write() {
        let (mut sink, consumer) = RingSink::with_blocks(1, 1);
        assert!(!sink.write(&[]));
        assert!(consumer.is_empty());
    }
}
