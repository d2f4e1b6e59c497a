//! Bus return: the read side of the shared cross-reference bus.

use dasp_graph::{Buffer, Input};
use rtrb::Consumer;

use crate::channels::{Channel, CAPACITY};
use crate::node::{AudioNode, ProcessContext};

/// Messages to control the bus return
pub enum BusReturnMessage {
    /// Start reading `channel` from `consumer`, replacing any previous reader.
    Connect {
        channel: Channel,
        consumer: Consumer<f32>,
    },
    /// Stop reading `channel`; it outputs silence from now on.
    Disconnect { channel: Channel },
}

/// Source with one output buffer per bus slot.
///
/// Each connected slot is fed by a ring that the slot owner's sink fills with
/// the block it just rendered. The return pops exactly one block per slot per
/// processed block, and every generator depends on it, so what a generator
/// reads is always its peers' previous block. Slots without a full block
/// waiting read silence.
pub struct BusReturn {
    readers: [Option<Consumer<f32>>; CAPACITY],
}

impl BusReturn {
    pub fn new() -> Self {
        Self {
            readers: Default::default(),
        }
    }
}

impl Default for BusReturn {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for BusReturn {
    type Message = BusReturnMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = BusReturnMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                BusReturnMessage::Connect { channel, consumer } => {
                    self.readers[channel.index()] = Some(consumer);
                }
                BusReturnMessage::Disconnect { channel } => {
                    self.readers[channel.index()] = None;
                }
            }
        }

        for (reader, out) in self.readers.iter_mut().zip(outputs.iter_mut()) {
            match reader {
                Some(consumer) if consumer.slots() >= out.len() => {
                    for sample in out.iter_mut() {
                        *sample = consumer.pop().unwrap_or(0.0);
                    }
                }
                _ => out.iter_mut().for_each(|s| *s = 0.0),
            }
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        CAPACITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    fn ctx() -> ProcessContext {
        ProcessContext {
            sample_rate: 48_000,
            buffer_size: Buffer::LEN,
        }
    }

    #[test]
    fn pops_one_block_per_connected_slot() {
        let mut bus = BusReturn::new();
        let (mut producer, consumer) = RingBuffer::new(Buffer::LEN * 4);
        for i in 0..Buffer::LEN * 2 {
            producer.push(i as f32).unwrap();
        }
        let ch = Channel::new(5).unwrap();
        let mut outputs = vec![Buffer::SILENT; CAPACITY];

        bus.process(
            &ctx(),
            std::iter::once(BusReturnMessage::Connect { channel: ch, consumer }),
            &[],
            &mut outputs,
        );
        assert_eq!(outputs[5][0], 0.0);
        assert_eq!(outputs[5][63], 63.0);
        assert!(outputs[4].iter().all(|&s| s == 0.0));

        bus.process(&ctx(), std::iter::empty(), &[], &mut outputs);
        assert_eq!(outputs[5][0], 64.0);

        // Nothing left: silence, not a partial block.
        producer.push(1.0).unwrap();
        bus.process(&ctx(), std::iter::empty(), &[], &mut outputs);
        assert!(outputs[5].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn disconnect_silences_slot() {
        let mut bus = BusReturn::new();
        let (mut producer, consumer) = RingBuffer::new(Buffer::LEN * 2);
        for _ in 0..Buffer::LEN * 2 {
            producer.push(0.5).unwrap();
        }
        let ch = Channel::new(0).unwrap();
        let mut outputs = vec![Buffer::SILENT; CAPACITY];
        bus.process(
            &ctx(),
            [
                BusReturnMessage::Connect { channel: ch, consumer },
                BusReturnMessage::Disconnect { channel: ch },
            ]
            .into_iter(),
            &[],
            &mut outputs,
        );
        assert!(outputs[0].iter().all(|&s| s == 0.0));
    }
}
