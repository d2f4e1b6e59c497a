//! Core node trait and context types.

use dasp_graph::{Buffer, Input};

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g. 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples per buffer, always [`Buffer::LEN`]
    pub buffer_size: usize,
}

/// Identifier of a node within an [`AudioGraph`](crate::graph::AudioGraph).
///
/// Ids are never reused, so a stale id simply stops resolving once its node
/// has been removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// A unit of audio processing.
///
/// Nodes are sources (generator units, the bus return), effects (spatializer,
/// mixer, gain) or sinks (ring sinks, the device output, the collector).
///
/// # Message-Based Parameters
///
/// Nodes never share mutable state with the control thread. Parameter updates
/// arrive as messages, drained at the start of `process()`:
///
/// ```
/// use kilobeat::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum LevelMessage {
///     Set(f32),
/// }
///
/// struct Level {
///     level: f32,
/// }
///
/// impl AudioNode for Level {
///     type Message = LevelMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = LevelMessage>,
///         _inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for LevelMessage::Set(level) in messages {
///             self.level = level;
///         }
///         outputs[0].iter_mut().for_each(|s| *s = self.level);
///     }
/// }
/// ```
///
/// Nodes without parameters use `()` as the message type.
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// Drain `messages` first, then read `inputs` and fill `outputs`.
    /// Must not block or allocate on the steady-state path.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio inputs (0 for sources, `usize::MAX` for "any").
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of output buffers.
    fn num_outputs(&self) -> usize {
        1
    }
}
