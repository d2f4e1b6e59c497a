//! Audio graph - owns nodes and message queues

use alloc::boxed::Box;
use alloc::vec;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::trace;

use crate::node::{AudioNode, NodeId, ProcessContext};

/// Default capacity of a node's message queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Sends messages to a node in an [`AudioGraph`].
pub struct NodeHandle<M: Send + 'static> {
    id: NodeId,
    sender: Producer<M>,
}

impl<M: Send + 'static> NodeHandle<M> {
    /// Queue a message for the node; it is applied at the start of the next block.
    ///
    /// Returns the message back if the queue is full.
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        let receiver = &mut self.receiver;
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        self.node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

type InnerGraph = StableGraph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate.
///
/// Nodes can be removed while the graph is alive; the stable graph keeps the
/// indices of the remaining nodes valid.
pub struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,

    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,

    terminal: Option<NodeIndex>,
}

impl AudioGraph {
    /// Create an empty graph at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 128),
            processor: Processor::with_capacity(64),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: Buffer::LEN,
            },
            node_indices: HashMap::new(),
            next_node_id: 0,
            terminal: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    /// Add a node, returns a handle for sending messages
    pub fn add<N: AudioNode>(&mut self, node: N) -> NodeHandle<N::Message> {
        self.add_with_queue_size(node, DEFAULT_QUEUE_SIZE)
    }

    /// Add a node with a custom message queue size
    pub fn add_with_queue_size<N: AudioNode>(
        &mut self,
        node: N,
        queue_size: usize,
    ) -> NodeHandle<N::Message> {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let (producer, consumer) = RingBuffer::new(queue_size);

        // Sinks have no outputs, but dasp_graph still wants one buffer.
        let num_outputs = node.num_outputs().max(1);
        let wrapper = NodeWrapper {
            node,
            receiver: consumer,
        };
        let adapter = DaspAdapter {
            node: Box::new(wrapper),
            ctx: self.ctx,
        };

        let idx = self
            .graph
            .add_node(NodeData::new(adapter, vec![Buffer::SILENT; num_outputs]));
        self.node_indices.insert(id, idx);
        trace!(?id, outputs = num_outputs, "added node");

        NodeHandle {
            id,
            sender: producer,
        }
    }

    /// Connect output of `from` to input of `to`.
    ///
    /// Returns `false` if either node is gone.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        match (self.node_indices.get(&from), self.node_indices.get(&to)) {
            (Some(&a), Some(&b)) => {
                self.graph.add_edge(a, b, ());
                true
            }
            _ => false,
        }
    }

    /// Remove a node together with all of its edges.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(idx) = self.node_indices.remove(&id) else {
            return false;
        };
        if self.terminal == Some(idx) {
            self.terminal = None;
        }
        self.graph.remove_node(idx);
        trace!(?id, "removed node");
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Set which node to process to; everything it depends on is rendered.
    pub fn set_terminal(&mut self, id: NodeId) {
        self.terminal = self.node_indices.get(&id).copied();
    }

    /// Process one block of audio through the graph
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts how often it is processed and emits a constant.
    struct Counter {
        hits: Arc<AtomicUsize>,
        value: f32,
    }

    impl AudioNode for Counter {
        type Message = f32;

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            messages: impl Iterator<Item = f32>,
            inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            for value in messages {
                self.value = value;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            let upstream: f32 = inputs.iter().map(|i| i.buffers()[0][0]).sum();
            outputs[0].iter_mut().for_each(|s| *s = self.value + upstream);
        }

        fn num_inputs(&self) -> usize {
            usize::MAX
        }
    }

    fn counter(value: f32) -> (Counter, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (
            Counter {
                hits: hits.clone(),
                value,
            },
            hits,
        )
    }

    #[test]
    fn processes_everything_upstream_of_terminal() {
        let mut graph = AudioGraph::new(48_000);
        let (a, a_hits) = counter(1.0);
        let (b, b_hits) = counter(0.0);
        let (stray, stray_hits) = counter(5.0);
        let a = graph.add(a);
        let b = graph.add(b);
        graph.add(stray);
        assert!(graph.connect(a.id(), b.id()));
        graph.set_terminal(b.id());

        graph.process();
        graph.process();
        assert_eq!(a_hits.load(Ordering::Relaxed), 2);
        assert_eq!(b_hits.load(Ordering::Relaxed), 2);
        assert_eq!(stray_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn removed_nodes_stop_processing_and_ids_stay_valid() {
        let mut graph = AudioGraph::new(48_000);
        let (a, a_hits) = counter(1.0);
        let (b, b_hits) = counter(1.0);
        let (sink, _) = counter(0.0);
        let a = graph.add(a);
        let b = graph.add(b);
        let sink = graph.add(sink);
        graph.connect(a.id(), sink.id());
        graph.connect(b.id(), sink.id());
        graph.set_terminal(sink.id());
        graph.process();

        assert!(graph.remove(a.id()));
        assert!(!graph.remove(a.id()));
        assert!(!graph.connect(a.id(), sink.id()));
        graph.process();

        assert_eq!(a_hits.load(Ordering::Relaxed), 1);
        assert_eq!(b_hits.load(Ordering::Relaxed), 2);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn messages_arrive_before_the_next_block() {
        let mut graph = AudioGraph::new(48_000);
        let (p, _) = counter(0.0);
        let mut p = graph.add(p);
        graph.set_terminal(p.id());
        assert!(p.send(0.25).is_ok());
        graph.process();
        assert!(graph.contains(p.id()));
    }
}
