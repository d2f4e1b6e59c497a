//! Participant router: the audio engine of a session.
//!
//! The router owns the [`AudioGraph`] and wires it as follows:
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 v                                          │ (ring, next block)
//! BusReturn ──> Generator(p) ──> Spatializer(p) ──> Mixer ──> Gain ──> [output] ──> Collector
//!                    │                                                              ^
//!                    ├──> AnalysisTap(p) ───────────────────────────────────────────┤
//!                    └──> bus send(p) ──────────────────────────────────────────────┘
//! ```
//!
//! Each voice (spatializer and analysis tap) lives as long as its participant.
//! Generator units come and go: [`Router::attach`] swaps them between two
//! blocks, so no block is ever rendered with two units or with none for a
//! participant that had one before.
//!
//! # Processing
//!
//! Call [`process`](Router::process) repeatedly, paced to real time:
//!
//! ```no_run
//! # use kilobeat::Router;
//! # let mut router = Router::new(48_000);
//! use std::time::{Duration, Instant};
//!
//! let start = Instant::now();
//! let rate = router.sample_rate() as f64;
//!
//! loop {
//!     let target = (start.elapsed().as_secs_f64() * rate / 64.0) as u64 + 4;
//!     while router.blocks_processed() < target {
//!         router.process();
//!     }
//!     std::thread::sleep(Duration::from_micros(500));
//! }
//! ```

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::channels::{Channel, ChannelAllocator};
use crate::error::EvalFault;
use crate::graph::{AudioGraph, NodeHandle};
use crate::node::{AudioNode, NodeId};
use crate::nodes::{
    analysis_tap, volume_to_gain, BusReturn, BusReturnMessage, Collector, FaultReader, Gain,
    GainMessage, GeneratorMessage, GeneratorUnit, Mixer, RingSink, Spatializer,
    SpatializerMessage, TapReader,
};
use crate::program::Bindings;
use crate::protocol::{ParticipantId, Pose};

/// Blocks each bus ring can hold. One is in flight at a time; the rest is slack.
pub const BUS_RING_BLOCKS: usize = 4;

/// Default analysis tap size in samples.
pub const DEFAULT_TAP_CAPACITY: usize = 8192;

struct AttachedUnit {
    generator: NodeHandle<GeneratorMessage>,
    /// The channel and the send writing into its ring.
    bus: Option<(Channel, NodeId)>,
    faults: Option<FaultReader>,
    source: String,
}

struct Voice {
    spatializer: NodeHandle<SpatializerMessage>,
    tap: NodeId,
    tap_reader: Option<TapReader>,
    unit: Option<AttachedUnit>,
}

/// Wires generator units into the shared bus, the stereo mix and the taps.
pub struct Router {
    graph: AudioGraph,
    channels: ChannelAllocator,

    bus: NodeHandle<BusReturnMessage>,
    mixer: NodeId,
    master: NodeHandle<GainMessage>,
    collector: NodeId,
    sink_node: Option<NodeId>,

    voices: HashMap<ParticipantId, Voice>,
    tap_capacity: usize,
    blocks_processed: u64,
}

impl Router {
    /// An empty router at `sample_rate`, without an output device.
    pub fn new(sample_rate: u32) -> Self {
        let mut graph = AudioGraph::new(sample_rate);

        let collector = graph.add(Collector).id();
        graph.set_terminal(collector);

        let bus = graph.add(BusReturn::new());
        let mixer = graph.add(Mixer::stereo()).id();
        let master = graph.add(Gain::new(volume_to_gain(0.5)).with_smoothing_ms(4.0, sample_rate));
        graph.connect(mixer, master.id());
        graph.connect(master.id(), collector);

        Self {
            graph,
            channels: ChannelAllocator::new(),
            bus,
            mixer,
            master,
            collector,
            sink_node: None,
            voices: HashMap::new(),
            tap_capacity: DEFAULT_TAP_CAPACITY,
            blocks_processed: 0,
        }
    }

    /// Send the master mix to `sink` (builder pattern).
    ///
    /// Any `()`-message sink works: a [`CpalSink`](crate::nodes::CpalSink)
    /// for the device, or a [`RingSink`] to capture the mix.
    pub fn with_output<S: AudioNode<Message = ()>>(mut self, sink: S) -> Self {
        let id = self.graph.add(sink).id();
        self.graph.connect(self.master.id(), id);
        self.graph.connect(id, self.collector);
        self.sink_node = Some(id);
        self
    }

    /// Samples kept by each new voice's analysis tap.
    pub fn with_tap_capacity(mut self, samples: usize) -> Self {
        self.tap_capacity = samples.max(1);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// Nodes currently in the graph, including the fixed ones.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Create the spatializer and analysis tap for `id`.
    ///
    /// Returns `false` if the voice already exists; its pose is updated instead.
    pub fn add_voice(&mut self, id: ParticipantId, pose: Pose) -> bool {
        if self.voices.contains_key(&id) {
            self.set_pose(id, pose);
            return false;
        }

        let spatializer = self.graph.add(Spatializer::new(pose));
        self.graph.connect(spatializer.id(), self.mixer);

        let (tap, tap_reader) = analysis_tap(self.tap_capacity);
        let tap = self.graph.add(tap).id();
        self.graph.connect(tap, self.collector);

        self.voices.insert(
            id,
            Voice {
                spatializer,
                tap,
                tap_reader: Some(tap_reader),
                unit: None,
            },
        );
        debug!(%id, "added voice");
        true
    }

    /// Detach `id`'s unit, free its channel and tear the voice down.
    pub fn remove_voice(&mut self, id: ParticipantId) -> bool {
        self.detach(id);
        let Some(voice) = self.voices.remove(&id) else {
            return false;
        };
        self.graph.remove(voice.spatializer.id());
        self.graph.remove(voice.tap);
        debug!(%id, "removed voice");
        true
    }

    pub fn has_voice(&self, id: ParticipantId) -> bool {
        self.voices.contains_key(&id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// The inputs a program compiled now for `id` will see once attached.
    ///
    /// Every other channeled participant is bound as `p<id>`. `id` itself is
    /// bound as `p<id>` and `me` to the channel it will own after
    /// [`attach`](Self::attach) has released and reallocated its slot.
    pub fn bindings_for(&self, id: ParticipantId) -> Bindings {
        let mut bindings = Bindings::new();
        for (channel, owner) in self.channels.owners() {
            if owner != id {
                bindings.bind(owner.input_name(), channel);
            }
        }
        if let Some(own) = self.channels.next_free_excluding(id) {
            bindings.bind(id.input_name(), own);
            bindings.bind("me", own);
        }
        bindings
    }

    /// Replace `id`'s generator with `unit`.
    ///
    /// The previous unit is detached and its channel released before the new
    /// unit is wired, all before the next block. When the channel comes back
    /// to the same slot the bus send and its ring stay in place and only the
    /// generator feeding it changes, so readers of the channel (the unit's own
    /// `me` included) never see a block of silence. Returns the channel the
    /// unit writes to, or `None` if the bus is full; an unchanneled unit is
    /// audible but not referenceable.
    pub fn attach(&mut self, id: ParticipantId, mut unit: GeneratorUnit) -> Option<Channel> {
        let kept = self.take_unit(id).and_then(|old| self.keep_or_release_bus(id, old));
        if !self.voices.contains_key(&id) {
            self.add_voice(id, Pose::default());
        }

        let bus = match kept {
            Some(bus) => Some(bus),
            None => match self.channels.allocate(id) {
                Ok(channel) => Some((channel, self.wire_bus_send(channel))),
                Err(err) => {
                    warn!(%id, %err, "unit attached without a bus channel");
                    None
                }
            },
        };
        let channel = bus.map(|(channel, _)| channel);

        let faults = unit.take_fault_reader();
        let source = unit.source().to_string();
        let generator = self.graph.add(unit);
        let gen_id = generator.id();
        self.graph.connect(self.bus.id(), gen_id);
        if let Some((_, send)) = bus {
            self.graph.connect(gen_id, send);
        }

        let Some(voice) = self.voices.get_mut(&id) else {
            return channel;
        };
        self.graph.connect(gen_id, voice.spatializer.id());
        self.graph.connect(gen_id, voice.tap);
        voice.unit = Some(AttachedUnit {
            generator,
            bus,
            faults,
            source,
        });

        info!(%id, channel = ?channel.map(Channel::index), "attached unit");
        channel
    }

    fn wire_bus_send(&mut self, channel: Channel) -> NodeId {
        let (send, consumer) = RingSink::with_blocks(BUS_RING_BLOCKS, 1);
        let send = self.graph.add(send).id();
        self.graph.connect(send, self.collector);

        if self
            .bus
            .send(BusReturnMessage::Connect { channel, consumer })
            .is_err()
        {
            warn!(%channel, "bus return queue full, channel reads silence");
        }
        send
    }

    /// Take `id`'s unit out of the graph. Its bus send is left alone.
    fn take_unit(&mut self, id: ParticipantId) -> Option<AttachedUnit> {
        let unit = self.voices.get_mut(&id)?.unit.take()?;
        self.graph.remove(unit.generator.id());
        Some(unit)
    }

    /// Hand back `old`'s bus send if reallocating would land on the same
    /// slot. Otherwise tear it down and free the channel.
    fn keep_or_release_bus(
        &mut self,
        id: ParticipantId,
        old: AttachedUnit,
    ) -> Option<(Channel, NodeId)> {
        match old.bus {
            Some((channel, send)) if self.channels.next_free_excluding(id) == Some(channel) => {
                trace!(%id, %channel, "bus send kept across swap");
                Some((channel, send))
            }
            bus => {
                self.release_bus(id, bus);
                None
            }
        }
    }

    fn release_bus(&mut self, id: ParticipantId, bus: Option<(Channel, NodeId)>) {
        let Some((channel, send)) = bus else {
            return;
        };
        self.graph.remove(send);
        if self.bus.send(BusReturnMessage::Disconnect { channel }).is_err() {
            warn!(%channel, "bus return queue full, stale reader kept");
        }
        self.channels.release(id);
    }

    /// Remove `id`'s generator and free its channel. The voice stays.
    pub fn detach(&mut self, id: ParticipantId) -> bool {
        let Some(unit) = self.take_unit(id) else {
            return false;
        };
        self.release_bus(id, unit.bus);
        debug!(%id, "detached unit");
        true
    }

    pub fn has_unit(&self, id: ParticipantId) -> bool {
        self.voices.get(&id).is_some_and(|voice| voice.unit.is_some())
    }

    /// Number of attached generator units.
    pub fn unit_count(&self) -> usize {
        self.voices.values().filter(|voice| voice.unit.is_some()).count()
    }

    /// Source text of `id`'s running unit.
    pub fn unit_source(&self, id: ParticipantId) -> Option<&str> {
        let unit = self.voices.get(&id)?.unit.as_ref()?;
        Some(&unit.source)
    }

    pub fn channel_of(&self, id: ParticipantId) -> Option<Channel> {
        self.channels.channel_of(id)
    }

    /// Read access to the bus allocation.
    pub fn channels(&self) -> &ChannelAllocator {
        &self.channels
    }

    /// Move `id`'s speaker. Never touches the generator.
    pub fn set_pose(&mut self, id: ParticipantId, pose: Pose) {
        let Some(voice) = self.voices.get_mut(&id) else {
            return;
        };
        if voice.spatializer.send(SpatializerMessage::SetPose(pose)).is_err() {
            warn!(%id, "spatializer queue full, pose dropped");
        }
    }

    /// Set `id`'s time variable to `t` seconds.
    pub fn set_time(&mut self, id: ParticipantId, t: f64) {
        let Some(unit) = self.voices.get_mut(&id).and_then(|voice| voice.unit.as_mut()) else {
            return;
        };
        if unit.generator.send(GeneratorMessage::SetTime(t)).is_err() {
            warn!(%id, "generator queue full, time update dropped");
        }
    }

    /// Set every unit's time variable to `t` seconds.
    pub fn broadcast_time(&mut self, t: f64) {
        let ids = self.voices.keys().copied().collect_vec();
        for id in ids {
            self.set_time(id, t);
        }
        trace!(t, "broadcast time");
    }

    /// Master volume as a slider fraction in `[0, 1]`.
    pub fn set_volume(&mut self, frac: f64) {
        if self.master.send(GainMessage::SetGain(volume_to_gain(frac))).is_err() {
            warn!("master gain queue full, volume change dropped");
        }
    }

    /// The analysis tap reader for `id`. Can be taken once per voice.
    pub fn take_tap(&mut self, id: ParticipantId) -> Option<TapReader> {
        self.voices.get_mut(&id)?.tap_reader.take()
    }

    /// Runtime faults raised since the last call, by participant.
    pub fn drain_faults(&mut self) -> Vec<(ParticipantId, EvalFault)> {
        let mut faults = Vec::new();
        for (&id, voice) in self.voices.iter_mut() {
            let Some(reader) = voice.unit.as_mut().and_then(|unit| unit.faults.as_mut()) else {
                continue;
            };
            while let Some(fault) = reader.poll() {
                faults.push((id, fault));
            }
        }
        faults
    }

    /// Render one block through the whole graph.
    pub fn process(&mut self) {
        self.graph.process();
        self.blocks_processed += 1;
    }
}
