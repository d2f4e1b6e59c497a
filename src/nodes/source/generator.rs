//! Generator unit: renders one participant's compiled program.

use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::warn;

use crate::error::{CompileError, EvalFault};
use crate::node::{AudioNode, ProcessContext};
use crate::program::eval::Frame;
use crate::program::{compile, Bindings, Program, UnitState};

/// Messages to a running generator unit
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GeneratorMessage {
    /// Move the unit's time variable; scratch and accumulators are untouched.
    SetTime(f64),
}

/// Reads runtime faults raised by one unit, on the control thread.
pub struct FaultReader {
    consumer: Consumer<EvalFault>,
}

impl FaultReader {
    /// Next pending fault, if any.
    pub fn poll(&mut self) -> Option<EvalFault> {
        self.consumer.pop().ok()
    }
}

/// A compiled program bound to its own state.
///
/// Takes the bus return as its single input and writes one mono buffer. Every
/// output sample is finite and inside `[-1, 1]`. After a runtime fault the
/// unit renders silence until it is replaced.
pub struct GeneratorUnit {
    program: Program,
    state: UnitState,
    rng: fastrand::Rng,
    picks: Vec<f64>,
    faulted: bool,
    faults: Producer<EvalFault>,
    fault_reader: Option<FaultReader>,
}

impl GeneratorUnit {
    /// Compile `source` into a unit whose time starts at `start` seconds.
    pub fn compile(source: &str, bindings: &Bindings, start: f64) -> Result<Self, CompileError> {
        Ok(Self::new(compile(source, bindings)?, start))
    }

    pub fn new(program: Program, start: f64) -> Self {
        let (faults, consumer) = RingBuffer::new(4);
        Self {
            picks: Vec::with_capacity(program.pick_slots()),
            program,
            state: UnitState::starting_at(start),
            rng: fastrand::Rng::new(),
            faulted: false,
            faults,
            fault_reader: Some(FaultReader { consumer }),
        }
    }

    /// Seed the random source, for reproducible `rand()` and `choice()`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// The fault reader for this unit. Can be taken once.
    pub fn take_fault_reader(&mut self) -> Option<FaultReader> {
        self.fault_reader.take()
    }

    pub fn source(&self) -> &str {
        self.program.source()
    }

    pub fn state(&self) -> &UnitState {
        &self.state
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Render one block into `out`, reading the previous bus block from `bus`.
    pub fn render(&mut self, sample_rate: u32, bus: &[Buffer], out: &mut Buffer) {
        if self.faulted {
            out.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        let dt = 1.0 / sample_rate as f64;
        for i in 0..out.len() {
            let mut frame = Frame {
                state: &mut self.state,
                rng: &mut self.rng,
                bus,
                sample: i,
                sample_rate: sample_rate as f64,
                picks: &mut self.picks,
            };
            match self.program.root().eval(&mut frame) {
                Ok(v) => out[i] = to_sample(v),
                Err(fault) => {
                    warn!(%fault, source = self.program.source(), "generator faulted");
                    self.faulted = true;
                    let _ = self.faults.push(fault);
                    out[i..].iter_mut().for_each(|s| *s = 0.0);
                    return;
                }
            }
            self.state.t += dt;
        }
    }
}

/// Map a program result to an output sample.
#[inline]
pub fn to_sample(v: f64) -> f32 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

impl AudioNode for GeneratorUnit {
    type Message = GeneratorMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = GeneratorMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                GeneratorMessage::SetTime(t) => self.state.t = t,
            }
        }

        let Some(out) = outputs.first_mut() else {
            return;
        };
        let bus = inputs.first().map(|input| input.buffers()).unwrap_or(&[]);
        self.render(ctx.sample_rate, bus, out);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;
    use std::f64::consts::PI;

    const RATE: u32 = 48_000;

    fn unit(source: &str) -> GeneratorUnit {
        GeneratorUnit::compile(source, &Bindings::new(), 0.0).unwrap()
    }

    #[test]
    fn renders_a_sine() {
        let mut unit = unit("sin(2*pi*440*t)");
        let mut out = Buffer::SILENT;
        unit.render(RATE, &[], &mut out);
        unit.render(RATE, &[], &mut out);
        for (i, &s) in out.iter().enumerate() {
            let n = (Buffer::LEN + i) as f64;
            let expected = (2.0 * PI * 440.0 * n / RATE as f64).sin() as f32;
            assert!((s - expected).abs() < 1e-5, "sample {i}: {s} vs {expected}");
        }
    }

    #[test]
    fn output_is_clamped_and_finite() {
        let mut out = Buffer::SILENT;
        unit("3").render(RATE, &[], &mut out);
        assert!(out.iter().all(|&s| s == 1.0));
        unit("-1/0").render(RATE, &[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        unit("sqrt(-1)").render(RATE, &[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn reads_bus_input() {
        let mut bindings = Bindings::new();
        bindings.bind("p1", Channel::new(2).unwrap());
        let mut unit = GeneratorUnit::compile("p1 * 0.5", &bindings, 0.0).unwrap();
        let mut bus = vec![Buffer::SILENT; 3];
        bus[2].iter_mut().enumerate().for_each(|(i, s)| *s = i as f32 / 64.0);

        let mut out = Buffer::SILENT;
        unit.render(RATE, &bus, &mut out);
        assert_eq!(out[10], 10.0 / 128.0);
    }

    #[test]
    fn time_starts_at_compile_time_and_can_be_moved() {
        let mut unit = GeneratorUnit::compile("now", &Bindings::new(), 12.5).unwrap();
        assert_eq!(unit.state().t, 12.5);
        assert_eq!(unit.state().now, 12.5);

        let mut out = Buffer::SILENT;
        unit.render(RATE, &[], &mut out);
        assert!((unit.state().t - (12.5 + 64.0 / RATE as f64)).abs() < 1e-12);
    }

    #[test]
    fn dynamic_slot_fault_silences_and_reports_once() {
        let mut unit = unit("x = x + 1, sin[x + 6](0.1)");
        let mut faults = unit.take_fault_reader().unwrap();
        assert!(unit.take_fault_reader().is_none());

        let mut out = Buffer::SILENT;
        unit.render(RATE, &[], &mut out);
        assert!(unit.is_faulted());
        // x = 1 → slot 7 is fine, x = 2 → slot 8 faults on the second sample.
        assert_ne!(out[0], 0.0);
        assert!(out[1..].iter().all(|&s| s == 0.0));
        assert_eq!(faults.poll(), Some(EvalFault::OscillatorSlot { index: 8.0 }));

        unit.render(RATE, &[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(faults.poll(), None);
    }

    #[test]
    fn seeded_units_are_reproducible() {
        let mut a = unit("rand()*2-1").with_seed(42);
        let mut b = unit("rand()*2-1").with_seed(42);
        let (mut out_a, mut out_b) = (Buffer::SILENT, Buffer::SILENT);
        a.render(RATE, &[], &mut out_a);
        b.render(RATE, &[], &mut out_b);
        assert_eq!(out_a[..], out_b[..]);
    }
}
