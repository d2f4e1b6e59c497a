//! Resolved expression tree and per-sample evaluation.

use dasp_graph::Buffer;

use super::builtins::Variadic;
use super::syntax::{BinaryOp, UnaryOp};
use crate::channels::Channel;
use crate::error::EvalFault;

/// Number of scratch variables (`x`, `y`, `z`).
pub const NUM_SCRATCH: usize = 3;

/// Number of phase accumulators behind `sin[k](delta)`.
pub const NUM_OSCILLATORS: usize = 8;

/// Mutable state a program reads and writes while it runs.
///
/// Scratch variables and accumulators persist across samples and survive a
/// clock reset; only recompiling zeroes them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitState {
    /// Seconds on the session clock for the sample being rendered.
    pub t: f64,
    /// Session time at which the unit was compiled.
    pub now: f64,
    pub scratch: [f64; NUM_SCRATCH],
    pub phase: [f64; NUM_OSCILLATORS],
}

impl UnitState {
    pub fn starting_at(start: f64) -> Self {
        Self {
            t: start,
            now: start,
            ..Self::default()
        }
    }
}

/// Everything a sample evaluation can see besides the tree.
pub(crate) struct Frame<'a> {
    pub state: &'a mut UnitState,
    pub rng: &'a mut fastrand::Rng,
    /// Previous block of every bus slot.
    pub bus: &'a [Buffer],
    /// Sample index inside the block.
    pub sample: usize,
    pub sample_rate: f64,
    /// Element values of the `[..][i]` and `choice(..)` being evaluated.
    /// Reserved up front by [`Expr::pick_slots`], so pushing never allocates.
    pub picks: &'a mut Vec<f64>,
}

impl Frame<'_> {
    fn input(&self, channel: Channel) -> f64 {
        self.bus
            .get(channel.index())
            .map_or(0.0, |buffer| buffer[self.sample] as f64)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Expr {
    Const(f64),
    Time,
    Now,
    SampleRate,
    SampleDelta,
    Scratch(usize),
    Input(Channel),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign {
        slot: usize,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Sequence(Vec<Expr>),
    Pick {
        items: Vec<Expr>,
        index: Box<Expr>,
    },
    Apply1(fn(f64) -> f64, Box<Expr>),
    Apply2(fn(f64, f64) -> f64, Box<Expr>, Box<Expr>),
    ApplyN(Variadic, Vec<Expr>),
    Random,
    Choice(Vec<Expr>),
    Oscillator {
        slot: Box<Expr>,
        delta: Box<Expr>,
    },
}

#[inline]
pub(crate) fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

#[inline]
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub(crate) fn unary(op: UnaryOp, v: f64) -> f64 {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Plus => v,
        UnaryOp::Not => flag(!truthy(v)),
    }
}

pub(crate) fn binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Lt => flag(a < b),
        BinaryOp::Le => flag(a <= b),
        BinaryOp::Gt => flag(a > b),
        BinaryOp::Ge => flag(a >= b),
        BinaryOp::Eq => flag(a == b),
        BinaryOp::Ne => flag(a != b),
    }
}

/// Integer slot index, if `v` names one of `len` slots.
fn slot_index(v: f64, len: usize) -> Option<usize> {
    (v >= 0.0 && v.fract() == 0.0 && v < len as f64).then_some(v as usize)
}

/// Evaluate `items` in order onto the pick stack. Returns where they start.
fn push_all(items: &[Expr], frame: &mut Frame<'_>) -> Result<usize, EvalFault> {
    let base = frame.picks.len();
    for item in items {
        let v = item.eval(frame)?;
        frame.picks.push(v);
    }
    Ok(base)
}

impl Expr {
    /// Most values the pick stack can hold at once while this tree runs.
    pub(crate) fn pick_slots(&self) -> usize {
        match self {
            Expr::Const(_)
            | Expr::Time
            | Expr::Now
            | Expr::SampleRate
            | Expr::SampleDelta
            | Expr::Scratch(_)
            | Expr::Input(_)
            | Expr::Random => 0,
            Expr::Unary(_, a) | Expr::Apply1(_, a) | Expr::Assign { value: a, .. } => {
                a.pick_slots()
            }
            Expr::Binary(_, a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Apply2(_, a, b)
            | Expr::Oscillator { slot: a, delta: b } => a.pick_slots() + b.pick_slots(),
            Expr::Conditional(a, b, c) => a.pick_slots() + b.pick_slots() + c.pick_slots(),
            Expr::Sequence(items) | Expr::ApplyN(_, items) => {
                items.iter().map(Expr::pick_slots).sum()
            }
            Expr::Choice(items) => {
                items.len() + items.iter().map(Expr::pick_slots).sum::<usize>()
            }
            Expr::Pick { items, index } => {
                items.len() + items.iter().map(Expr::pick_slots).sum::<usize>() + index.pick_slots()
            }
        }
    }

    pub(crate) fn eval(&self, frame: &mut Frame<'_>) -> Result<f64, EvalFault> {
        Ok(match self {
            Expr::Const(v) => *v,
            Expr::Time => frame.state.t,
            Expr::Now => frame.state.now,
            Expr::SampleRate => frame.sample_rate,
            Expr::SampleDelta => 1.0 / frame.sample_rate,
            Expr::Scratch(slot) => frame.state.scratch[*slot],
            Expr::Input(channel) => frame.input(*channel),
            Expr::Unary(op, operand) => unary(*op, operand.eval(frame)?),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(frame)?;
                binary(*op, a, rhs.eval(frame)?)
            }
            Expr::And(lhs, rhs) => {
                let a = lhs.eval(frame)?;
                if truthy(a) {
                    rhs.eval(frame)?
                } else {
                    a
                }
            }
            Expr::Or(lhs, rhs) => {
                let a = lhs.eval(frame)?;
                if truthy(a) {
                    a
                } else {
                    rhs.eval(frame)?
                }
            }
            Expr::Conditional(test, then, otherwise) => {
                if truthy(test.eval(frame)?) {
                    then.eval(frame)?
                } else {
                    otherwise.eval(frame)?
                }
            }
            Expr::Assign { slot, op, value } => {
                let v = value.eval(frame)?;
                let current = &mut frame.state.scratch[*slot];
                *current = match op {
                    Some(op) => binary(*op, *current, v),
                    None => v,
                };
                *current
            }
            Expr::Sequence(items) => {
                let mut last = f64::NAN;
                for item in items {
                    last = item.eval(frame)?;
                }
                last
            }
            Expr::Pick { items, index } => {
                // Every element runs, then the index.
                let base = push_all(items, frame)?;
                let chosen = slot_index(index.eval(frame)?.floor(), items.len());
                let picked = chosen.map_or(f64::NAN, |i| frame.picks[base + i]);
                frame.picks.truncate(base);
                picked
            }
            Expr::Apply1(f, arg) => f(arg.eval(frame)?),
            Expr::Apply2(f, a, b) => {
                let a = a.eval(frame)?;
                f(a, b.eval(frame)?)
            }
            Expr::ApplyN(f, args) => {
                let mut acc = f.identity();
                for arg in args {
                    acc = f.step(acc, arg.eval(frame)?);
                }
                f.finish(acc)
            }
            Expr::Random => frame.rng.f64(),
            Expr::Choice(options) => {
                let base = push_all(options, frame)?;
                let chosen = frame.rng.usize(..options.len());
                let result = frame.picks.get(base + chosen).copied().unwrap_or(f64::NAN);
                frame.picks.truncate(base);
                result
            }
            Expr::Oscillator { slot, delta } => {
                let k = slot.eval(frame)?;
                let k = slot_index(k, NUM_OSCILLATORS)
                    .ok_or(EvalFault::OscillatorSlot { index: k })?;
                let d = delta.eval(frame)?;
                let phase = &mut frame.state.phase[k];
                *phase += d;
                phase.sin()
            }
        })
    }
}
