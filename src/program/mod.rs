//! The expression language participants write.
//!
//! A program is one expression evaluated once per output sample. It sees
//! session time `t`, the time it was compiled `now`, the sample rate `sr` and
//! its period `dt`, three scratch variables `x`, `y` and `z`, the previous
//! block of every channeled participant (`p<id>`, and `me` for itself), the
//! usual math functions, `rand()`, `choice(...)` and eight phase-accumulating
//! oscillators `sin[k](delta)`.
//!
//! ```
//! use kilobeat::program::{compile, Bindings};
//!
//! let program = compile("sin(2*pi*440*t) * 0.5", &Bindings::new()).unwrap();
//! assert_eq!(program.source(), "sin(2*pi*440*t) * 0.5");
//! assert!(compile("sin(", &Bindings::new()).is_err());
//! ```

mod builtins;
pub(crate) mod eval;
mod resolve;
mod syntax;

use hashbrown::HashMap;

use crate::channels::Channel;
use crate::error::CompileError;

pub use eval::{UnitState, NUM_OSCILLATORS, NUM_SCRATCH};
pub use syntax::{MAX_NESTING, MAX_SOURCE_LEN, MAX_TREE_DEPTH};

/// Names of live bus inputs visible to a program, mapped to their slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bindings {
    inputs: HashMap<String, Channel>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, channel: Channel) {
        self.inputs.insert(name.into(), channel);
    }

    pub fn lookup(&self, name: &str) -> Option<Channel> {
        self.inputs.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// A program that passed every compile-time check.
#[derive(Clone, Debug)]
pub struct Program {
    root: eval::Expr,
    source: String,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn root(&self) -> &eval::Expr {
        &self.root
    }

    pub(crate) fn pick_slots(&self) -> usize {
        self.root.pick_slots()
    }
}

/// Parse and resolve `source` against the inputs in `bindings`.
pub fn compile(source: &str, bindings: &Bindings) -> Result<Program, CompileError> {
    let ast = syntax::parse(source)?;
    let root = resolve::resolve(&ast, bindings)?;
    Ok(Program {
        root,
        source: source.to_string(),
    })
}

/// A named example program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub code: &'static str,
}

/// Example programs offered to participants.
pub const PRESETS: &[Preset] = &[
    Preset { name: "Silence", code: "0" },
    Preset { name: "Noise", code: "rand() * 2 - 1" },
    Preset { name: "Sine", code: "sin(2 * pi * 400 * t)" },
    Preset { name: "Saw", code: "(t % .005) / .005" },
    Preset { name: "Square", code: "(t % .005) > .0025" },
    Preset { name: "AM", code: "sin(2 * pi * 400 * t) * sin(2 * pi * 200 * t)" },
    Preset { name: "PM", code: "sin(2 * pi * 400 * t + sin(2 * pi * 200 * t))" },
    Preset {
        name: "Chord",
        code: "(sin(2 * pi * 300 * t) + sin(2 * pi * 500 * t) + sin(2 * pi * 800 * t)) / 3",
    },
    Preset { name: "Sequence", code: "[.3, .4, .5][floor(t % 3)]" },
    Preset { name: "Rhythm", code: "(t < x ? (t - x) : (x = t + choice(.6, .3, .2, .1), 0))" },
    Preset { name: "Timer", code: "(t - now < 5)" },
    Preset { name: "Ramp", code: "min(t - now, 1)" },
    Preset { name: "Sweep", code: "sin[0](2 * pi * (300 + 200 * sin(t)) * dt)" },
    Preset { name: "Echo", code: "me * .5 + sin(2 * pi * 220 * t) * (t % 1 < .1) * .5" },
];

/// Look up a preset by name, ignoring case.
pub fn preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_compiles() {
        let mut bindings = Bindings::new();
        bindings.bind("me", Channel::new(0).unwrap());
        for preset in PRESETS {
            if let Err(err) = compile(preset.code, &bindings) {
                panic!("preset {} failed: {err}", preset.name);
            }
        }
    }

    #[test]
    fn preset_lookup_ignores_case() {
        assert_eq!(preset("sine").map(|p| p.name), Some("Sine"));
        assert!(preset("nope").is_none());
    }

    #[test]
    fn compile_keeps_source() {
        let program = compile("t", &Bindings::new()).unwrap();
        assert_eq!(program.source(), "t");
    }

    #[test]
    fn compile_errors_surface() {
        assert_eq!(compile("", &Bindings::new()).unwrap_err(), CompileError::Empty);
        assert!(matches!(
            compile("1 +* 2", &Bindings::new()),
            Err(CompileError::Syntax { .. })
        ));
    }
}
