//! Math functions callable from programs.
//!
//! Results follow the usual double-precision conventions of a scripting
//! runtime: integer helpers work on the 32-bit truncation of their operands,
//! `round` rounds half up, and `max`/`min` propagate NaN.

/// A callable function.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Builtin {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Variadic(Variadic),
}

/// Functions that take any number of arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Variadic {
    Max,
    Min,
    Hypot,
}

impl Variadic {
    pub(crate) fn identity(self) -> f64 {
        match self {
            Variadic::Max => f64::NEG_INFINITY,
            Variadic::Min => f64::INFINITY,
            Variadic::Hypot => 0.0,
        }
    }

    pub(crate) fn step(self, acc: f64, v: f64) -> f64 {
        match self {
            Variadic::Max => js_max(acc, v),
            Variadic::Min => js_min(acc, v),
            // Any infinite operand wins over NaN.
            Variadic::Hypot if acc.is_infinite() || v.is_infinite() => f64::INFINITY,
            Variadic::Hypot => acc + v * v,
        }
    }

    pub(crate) fn finish(self, acc: f64) -> f64 {
        match self {
            Variadic::Hypot => acc.sqrt(),
            Variadic::Max | Variadic::Min => acc,
        }
    }

    #[cfg(test)]
    fn apply(self, args: impl Iterator<Item = f64>) -> f64 {
        self.finish(args.fold(self.identity(), |acc, v| self.step(acc, v)))
    }
}

/// Look up a function by name.
pub(crate) fn lookup(name: &str) -> Option<Builtin> {
    use Builtin::{Binary, Unary};
    let builtin = match name {
        "abs" => Unary(f64::abs),
        "cbrt" => Unary(f64::cbrt),
        "clz32" => Unary(clz32),
        "sign" => Unary(sign),
        "sqrt" => Unary(f64::sqrt),
        "exp" => Unary(f64::exp),
        "expm1" => Unary(f64::exp_m1),
        "log" => Unary(f64::ln),
        "log1p" => Unary(f64::ln_1p),
        "log10" => Unary(f64::log10),
        "log2" => Unary(f64::log2),
        "ceil" => Unary(f64::ceil),
        "floor" => Unary(f64::floor),
        "fround" => Unary(fround),
        "round" => Unary(round),
        "trunc" => Unary(f64::trunc),
        "acos" => Unary(f64::acos),
        "acosh" => Unary(f64::acosh),
        "asin" => Unary(f64::asin),
        "asinh" => Unary(f64::asinh),
        "atan" => Unary(f64::atan),
        "atanh" => Unary(f64::atanh),
        "cos" => Unary(f64::cos),
        "cosh" => Unary(f64::cosh),
        "sin" => Unary(f64::sin),
        "sinh" => Unary(f64::sinh),
        "tan" => Unary(f64::tan),
        "tanh" => Unary(f64::tanh),
        "atan2" => Binary(f64::atan2),
        "imul" => Binary(imul),
        "pow" => Binary(f64::powf),
        "max" => Builtin::Variadic(Variadic::Max),
        "min" => Builtin::Variadic(Variadic::Min),
        "hypot" => Builtin::Variadic(Variadic::Hypot),
        _ => return None,
    };
    Some(builtin)
}

/// Truncate to a signed 32-bit integer the way bitwise operators do.
pub(crate) fn to_int32(v: f64) -> i32 {
    if !v.is_finite() {
        return 0;
    }
    let wrapped = v.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

fn clz32(v: f64) -> f64 {
    (to_int32(v) as u32).leading_zeros() as f64
}

fn imul(a: f64, b: f64) -> f64 {
    to_int32(a).wrapping_mul(to_int32(b)) as f64
}

fn fround(v: f64) -> f64 {
    v as f32 as f64
}

fn round(v: f64) -> f64 {
    (v + 0.5).floor()
}

fn sign(v: f64) -> f64 {
    if v.is_nan() || v == 0.0 {
        v
    } else {
        v.signum()
    }
}

fn js_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn js_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}
