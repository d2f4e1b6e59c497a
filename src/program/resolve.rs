//! Name resolution and constant folding.
//!
//! Turns the syntax tree into an [`Expr`] whose names are bound to state
//! slots, bus inputs and function pointers. Everything that can be rejected
//! before the audio thread sees the program is rejected here.

use super::builtins::{self, Builtin};
use super::eval::{self, Expr, NUM_OSCILLATORS};
use super::syntax::{Ast, LogicalOp};
use super::Bindings;
use crate::error::CompileError;

pub(crate) fn resolve(ast: &Ast, bindings: &Bindings) -> Result<Expr, CompileError> {
    Resolver { bindings }.expr(ast)
}

struct Resolver<'a> {
    bindings: &'a Bindings,
}

fn scratch_slot(name: &str) -> Option<usize> {
    match name {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        _ => None,
    }
}

impl Resolver<'_> {
    fn expr(&self, ast: &Ast) -> Result<Expr, CompileError> {
        Ok(match ast {
            Ast::Number(v) => Expr::Const(*v),
            Ast::Name(name) => self.name(name)?,
            Ast::List(_) => {
                return Err(CompileError::Unsupported(
                    "array literal must be indexed".into(),
                ))
            }
            Ast::Unary(op, operand) => match self.expr(operand)? {
                Expr::Const(v) => Expr::Const(eval::unary(*op, v)),
                operand => Expr::Unary(*op, Box::new(operand)),
            },
            Ast::Binary(op, lhs, rhs) => match (self.expr(lhs)?, self.expr(rhs)?) {
                (Expr::Const(a), Expr::Const(b)) => Expr::Const(eval::binary(*op, a, b)),
                (lhs, rhs) => Expr::Binary(*op, Box::new(lhs), Box::new(rhs)),
            },
            Ast::Logical(op, lhs, rhs) => {
                let lhs = Box::new(self.expr(lhs)?);
                let rhs = Box::new(self.expr(rhs)?);
                match op {
                    LogicalOp::And => Expr::And(lhs, rhs),
                    LogicalOp::Or => Expr::Or(lhs, rhs),
                }
            }
            Ast::Conditional(test, then, otherwise) => Expr::Conditional(
                Box::new(self.expr(test)?),
                Box::new(self.expr(then)?),
                Box::new(self.expr(otherwise)?),
            ),
            Ast::Assign(name, op, value) => {
                let slot = scratch_slot(name)
                    .ok_or_else(|| CompileError::NotAssignable(name.clone()))?;
                Expr::Assign {
                    slot,
                    op: *op,
                    value: Box::new(self.expr(value)?),
                }
            }
            Ast::Sequence(items) => Expr::Sequence(self.list(items)?),
            Ast::Index(base, index) => match base.as_ref() {
                Ast::List(items) => Expr::Pick {
                    items: self.list(items)?,
                    index: Box::new(self.expr(index)?),
                },
                Ast::Name(name) if name == "sin" => {
                    return Err(CompileError::Unsupported(
                        "oscillator slot must be called, as in sin[0](delta)".into(),
                    ))
                }
                _ => {
                    return Err(CompileError::Unsupported(
                        "only array literals can be indexed".into(),
                    ))
                }
            },
            Ast::Call(callee, args) => self.call(callee, args)?,
        })
    }

    fn list(&self, items: &[Ast]) -> Result<Vec<Expr>, CompileError> {
        items.iter().map(|item| self.expr(item)).collect()
    }

    fn name(&self, name: &str) -> Result<Expr, CompileError> {
        if let Some(slot) = scratch_slot(name) {
            return Ok(Expr::Scratch(slot));
        }
        Ok(match name {
            "t" => Expr::Time,
            "now" => Expr::Now,
            "sr" => Expr::SampleRate,
            "dt" => Expr::SampleDelta,
            "pi" => Expr::Const(std::f64::consts::PI),
            "e" => Expr::Const(std::f64::consts::E),
            _ => match self.bindings.lookup(name) {
                Some(channel) => Expr::Input(channel),
                // A participant without a bus slot reads zero.
                None if name == "me" || is_participant_name(name) => Expr::Const(0.0),
                None if builtins::lookup(name).is_some() || is_special_function(name) => {
                    return Err(CompileError::Unsupported(format!(
                        "`{name}` is a function and must be called"
                    )))
                }
                None => return Err(CompileError::UnknownName(name.to_string())),
            },
        })
    }

    fn call(&self, callee: &Ast, args: &[Ast]) -> Result<Expr, CompileError> {
        match callee {
            Ast::Name(name) => self.named_call(name, args),
            Ast::Index(base, slot) if matches!(base.as_ref(), Ast::Name(n) if n == "sin") => {
                expect_arity("sin[]", "1", args.len() == 1, args.len())?;
                let slot = self.expr(slot)?;
                if let Expr::Const(k) = slot {
                    if !(k >= 0.0 && k.fract() == 0.0 && k < NUM_OSCILLATORS as f64) {
                        return Err(CompileError::OscillatorSlot {
                            slot: k,
                            max: NUM_OSCILLATORS,
                        });
                    }
                }
                Ok(Expr::Oscillator {
                    slot: Box::new(slot),
                    delta: Box::new(self.expr(&args[0])?),
                })
            }
            _ => Err(CompileError::Unsupported(
                "only named functions can be called".into(),
            )),
        }
    }

    fn named_call(&self, name: &str, args: &[Ast]) -> Result<Expr, CompileError> {
        let found = args.len();
        match name {
            "rand" => {
                expect_arity(name, "0", found == 0, found)?;
                return Ok(Expr::Random);
            }
            "choice" => {
                expect_arity(name, "at least 1", found >= 1, found)?;
                return Ok(Expr::Choice(self.list(args)?));
            }
            _ => {}
        }

        let Some(builtin) = builtins::lookup(name) else {
            return Err(match self.name(name) {
                Ok(_) => CompileError::Unsupported(format!("`{name}` is not a function")),
                Err(err) => err,
            });
        };
        Ok(match builtin {
            Builtin::Unary(f) => {
                expect_arity(name, "1", found == 1, found)?;
                match self.expr(&args[0])? {
                    Expr::Const(v) => Expr::Const(f(v)),
                    arg => Expr::Apply1(f, Box::new(arg)),
                }
            }
            Builtin::Binary(f) => {
                expect_arity(name, "2", found == 2, found)?;
                match (self.expr(&args[0])?, self.expr(&args[1])?) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(f(a, b)),
                    (a, b) => Expr::Apply2(f, Box::new(a), Box::new(b)),
                }
            }
            Builtin::Variadic(f) => Expr::ApplyN(f, self.list(args)?),
        })
    }
}

fn is_special_function(name: &str) -> bool {
    matches!(name, "rand" | "choice")
}

/// `p` followed by a decimal id.
fn is_participant_name(name: &str) -> bool {
    name.strip_prefix('p')
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

fn expect_arity(
    name: &str,
    expected: &'static str,
    ok: bool,
    found: usize,
) -> Result<(), CompileError> {
    if ok {
        Ok(())
    } else {
        Err(CompileError::Arity {
            name: name.to_string(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::syntax::parse;
    use super::*;
    use crate::channels::Channel;

    fn resolve_src(src: &str, bindings: &Bindings) -> Result<Expr, CompileError> {
        resolve(&parse(src)?, bindings)
    }

    #[test]
    fn constant_subexpressions_fold() {
        let expr = resolve_src("2*pi*440", &Bindings::new()).unwrap();
        let Expr::Const(v) = expr else {
            panic!("expected a constant, got {expr:?}");
        };
        assert!((v - 2.0 * std::f64::consts::PI * 440.0).abs() < 1e-9);

        let expr = resolve_src("floor(2.7) + max(1, 2)", &Bindings::new()).unwrap();
        assert!(matches!(expr, Expr::Binary(..)));
    }

    #[test]
    fn bound_inputs_resolve_to_channels() {
        let mut bindings = Bindings::new();
        let ch = Channel::new(3).unwrap();
        bindings.bind("p7", ch);
        bindings.bind("me", ch);
        assert!(matches!(resolve_src("p7", &bindings), Ok(Expr::Input(c)) if c == ch));
        assert!(matches!(resolve_src("me", &bindings), Ok(Expr::Input(c)) if c == ch));
        // A participant without a slot reads silence.
        assert!(matches!(resolve_src("p9", &bindings), Ok(Expr::Const(v)) if v == 0.0));
    }

    #[test]
    fn unknown_names_and_bad_assignments() {
        assert_eq!(
            resolve_src("q + 1", &Bindings::new()).unwrap_err(),
            CompileError::UnknownName("q".into())
        );
        assert_eq!(
            resolve_src("t = 1", &Bindings::new()).unwrap_err(),
            CompileError::NotAssignable("t".into())
        );
        assert!(matches!(
            resolve_src("sin + 1", &Bindings::new()),
            Err(CompileError::Unsupported(_))
        ));
        assert!(matches!(
            resolve_src("t(1)", &Bindings::new()),
            Err(CompileError::Unsupported(_))
        ));
        assert_eq!(
            resolve_src("foo(1)", &Bindings::new()).unwrap_err(),
            CompileError::UnknownName("foo".into())
        );
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            resolve_src("atan2(1)", &Bindings::new()).unwrap_err(),
            CompileError::Arity {
                name: "atan2".into(),
                expected: "2",
                found: 1
            }
        );
        assert!(matches!(
            resolve_src("rand(1)", &Bindings::new()),
            Err(CompileError::Arity { .. })
        ));
        assert!(matches!(
            resolve_src("choice()", &Bindings::new()),
            Err(CompileError::Arity { .. })
        ));
    }

    #[test]
    fn literal_oscillator_slot_is_validated() {
        assert!(resolve_src("sin[7](0.1)", &Bindings::new()).is_ok());
        assert_eq!(
            resolve_src("sin[8](0.1)", &Bindings::new()).unwrap_err(),
            CompileError::OscillatorSlot { slot: 8.0, max: 8 }
        );
        assert!(matches!(
            resolve_src("sin[1.5](0.1)", &Bindings::new()),
            Err(CompileError::OscillatorSlot { .. })
        ));
        // A computed slot is checked at run time instead.
        assert!(resolve_src("sin[x](0.1)", &Bindings::new()).is_ok());
    }

    #[test]
    fn bare_arrays_are_rejected() {
        assert!(matches!(
            resolve_src("[1, 2]", &Bindings::new()),
            Err(CompileError::Unsupported(_))
        ));
    }
}
