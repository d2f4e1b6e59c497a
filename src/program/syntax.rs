//! Parser for the expression dialect.
//!
//! Precedence, loosest first: `,` then assignment, `?:`, `||`, `&&`,
//! equality, relational, additive, multiplicative, unary, `**`, postfix
//! (`[index]`, `(call)`), primary. Binary levels are folded left; assignment,
//! `?:` and `**` associate right.
//!
//! Only brackets and the then-branch of `?:` recurse; prefix operators, `**`,
//! assignment targets and else-chains are collected in loops and folded, so
//! [`MAX_NESTING`] bounds the parser's stack however the program is written.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::CompileError;

/// Longest accepted program.
pub const MAX_SOURCE_LEN: usize = 2048;

/// Deepest accepted nesting of brackets and `?` branches.
pub const MAX_NESTING: usize = 64;

/// Deepest accepted syntax tree. Resolving and evaluating recurse on it.
pub const MAX_TREE_DEPTH: usize = 512;

type PResult<'a, T> = IResult<&'a str, T>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
}

/// Unresolved syntax tree; names are still strings.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Ast {
    Number(f64),
    Name(String),
    List(Vec<Ast>),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinaryOp, Box<Ast>, Box<Ast>),
    Logical(LogicalOp, Box<Ast>, Box<Ast>),
    Conditional(Box<Ast>, Box<Ast>, Box<Ast>),
    Assign(String, Option<BinaryOp>, Box<Ast>),
    Sequence(Vec<Ast>),
    Index(Box<Ast>, Box<Ast>),
    Call(Box<Ast>, Vec<Ast>),
}

/// Parse a complete program.
pub(crate) fn parse(source: &str) -> Result<Ast, CompileError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(CompileError::TooLong {
            len: source.len(),
            max: MAX_SOURCE_LEN,
        });
    }
    if source.trim().is_empty() {
        return Err(CompileError::Empty);
    }
    check_nesting(source)?;

    match all_consuming(expression)(source) {
        Ok((_, ast)) => {
            check_depth(&ast)?;
            Ok(ast)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(syntax_error(source, source.len() - e.input.len()))
        }
        Err(nom::Err::Incomplete(_)) => Err(syntax_error(source, source.len())),
    }
}

fn syntax_error(source: &str, offset: usize) -> CompileError {
    CompileError::Syntax {
        offset,
        near: source[offset..].chars().take(12).collect(),
    }
}

fn check_nesting(source: &str) -> Result<(), CompileError> {
    let mut depth = 0usize;
    for c in source.chars() {
        match c {
            '(' | '[' | '?' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(CompileError::TooDeep { max: MAX_NESTING });
                }
            }
            ')' | ']' | ':' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn check_depth(ast: &Ast) -> Result<(), CompileError> {
    let mut stack = vec![(ast, 1usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(CompileError::TooComplex {
                max: MAX_TREE_DEPTH,
            });
        }
        let below = depth + 1;
        match node {
            Ast::Number(_) | Ast::Name(_) => {}
            Ast::Unary(_, operand) | Ast::Assign(_, _, operand) => {
                stack.push((&**operand, below));
            }
            Ast::Binary(_, lhs, rhs) | Ast::Logical(_, lhs, rhs) | Ast::Index(lhs, rhs) => {
                stack.push((&**lhs, below));
                stack.push((&**rhs, below));
            }
            Ast::Conditional(test, then, otherwise) => {
                stack.extend([(&**test, below), (&**then, below), (&**otherwise, below)]);
            }
            Ast::List(items) | Ast::Sequence(items) => {
                stack.extend(items.iter().map(|item| (item, below)));
            }
            Ast::Call(callee, args) => {
                stack.push((&**callee, below));
                stack.extend(args.iter().map(|arg| (arg, below)));
            }
        }
    }
    Ok(())
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn sym<'a>(c: char) -> impl FnMut(&'a str) -> PResult<'a, char> {
    ws(char(c))
}

/// Decimal literal: `440`, `1.5`, `.005`, `2e-3`.
fn number(input: &str) -> PResult<'_, f64> {
    map_res(
        recognize(pair(
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        )),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn primary(input: &str) -> PResult<'_, Ast> {
    ws(alt((
        map(number, Ast::Number),
        map(identifier, |name: &str| Ast::Name(name.to_string())),
        delimited(char('('), expression, sym(')')),
        map(
            delimited(char('['), separated_list0(sym(','), assignment), sym(']')),
            Ast::List,
        ),
    )))(input)
}

enum Suffix {
    Index(Ast),
    Call(Vec<Ast>),
}

fn postfix(input: &str) -> PResult<'_, Ast> {
    let (input, base) = primary(input)?;
    let (input, suffixes) = many0(alt((
        map(delimited(sym('['), expression, sym(']')), Suffix::Index),
        map(
            delimited(sym('('), separated_list0(sym(','), assignment), sym(')')),
            Suffix::Call,
        ),
    )))(input)?;

    Ok((
        input,
        suffixes.into_iter().fold(base, |acc, suffix| match suffix {
            Suffix::Index(index) => Ast::Index(Box::new(acc), Box::new(index)),
            Suffix::Call(args) => Ast::Call(Box::new(acc), args),
        }),
    ))
}

fn unary_op(input: &str) -> PResult<'_, UnaryOp> {
    ws(alt((
        value(UnaryOp::Neg, terminated(char('-'), not(char('-')))),
        value(UnaryOp::Plus, terminated(char('+'), not(char('+')))),
        value(UnaryOp::Not, terminated(char('!'), not(char('=')))),
    )))(input)
}

/// Apply prefix operators, innermost last.
fn prefixed(ops: Vec<UnaryOp>, operand: Ast) -> Ast {
    ops.into_iter()
        .rev()
        .fold(operand, |acc, op| Ast::Unary(op, Box::new(acc)))
}

/// `postfix (** unary*postfix)*`, folded to the right.
fn power(input: &str) -> PResult<'_, Ast> {
    let (input, base) = postfix(input)?;
    let (input, mut exponents) =
        many0(preceded(ws(tag("**")), pair(many0(unary_op), postfix)))(input)?;

    let Some((ops, last)) = exponents.pop() else {
        return Ok((input, base));
    };
    let exponent = exponents
        .into_iter()
        .rev()
        .fold(prefixed(ops, last), |acc, (ops, operand)| {
            prefixed(ops, binary(BinaryOp::Pow, operand, acc))
        });
    Ok((input, binary(BinaryOp::Pow, base, exponent)))
}

fn unary(input: &str) -> PResult<'_, Ast> {
    map(pair(many0(unary_op), power), |(ops, operand)| {
        prefixed(ops, operand)
    })(input)
}

/// Fold `operand (op operand)*` to the left.
fn left_assoc<'a, O, P>(
    input: &'a str,
    mut operand: P,
    op: O,
    build: fn(BinaryOp, Ast, Ast) -> Ast,
) -> PResult<'a, Ast>
where
    O: FnMut(&'a str) -> PResult<'a, BinaryOp>,
    P: FnMut(&'a str) -> PResult<'a, Ast> + Copy,
{
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(op), operand))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, rhs)| build(op, acc, rhs)),
    ))
}

fn binary(op: BinaryOp, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Binary(op, Box::new(lhs), Box::new(rhs))
}

fn multiplicative(input: &str) -> PResult<'_, Ast> {
    left_assoc(
        input,
        unary,
        alt((
            value(BinaryOp::Mul, terminated(char('*'), not(one_of("*=")))),
            value(BinaryOp::Div, terminated(char('/'), not(char('=')))),
            value(BinaryOp::Rem, terminated(char('%'), not(char('=')))),
        )),
        binary,
    )
}

fn additive(input: &str) -> PResult<'_, Ast> {
    left_assoc(
        input,
        multiplicative,
        alt((
            value(BinaryOp::Add, terminated(char('+'), not(one_of("+=")))),
            value(BinaryOp::Sub, terminated(char('-'), not(one_of("-=")))),
        )),
        binary,
    )
}

fn relational(input: &str) -> PResult<'_, Ast> {
    left_assoc(
        input,
        additive,
        alt((
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, tag("<")),
            value(BinaryOp::Gt, tag(">")),
        )),
        binary,
    )
}

fn equality(input: &str) -> PResult<'_, Ast> {
    left_assoc(
        input,
        relational,
        alt((
            value(BinaryOp::Eq, tag("===")),
            value(BinaryOp::Ne, tag("!==")),
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
        )),
        binary,
    )
}

fn logical(op: LogicalOp, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Logical(op, Box::new(lhs), Box::new(rhs))
}

fn logical_and(input: &str) -> PResult<'_, Ast> {
    let (input, first) = equality(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), equality))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, rhs| logical(LogicalOp::And, acc, rhs)),
    ))
}

fn logical_or(input: &str) -> PResult<'_, Ast> {
    let (input, first) = logical_and(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), logical_and))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, rhs| logical(LogicalOp::Or, acc, rhs)),
    ))
}

fn assign_op(input: &str) -> PResult<'_, Option<BinaryOp>> {
    ws(alt((
        value(Some(BinaryOp::Add), tag("+=")),
        value(Some(BinaryOp::Sub), tag("-=")),
        value(Some(BinaryOp::Mul), tag("*=")),
        value(Some(BinaryOp::Div), tag("/=")),
        value(Some(BinaryOp::Rem), tag("%=")),
        value(None, terminated(char('='), not(char('=')))),
    )))(input)
}

fn assign_targets(input: &str) -> PResult<'_, Vec<(String, Option<BinaryOp>)>> {
    many0(map(pair(ws(identifier), assign_op), |(name, op)| {
        (name.to_string(), op)
    }))(input)
}

fn assigned(targets: Vec<(String, Option<BinaryOp>)>, value: Ast) -> Ast {
    targets
        .into_iter()
        .rev()
        .fold(value, |acc, (name, op)| Ast::Assign(name, op, Box::new(acc)))
}

struct Branch {
    targets: Vec<(String, Option<BinaryOp>)>,
    test: Ast,
    then: Ast,
}

/// Assignments and `?:`. An else-branch continues the loop instead of
/// recursing: `a ? b : x = c ? d : e` is read as one chain.
fn assignment(mut input: &str) -> PResult<'_, Ast> {
    let mut branches = Vec::new();
    loop {
        let (rest, targets) = assign_targets(input)?;
        let (rest, test) = logical_or(rest)?;
        let (rest, then) = opt(preceded(sym('?'), terminated(assignment, sym(':'))))(rest)?;
        input = rest;
        match then {
            Some(then) => branches.push(Branch {
                targets,
                test,
                then,
            }),
            None => {
                let tail = assigned(targets, test);
                let ast = branches.into_iter().rev().fold(tail, |otherwise, branch| {
                    assigned(
                        branch.targets,
                        Ast::Conditional(
                            Box::new(branch.test),
                            Box::new(branch.then),
                            Box::new(otherwise),
                        ),
                    )
                });
                return Ok((input, ast));
            }
        }
    }
}

fn expression(input: &str) -> PResult<'_, Ast> {
    map(separated_list1(sym(','), assignment), |mut items| {
        if items.len() == 1 {
            items.remove(0)
        } else {
            Ast::Sequence(items)
        }
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Ast> {
        Box::new(Ast::Number(n))
    }

    fn name(s: &str) -> Box<Ast> {
        Box::new(Ast::Name(s.to_string()))
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(number("42"), Ok(("", 42.0)));
        assert_eq!(number(".005"), Ok(("", 0.005)));
        assert_eq!(number("3."), Ok(("", 3.0)));
        assert_eq!(number("2e-3 "), Ok((" ", 0.002)));
        assert!(number("abc").is_err());
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let ast = parse("1 + 2 * t").unwrap();
        assert_eq!(
            ast,
            Ast::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Ast::Binary(BinaryOp::Mul, num(2.0), name("t")))
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let ast = parse("8-4-2").unwrap();
        assert_eq!(
            ast,
            Ast::Binary(
                BinaryOp::Sub,
                Box::new(Ast::Binary(BinaryOp::Sub, num(8.0), num(4.0))),
                num(2.0)
            )
        );
    }

    #[test]
    fn power_is_right_associative() {
        let ast = parse("2**3**2").unwrap();
        assert_eq!(
            ast,
            Ast::Binary(
                BinaryOp::Pow,
                num(2.0),
                Box::new(Ast::Binary(BinaryOp::Pow, num(3.0), num(2.0)))
            )
        );
    }

    #[test]
    fn assignment_versus_equality() {
        assert!(matches!(parse("x = 1").unwrap(), Ast::Assign(ref n, None, _) if n == "x"));
        assert!(matches!(
            parse("x += 1").unwrap(),
            Ast::Assign(_, Some(BinaryOp::Add), _)
        ));
        assert!(matches!(parse("x == 1").unwrap(), Ast::Binary(BinaryOp::Eq, _, _)));
        assert!(matches!(parse("x === 1").unwrap(), Ast::Binary(BinaryOp::Eq, _, _)));
        assert!(matches!(parse("x != 1").unwrap(), Ast::Binary(BinaryOp::Ne, _, _)));
    }

    #[test]
    fn rhythm_preset_structure() {
        let ast = parse("(t<x?(t-x):(x=t+choice(.6,.3,.2,.1),0))").unwrap();
        let Ast::Conditional(test, _, otherwise) = ast else {
            panic!("expected conditional");
        };
        assert!(matches!(*test, Ast::Binary(BinaryOp::Lt, _, _)));
        let Ast::Sequence(items) = *otherwise else {
            panic!("expected sequence in else branch");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ast::Assign(..)));
    }

    #[test]
    fn postfix_index_and_call() {
        let ast = parse("sin[2](0.1)").unwrap();
        let Ast::Call(callee, args) = ast else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(*callee, Ast::Index(name("sin"), num(2.0)));

        let ast = parse("[.3, .4, .5][floor(t % 3)]").unwrap();
        assert!(matches!(ast, Ast::Index(ref list, _) if matches!(**list, Ast::List(ref v) if v.len() == 3)));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(parse("-t").unwrap(), Ast::Unary(UnaryOp::Neg, name("t")));
        assert_eq!(parse("!x").unwrap(), Ast::Unary(UnaryOp::Not, name("x")));
        assert_eq!(
            parse("- -1").unwrap(),
            Ast::Unary(UnaryOp::Neg, Box::new(Ast::Unary(UnaryOp::Neg, num(1.0))))
        );
    }

    #[test]
    fn syntax_errors_report_offset() {
        assert_eq!(
            parse("sin(2"),
            Err(CompileError::Syntax {
                offset: 3,
                near: "(2".to_string()
            })
        );
        assert!(matches!(parse("1 +"), Err(CompileError::Syntax { .. })));
        assert!(matches!(parse("x++"), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn rejects_empty_long_and_deep_programs() {
        assert_eq!(parse("   "), Err(CompileError::Empty));
        let long = "1+".repeat(MAX_SOURCE_LEN) + "1";
        assert!(matches!(parse(&long), Err(CompileError::TooLong { .. })));
        let deep = "(".repeat(MAX_NESTING + 1) + "1" + &")".repeat(MAX_NESTING + 1);
        assert_eq!(parse(&deep), Err(CompileError::TooDeep { max: MAX_NESTING }));
    }

    #[test]
    fn long_prefix_chains_parse_without_recursing() {
        let nots = "!".repeat(2000) + "t";
        assert_eq!(
            parse(&nots),
            Err(CompileError::TooComplex {
                max: MAX_TREE_DEPTH
            })
        );

        let ast = parse(&("-".repeat(1) + &" !".repeat(100) + "t")).unwrap();
        let mut depth = 0;
        let mut node = &ast;
        while let Ast::Unary(_, operand) = node {
            depth += 1;
            node = &**operand;
        }
        assert_eq!(depth, 101);
        assert_eq!(*node, Ast::Name("t".to_string()));
    }

    #[test]
    fn long_right_chains_stay_flat_in_the_parser() {
        let assigns = "x=".repeat(900) + "1";
        assert_eq!(
            parse(&assigns),
            Err(CompileError::TooComplex {
                max: MAX_TREE_DEPTH
            })
        );
        let powers = "2**".repeat(600) + "2";
        assert!(matches!(parse(&powers), Err(CompileError::TooComplex { .. })));
        let elses = "t?1:".repeat(400) + "0";
        assert!(matches!(parse(&elses), Err(CompileError::TooComplex { .. })));

        let thens = "t?".repeat(MAX_NESTING + 1) + "1" + &":0".repeat(MAX_NESTING + 1);
        assert_eq!(parse(&thens), Err(CompileError::TooDeep { max: MAX_NESTING }));
    }

    #[test]
    fn else_chains_and_assignments_fold_right() {
        let ast = parse("x = a ? 1 : b ? 2 : 3").unwrap();
        let Ast::Assign(target, None, value) = ast else {
            panic!("expected assignment");
        };
        assert_eq!(target, "x");
        let Ast::Conditional(test, _, otherwise) = *value else {
            panic!("expected conditional");
        };
        assert_eq!(*test, Ast::Name("a".to_string()));
        assert!(matches!(*otherwise, Ast::Conditional(..)));

        assert_eq!(
            parse("2 ** -t").unwrap(),
            Ast::Binary(
                BinaryOp::Pow,
                num(2.0),
                Box::new(Ast::Unary(UnaryOp::Neg, name("t")))
            )
        );
    }
}
