//! Parser for the reference host's expression language (`expr.pest`).
//!
//! Called lazily by [`Interpreter`](crate::Interpreter) the first time a
//! piece of code is evaluated, so failures surface as
//! [`RenderError`]s of kind
//! [`InvalidExpression`](crate::RenderErrorKind::InvalidExpression).

use std::iter::Peekable;

use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use crate::ast::directive::BlockOpener;
use crate::ast::expr::*;
use crate::ast::span::{Span, Spanned};
use crate::ast::value::Value;
use crate::error::RenderError;

#[derive(Parser)]
#[grammar = "parser/expr.pest"]
struct ExprParser;

pub fn parse_expression(text: &str) -> Result<Expr, RenderError> {
    let entry = parse_entry(Rule::expression, text)?;
    build_expr(first_inner(entry)?)
}

pub fn parse_statement(text: &str) -> Result<Statement, RenderError> {
    let entry = parse_entry(Rule::statement, text)?;
    let pair = first_inner(entry)?;
    match pair.as_rule() {
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let target = build_pattern(next(&mut inner)?)?;
            let op = match next(&mut inner)?.as_str() {
                "+=" => AssignOp::Add,
                "-=" => AssignOp::Sub,
                "*=" => AssignOp::Mul,
                _ => AssignOp::Set,
            };
            if op != AssignOp::Set && !matches!(target, Pattern::Name(_)) {
                return Err(RenderError::invalid_expression(format!(
                    "cannot update `{text}`: only a single name can be updated in place"
                )));
            }
            let value = build_expr(next(&mut inner)?)?;
            Ok(Statement::Assign { target, op, value })
        }
        _ => Ok(Statement::Expr(build_expr(pair)?)),
    }
}

/// Parse the text between a tag's attribute parentheses.
pub fn parse_attributes(text: &str) -> Result<Vec<AttributeEntry>, RenderError> {
    let entry = parse_entry(Rule::attributes, text)?;
    let mut entries = Vec::new();
    for attribute in entry.into_inner().filter(|p| p.as_rule() == Rule::attribute) {
        let pair = first_inner(attribute)?;
        entries.push(match pair.as_rule() {
            Rule::named_entry => {
                let (name, value) = build_named_entry(pair)?;
                AttributeEntry::Named(name, value)
            }
            _ => AttributeEntry::Splat(build_expr(pair)?),
        });
    }
    Ok(entries)
}

/// Parse the opening line of a host block such as `for (k, v) in pairs(d)`.
pub fn parse_block_header(opener: BlockOpener, text: &str) -> Result<BlockHeader, RenderError> {
    let rule = match opener {
        BlockOpener::For => Rule::for_header,
        BlockOpener::While => Rule::while_header,
        BlockOpener::If | BlockOpener::ElseIf => Rule::if_header,
        BlockOpener::Else => Rule::else_header,
        BlockOpener::Do => Rule::do_header,
    };
    let entry = parse_entry(rule, text)?;
    let mut inner = entry
        .into_inner()
        .filter(|p| !matches!(p.as_rule(), Rule::kw_for | Rule::kw_in | Rule::assign_eq))
        .filter(|p| !matches!(p.as_rule(), Rule::kw_while | Rule::kw_if | Rule::kw_elseif))
        .filter(|p| !matches!(p.as_rule(), Rule::kw_else | Rule::kw_do | Rule::EOI));

    match opener {
        BlockOpener::For => {
            let pattern = build_pattern(next(&mut inner)?)?;
            let iterable = build_expr(next(&mut inner)?)?;
            Ok(BlockHeader::For { pattern, iterable })
        }
        BlockOpener::While => Ok(BlockHeader::While(build_expr(next(&mut inner)?)?)),
        BlockOpener::If | BlockOpener::ElseIf => {
            Ok(BlockHeader::Condition(build_expr(next(&mut inner)?)?))
        }
        BlockOpener::Else => Ok(BlockHeader::Else),
        BlockOpener::Do => {
            let (name, args) = build_call(next(&mut inner)?)?;
            let params = inner.map(build_pattern).collect::<Result<_, _>>()?;
            Ok(BlockHeader::Do { name, args, params })
        }
    }
}

fn parse_entry(rule: Rule, text: &str) -> Result<Pair<'_, Rule>, RenderError> {
    let mut pairs = ExprParser::parse(rule, text).map_err(|e| {
        let pos = match e.location {
            InputLocation::Pos(p) => p,
            InputLocation::Span((start, _)) => start,
        };
        let near = text.get(pos..).and_then(|rest| rest.chars().next());
        let message = match near {
            Some(ch) => format!("invalid expression `{text}`: unexpected `{ch}` at offset {pos}"),
            None => format!("invalid expression `{text}`: unexpected end of input"),
        };
        RenderError::invalid_expression(message)
    })?;
    next(&mut pairs)
}

fn next<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>) -> Result<Pair<'i, Rule>, RenderError> {
    pairs
        .next()
        .ok_or_else(|| RenderError::invalid_expression("malformed expression"))
}

fn first_inner(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>, RenderError> {
    next(&mut pair.into_inner())
}

fn pair_span(pair: &Pair<'_, Rule>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

// -- Patterns ------------------------------------------------------------

fn build_pattern(pair: Pair<'_, Rule>) -> Result<Pattern, RenderError> {
    let text = pair.as_str();
    let mut parts: Vec<Pattern> = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier if !text.starts_with('(') => {
                return Ok(Pattern::Name(inner.as_str().to_string()));
            }
            _ => parts.push(build_pattern(inner)?),
        }
    }
    // `(x)` is just `x`; `(x,)` is a one-element tuple.
    let trailing_comma = text
        .trim_end_matches(')')
        .trim_end()
        .ends_with(',');
    if parts.len() == 1 && !trailing_comma {
        return parts
            .pop()
            .ok_or_else(|| RenderError::invalid_expression("malformed pattern"));
    }
    Ok(Pattern::Tuple(parts))
}

// -- Expressions ---------------------------------------------------------

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, RenderError> {
    let mut inner = pair.into_inner();
    let first = build_unary(next(&mut inner)?)?;

    let mut rest = Vec::new();
    while let Some(op_pair) = inner.next() {
        let op = parse_bin_op(op_pair.as_str())?;
        let operand = build_unary(next(&mut inner)?)?;
        rest.push((op, operand));
    }

    Ok(climb(first, &mut rest.into_iter().peekable(), 0))
}

/// Precedence climbing over a flat `operand (op operand)*` list.
fn climb<I>(mut left: Expr, rest: &mut Peekable<I>, min_precedence: u8) -> Expr
where
    I: Iterator<Item = (BinOp, Expr)>,
{
    while let Some(&(op, _)) = rest.peek()
        && op.precedence() >= min_precedence
    {
        let Some((_, mut right)) = rest.next() else {
            break;
        };
        while let Some(&(next_op, _)) = rest.peek()
            && (next_op.precedence() > op.precedence()
                || (next_op.is_right_associative() && next_op.precedence() == op.precedence()))
        {
            let next_min = if next_op.precedence() > op.precedence() {
                op.precedence() + 1
            } else {
                op.precedence()
            };
            right = climb(right, rest, next_min);
        }
        let span = left.span.merge(right.span);
        left = Spanned::new(
            ExprKind::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        );
    }
    left
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Expr, RenderError> {
    let span = pair_span(&pair);
    let mut ops = Vec::new();
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::unary_op => ops.push(if inner.as_str() == "!" {
                UnaryOp::Not
            } else {
                UnaryOp::Neg
            }),
            _ => operand = Some(build_postfix(inner)?),
        }
    }
    let mut expr = operand.ok_or_else(|| RenderError::invalid_expression("missing operand"))?;
    for op in ops.into_iter().rev() {
        expr = Spanned::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(expr),
            },
            span,
        );
    }
    Ok(expr)
}

fn build_postfix(pair: Pair<'_, Rule>) -> Result<Expr, RenderError> {
    let start = pair.as_span().start();
    let mut inner = pair.into_inner();
    let mut expr = build_atom(next(&mut inner)?)?;
    for suffix in inner {
        let span = Span::new(start, suffix.as_span().end());
        let kind = match suffix.as_rule() {
            Rule::index => ExprKind::Index {
                target: Box::new(expr),
                index: Box::new(build_expr(first_inner(suffix)?)?),
            },
            _ => ExprKind::Field {
                target: Box::new(expr),
                name: first_inner(suffix)?.as_str().to_string(),
            },
        };
        expr = Spanned::new(kind, span);
    }
    Ok(expr)
}

fn build_atom(pair: Pair<'_, Rule>) -> Result<Expr, RenderError> {
    let span = pair_span(&pair);
    let kind = match pair.as_rule() {
        Rule::number => {
            let n: f64 = pair.as_str().parse().map_err(|_| {
                RenderError::invalid_expression(format!("invalid number: {}", pair.as_str()))
            })?;
            ExprKind::Literal(Value::Number(n))
        }
        Rule::string => build_string(pair)?,
        Rule::symbol => ExprKind::Literal(Value::String(pair.as_str()[1..].to_string())),
        Rule::literal => ExprKind::Literal(match pair.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Nothing,
        }),
        Rule::array => ExprKind::Array(build_list(pair.into_inner())?),
        Rule::tuple => ExprKind::Tuple(build_list(pair.into_inner())?),
        Rule::named_tuple => ExprKind::NamedTuple(
            pair.into_inner()
                .map(build_named_entry)
                .collect::<Result<_, _>>()?,
        ),
        Rule::paren => return build_expr(first_inner(pair)?),
        Rule::call => {
            let (name, args) = build_call(pair)?;
            ExprKind::Call { name, args }
        }
        Rule::variable => ExprKind::Variable(pair.as_str().trim_start_matches('$').to_string()),
        rule => {
            return Err(RenderError::invalid_expression(format!(
                "unexpected {rule:?} in expression"
            )));
        }
    };
    Ok(Spanned::new(kind, span))
}

fn build_list(pairs: Pairs<'_, Rule>) -> Result<Vec<Expr>, RenderError> {
    pairs.map(build_expr).collect()
}

fn build_named_entry(pair: Pair<'_, Rule>) -> Result<(String, Expr), RenderError> {
    let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::assign_eq);
    let name = next(&mut inner)?.as_str().to_string();
    let value = build_expr(next(&mut inner)?)?;
    Ok((name, value))
}

fn build_call(pair: Pair<'_, Rule>) -> Result<(String, Vec<Expr>), RenderError> {
    let mut inner = pair.into_inner();
    let name = next(&mut inner)?.as_str().to_string();
    Ok((name, build_list(inner)?))
}

fn build_string(pair: Pair<'_, Rule>) -> Result<ExprKind, RenderError> {
    let mut parts: Vec<StringPart> = Vec::new();
    let mut literal = String::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::string_escape => literal.push(unescape(&part.as_str()[1..])),
            Rule::string_text | Rule::string_dollar => literal.push_str(part.as_str()),
            Rule::string_name => {
                let span = pair_span(&part);
                flush(&mut literal, &mut parts);
                let name = part.as_str()[1..].to_string();
                parts.push(StringPart::Expr(Spanned::new(ExprKind::Variable(name), span)));
            }
            _ => {
                flush(&mut literal, &mut parts);
                parts.push(StringPart::Expr(build_expr(first_inner(part)?)?));
            }
        }
    }
    flush(&mut literal, &mut parts);

    match parts.as_slice() {
        [] => Ok(ExprKind::Literal(Value::String(String::new()))),
        [StringPart::Literal(s)] => Ok(ExprKind::Literal(Value::String(s.clone()))),
        _ => Ok(ExprKind::Interpolated(parts)),
    }
}

fn flush(literal: &mut String, parts: &mut Vec<StringPart>) {
    if !literal.is_empty() {
        parts.push(StringPart::Literal(std::mem::take(literal)));
    }
}

fn unescape(escaped: &str) -> char {
    match escaped {
        "n" => '\n',
        "t" => '\t',
        "r" => '\r',
        "0" => '\0',
        other => other.chars().next().unwrap_or('\\'),
    }
}

fn parse_bin_op(s: &str) -> Result<BinOp, RenderError> {
    Ok(match s {
        "=>" => BinOp::Pair,
        "||" => BinOp::Or,
        "&&" => BinOp::And,
        "==" => BinOp::Eq,
        "!=" => BinOp::NotEq,
        "<" => BinOp::Lt,
        ">" => BinOp::Gt,
        "<=" => BinOp::LtEq,
        ">=" => BinOp::GtEq,
        ":" => BinOp::Range,
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        _ => return Err(RenderError::invalid_expression(format!("unknown operator: {s}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderErrorKind;

    fn binary(expr: &Expr) -> (&Expr, BinOp, &Expr) {
        match &expr.node {
            ExprKind::BinaryOp { left, op, right } => (left, *op, right),
            other => panic!("expected binary op, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let (left, op, right) = binary(&expr);
        assert_eq!(op, BinOp::Add);
        assert!(matches!(left.node, ExprKind::Literal(Value::Number(n)) if n == 1.0));
        assert_eq!(binary(right).1, BinOp::Mul);
    }

    #[test]
    fn test_left_associative() {
        let expr = parse_expression("10 - 2 - 3").unwrap();
        let (left, op, _) = binary(&expr);
        assert_eq!(op, BinOp::Sub);
        assert_eq!(binary(left).1, BinOp::Sub);
    }

    #[test]
    fn test_range_binds_looser_than_addition() {
        let expr = parse_expression("1:n+1").unwrap();
        let (_, op, right) = binary(&expr);
        assert_eq!(op, BinOp::Range);
        assert_eq!(binary(right).1, BinOp::Add);
    }

    #[test]
    fn test_pair_is_lowest() {
        let expr = parse_expression(r#""a" => x == 1"#).unwrap();
        let (_, op, right) = binary(&expr);
        assert_eq!(op, BinOp::Pair);
        assert_eq!(binary(right).1, BinOp::Eq);
    }

    #[test]
    fn test_dollar_variable() {
        let expr = parse_expression("$quality").unwrap();
        assert!(matches!(expr.node, ExprKind::Variable(ref n) if n == "quality"));
    }

    #[test]
    fn test_string_interpolation() {
        let expr = parse_expression(r#""a $b $(c + 1) \$d""#).unwrap();
        let ExprKind::Interpolated(parts) = expr.node else {
            panic!("expected interpolation");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[0], StringPart::Literal(s) if s == "a "));
        assert!(matches!(&parts[4], StringPart::Literal(s) if s == " $d"));
    }

    #[test]
    fn test_plain_string_is_literal() {
        let expr = parse_expression(r#""say \"hi\"\n""#).unwrap();
        assert!(matches!(expr.node, ExprKind::Literal(Value::String(ref s)) if s == "say \"hi\"\n"));
    }

    #[test]
    fn test_tuples_and_parens() {
        assert!(matches!(parse_expression("(1, 2)").unwrap().node, ExprKind::Tuple(ref v) if v.len() == 2));
        assert!(matches!(parse_expression("(1,)").unwrap().node, ExprKind::Tuple(ref v) if v.len() == 1));
        assert!(matches!(parse_expression("(1)").unwrap().node, ExprKind::Literal(_)));
        assert!(matches!(parse_expression("(a=1, b=2)").unwrap().node, ExprKind::NamedTuple(ref v) if v.len() == 2));
        assert!(matches!(parse_expression("(a == 1)").unwrap().node, ExprKind::BinaryOp { .. }));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expression("users[1].name").unwrap();
        let ExprKind::Field { target, name } = expr.node else {
            panic!("expected field access");
        };
        assert_eq!(name, "name");
        assert!(matches!(target.node, ExprKind::Index { .. }));
    }

    #[test]
    fn test_statements() {
        assert!(matches!(
            parse_statement("x = 1").unwrap(),
            Statement::Assign { op: AssignOp::Set, target: Pattern::Name(ref n), .. } if n == "x"
        ));
        assert!(matches!(
            parse_statement("total += n").unwrap(),
            Statement::Assign { op: AssignOp::Add, .. }
        ));
        assert!(matches!(
            parse_statement("(a, b) = pair").unwrap(),
            Statement::Assign { target: Pattern::Tuple(ref p), .. } if p.len() == 2
        ));
        assert!(matches!(parse_statement("x == 1").unwrap(), Statement::Expr(_)));
        assert!(parse_statement("(a, b) += 1").is_err());
    }

    #[test]
    fn test_attribute_entries() {
        let entries = parse_attributes(r#"href="/", Symbol("xml:lang") => "en", data=(id=1,)"#).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], AttributeEntry::Named(n, _) if n == "href"));
        assert!(matches!(&entries[1], AttributeEntry::Splat(_)));
        assert!(matches!(&entries[2], AttributeEntry::Named(n, _) if n == "data"));
        assert!(parse_attributes("").unwrap().is_empty());
    }

    #[test]
    fn test_block_headers() {
        let header = parse_block_header(BlockOpener::For, "for (k, v) in pairs(d)").unwrap();
        assert!(matches!(header, BlockHeader::For { pattern: Pattern::Tuple(ref p), .. } if p.len() == 2));

        let header = parse_block_header(BlockOpener::For, "for i = 1:3").unwrap();
        assert!(matches!(header, BlockHeader::For { pattern: Pattern::Name(ref n), .. } if n == "i"));

        let header = parse_block_header(BlockOpener::For, "for x ∈ xs").unwrap();
        assert!(matches!(header, BlockHeader::For { .. }));

        let header = parse_block_header(BlockOpener::ElseIf, "elseif n > 1").unwrap();
        assert!(matches!(header, BlockHeader::Condition(_)));

        assert!(matches!(
            parse_block_header(BlockOpener::Else, "else").unwrap(),
            BlockHeader::Else
        ));

        let header = parse_block_header(BlockOpener::Do, "foreach(xs) do x").unwrap();
        let BlockHeader::Do { name, args, params } = header else {
            panic!("expected do header");
        };
        assert_eq!(name, "foreach");
        assert_eq!(args.len(), 1);
        assert_eq!(params, vec![Pattern::Name("x".into())]);
    }

    #[test]
    fn test_keywords_are_not_names() {
        assert!(parse_expression("information + index").is_ok());
        assert!(parse_expression("for").is_err());
    }

    #[test]
    fn test_comments_are_ignored() {
        assert!(parse_expression("1 + 2 # three").is_ok());
    }

    #[test]
    fn test_invalid_expression() {
        let err = parse_expression("1 +").unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::InvalidExpression);
        assert!(err.message.contains("1 +"));
    }
}
