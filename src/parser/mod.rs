//! Directive parser, built on [pest](https://pest.rs/).
//!
//! Classifies every line of a [`LineTree`] by its leading sigil and turns
//! it into a [`Directive`]. Tag lines and literal text have internal
//! structure and are parsed with the grammar in `haml.pest`; code lines are
//! kept as opaque host text, apart from recognising block openers and
//! `@helper` calls.
//!
//! Nesting rules that depend only on a line and whether it has children are
//! enforced here. Rules that depend on siblings (`elseif`/`else` chains)
//! are checked by the code generator.

pub(crate) mod expr;

use std::sync::Arc;

use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;
use tracing::trace;

use crate::ast::directive::*;
use crate::ast::span::Location;
use crate::error::CompileError;
use crate::scanner::{LineScanner, matching_close, starts_tag};
use crate::tree::{self, LineTree};

#[derive(Parser)]
#[grammar = "parser/haml.pest"]
struct HamlParser;

const HELPERS: &[&str] = &[
    "include",
    "sourcefile",
    "cdatafile",
    "surround",
    "precede",
    "succeed",
];

/// Scan, build and parse template source into a [`Document`].
pub fn parse_source(source: &str, file: Option<Arc<str>>) -> Result<Document, CompileError> {
    parse(tree::build(LineScanner::new(source).with_file(file))?)
}

/// Classify every line of the tree, keeping its shape.
pub fn parse(tree: LineTree) -> Result<Document, CompileError> {
    tree.try_map(|_, line, children| match line {
        None => Ok(DirectiveNode {
            directive: Directive::Root,
            location: Location::default(),
        }),
        Some(line) => {
            let directive = parse_line(&line.text, &line.location, !children.is_empty())?;
            trace!(line = line.location.line, ?directive, "directive");
            Ok(DirectiveNode {
                directive,
                location: line.location,
            })
        }
    })
}

/// Parse the text of one logical line. `location` is where the text
/// starts; `has_children` says whether indented lines are nested under it.
pub fn parse_line(
    text: &str,
    location: &Location,
    has_children: bool,
) -> Result<Directive, CompileError> {
    let leaf = |what: &str| {
        if has_children {
            Err(illegal_nesting(location, what))
        } else {
            Ok(())
        }
    };

    if let Some(rest) = text.strip_prefix("!!!") {
        let version = rest.trim();
        if !version.is_empty() && version != "5" {
            return Err(
                CompileError::syntax(location.clone(), format!("unsupported doctype `!!! {version}`"))
                    .with_hint("only the HTML5 doctype (`!!!` or `!!! 5`) is supported"),
            );
        }
        leaf("a doctype")?;
        return Ok(Directive::Doctype);
    }

    if text.starts_with("-#") {
        return Ok(Directive::SilentComment);
    }

    if let Some(rest) = text.strip_prefix('/') {
        let comment = rest.trim_start();
        if comment.is_empty() {
            return Ok(Directive::HtmlComment(None));
        }
        leaf("a comment with inline text")?;
        let start = offset_location(location, text, text.len() - comment.len());
        return Ok(Directive::HtmlComment(Some(parse_text(comment, &start)?)));
    }

    if let Some(rest) = text.strip_prefix('-') {
        return parse_code(rest.trim(), location, has_children);
    }

    if let Some(rest) = text.strip_prefix('=') {
        let expr = rest.trim();
        if expr.is_empty() {
            return Err(CompileError::syntax(
                location.clone(),
                "`=` must be followed by an expression",
            ));
        }
        leaf("an `=` output line")?;
        return Ok(Directive::Output(expr.to_string()));
    }

    if starts_tag(text) {
        return parse_tag(text, location, has_children);
    }

    leaf("plain text")?;
    // `\` makes the next character literal. `\$` is left for the text
    // grammar, which treats it as an escaped dollar.
    let offset = match text.strip_prefix('\\') {
        Some(rest) if !rest.starts_with('$') => 1,
        _ => 0,
    };
    let start = offset_location(location, text, offset);
    Ok(Directive::Text(parse_text(&text[offset..], &start)?))
}

fn illegal_nesting(location: &Location, what: &str) -> CompileError {
    CompileError::syntax(
        location.clone(),
        format!("illegal nesting: {what} cannot contain nested lines"),
    )
    .with_hint("only tags without inline content, comments and block statements can have children")
}

/// Location of byte `offset` within `text`, which starts at `location`.
/// Continued lines were joined with `\n`, so offsets past a newline move to
/// the following source line.
fn offset_location(location: &Location, text: &str, offset: usize) -> Location {
    let before = &text[..offset];
    match before.rfind('\n') {
        None => location.at_column(location.column + before.chars().count()),
        Some(newline) => Location::new(
            location.file.clone(),
            location.line + before.matches('\n').count(),
            before[newline + 1..].chars().count() + 1,
        ),
    }
}

fn grammar_error(err: &pest::error::Error<Rule>, input: &str, location: &Location) -> CompileError {
    let pos = match err.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    let at = offset_location(location, input, pos);
    match input.get(pos..).and_then(|rest| rest.chars().next()) {
        Some(ch) => CompileError::syntax(at, format!("unexpected `{ch}` in tag"))
            .with_hint("inline content must be separated from the tag by a space"),
        None => CompileError::syntax(at, "unexpected end of line in tag"),
    }
}

// -- Tags ----------------------------------------------------------------

fn parse_tag(text: &str, location: &Location, has_children: bool) -> Result<Directive, CompileError> {
    let pairs = HamlParser::parse(Rule::tag_line, text)
        .map_err(|e| grammar_error(&e, text, location))?;

    let mut tag = Tag {
        name: "div".to_string(),
        ..Tag::default()
    };

    for pair in pairs.flat_map(Pair::into_inner) {
        match pair.as_rule() {
            Rule::tag_name => tag.name = pair.as_str().to_string(),
            Rule::id_shorthand => tag.shorthand.push(Shorthand::Id(pair.as_str()[1..].to_string())),
            Rule::class_shorthand => {
                tag.shorthand.push(Shorthand::Class(pair.as_str()[1..].to_string()))
            }
            Rule::attribute_text => {
                let attributes = pair.as_str().trim();
                if !attributes.is_empty() {
                    tag.attributes = Some(attributes.to_string());
                }
            }
            Rule::self_close => tag.self_closing = true,
            Rule::inline_marker => tag.inline_children = true,
            Rule::inline_expression => {
                let expr = pair.as_str()[1..].trim();
                if expr.is_empty() {
                    let at = offset_location(location, text, pair.as_span().start());
                    return Err(CompileError::syntax(at, "`=` must be followed by an expression"));
                }
                tag.content = Some(Content::Expression(expr.to_string()));
            }
            Rule::text_body => {
                tag.content = Some(Content::Text(build_text(pair, text, location)?));
            }
            _ => {}
        }
    }

    if tag.self_closing && tag.content.is_some() {
        return Err(CompileError::syntax(
            location.clone(),
            format!("self-closing tag `{}` cannot have content", tag.name),
        ));
    }
    if has_children {
        if tag.self_closing {
            return Err(illegal_nesting(location, "a self-closing tag"));
        }
        if tag.content.is_some() {
            return Err(CompileError::syntax(
                location.clone(),
                "illegal nesting: content can't be both given on the same line and nested",
            )
            .with_hint("move the inline content onto its own nested line"));
        }
    }

    Ok(Directive::Tag(tag))
}

// -- Text ----------------------------------------------------------------

fn parse_text(input: &str, location: &Location) -> Result<Text, CompileError> {
    let pairs = HamlParser::parse(Rule::text_line, input)
        .map_err(|e| grammar_error(&e, input, location))?;

    let mut text = Text::default();
    for body in pairs
        .flat_map(Pair::into_inner)
        .filter(|pair| pair.as_rule() == Rule::text_body)
    {
        text.parts.extend(build_text(body, input, location)?.parts);
    }
    Ok(text)
}

/// Build [`Text`] from a `text_body` pair. Spans are byte offsets into
/// `input`, which starts at `location`.
fn build_text(body: Pair<'_, Rule>, input: &str, location: &Location) -> Result<Text, CompileError> {
    let mut text = Text::default();
    for part in body.into_inner() {
        match part.as_rule() {
            Rule::text_literal | Rule::lone_dollar => push_literal(&mut text, part.as_str()),
            Rule::escaped_dollar => push_literal(&mut text, "$"),
            Rule::interpolated_name | Rule::interpolated_expr => {
                let expr = part.as_str().trim();
                if expr.is_empty() {
                    let at = offset_location(location, input, part.as_span().start());
                    return Err(CompileError::syntax(at, "empty interpolation `$()`"));
                }
                text.parts.push(TextPart::Interpolation(expr.to_string()));
            }
            Rule::unterminated_interpolation => {
                let at = offset_location(location, input, part.as_span().start());
                return Err(CompileError::syntax(
                    at,
                    "unterminated interpolation: `$(` has no matching `)`",
                )
                .with_hint("write `\\$` for a literal dollar sign"));
            }
            _ => {}
        }
    }
    Ok(text)
}

fn push_literal(text: &mut Text, literal: &str) {
    if let Some(TextPart::Literal(last)) = text.parts.last_mut() {
        last.push_str(literal);
    } else {
        text.parts.push(TextPart::Literal(literal.to_string()));
    }
}

// -- Code lines ----------------------------------------------------------

fn parse_code(code: &str, location: &Location, has_children: bool) -> Result<Directive, CompileError> {
    if code.is_empty() {
        return Err(CompileError::syntax(location.clone(), "`-` must be followed by code"));
    }
    if let Some(call) = code.strip_prefix('@') {
        return parse_helper(call, location, has_children).map(Directive::Helper);
    }

    let opener = block_opener(code);
    if has_children && opener.is_none() {
        return Err(CompileError::syntax(
            location.clone(),
            "illegal nesting: only block statements can contain nested lines",
        )
        .with_hint("nest lines under `for`, `while`, `if`, `elseif`, `else` or a call ending in `do`"));
    }

    Ok(Directive::Code(CodeLine {
        code: code.to_string(),
        opener,
    }))
}

fn block_opener(code: &str) -> Option<BlockOpener> {
    let keyword_end = code
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(code.len());
    match &code[..keyword_end] {
        "for" => Some(BlockOpener::For),
        "while" => Some(BlockOpener::While),
        "if" => Some(BlockOpener::If),
        "elseif" => Some(BlockOpener::ElseIf),
        "else" => Some(BlockOpener::Else),
        _ => has_do_block(code).then_some(BlockOpener::Do),
    }
}

/// Whether a call carries a `do` block at the top level:
/// `foreach(xs) do x`.
fn has_do_block(code: &str) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in code.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            'd' if depth == 0 && code[i..].starts_with("do") => {
                let before = code[..i].chars().next_back();
                let after = code[i + 2..].chars().next();
                if before.is_some_and(|c| c.is_whitespace() || c == ')')
                    && after.is_none_or(|c| c.is_whitespace() || c == '(')
                {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

// -- Helpers -------------------------------------------------------------

fn parse_helper(call: &str, location: &Location, has_children: bool) -> Result<Helper, CompileError> {
    let error = |message: String| CompileError::syntax(location.clone(), message);

    let name_end = call
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(call.len());
    let (name, rest) = call.split_at(name_end);
    if !HELPERS.contains(&name) {
        return Err(error(format!("unknown helper `@{name}`")).with_hint(
            "available helpers are @include, @sourcefile, @cdatafile, @surround, @precede and @succeed",
        ));
    }
    if !rest.starts_with('(') {
        return Err(error(format!("expected `(` after `@{name}`")));
    }
    let close = matching_close(rest, 0)
        .ok_or_else(|| error(format!("unterminated arguments to `@{name}`")))?;
    let args = split_arguments(&rest[1..close]);
    let tail = rest[close + 1..].trim();

    if matches!(name, "surround" | "precede" | "succeed") {
        if tail != "do" {
            return Err(error(format!("`@{name}(...)` must be followed by `do`")));
        }
    } else {
        if !tail.is_empty() {
            return Err(error(format!("unexpected `{tail}` after `@{name}(...)`")));
        }
        if has_children {
            return Err(illegal_nesting(location, &format!("`@{name}`")));
        }
    }

    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(error(format!(
                "`@{name}` takes {expected} argument{} but {} were given",
                if expected == 1 { "" } else { "s" },
                args.len()
            )))
        }
    };
    let path_argument = |arg: &str| {
        string_literal(arg)
            .ok_or_else(|| error(format!("`@{name}` expects a string literal path, found `{arg}`")))
    };

    match name {
        "include" => {
            let Some((path, rest)) = args.split_first() else {
                return Err(error("`@include` requires a file path".to_string()));
            };
            let path = path_argument(path)?;
            let bindings = rest
                .iter()
                .map(|arg| {
                    keyword_argument(arg).ok_or_else(|| {
                        error(format!("expected `name=value` in `@include`, found `{arg}`"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Helper::Include { path, bindings })
        }
        "sourcefile" => {
            arity(1)?;
            Ok(Helper::SourceFile(path_argument(&args[0])?))
        }
        "cdatafile" => {
            arity(1)?;
            Ok(Helper::CdataFile(path_argument(&args[0])?))
        }
        "surround" => {
            arity(2)?;
            Ok(Helper::Surround {
                before: args[0].clone(),
                after: args[1].clone(),
            })
        }
        "precede" => {
            arity(1)?;
            Ok(Helper::Precede(args[0].clone()))
        }
        _ => {
            arity(1)?;
            Ok(Helper::Succeed(args[0].clone()))
        }
    }
}

/// Split call arguments at top-level commas.
fn split_arguments(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(text[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        args.push(last.to_string());
    }
    args
}

/// `name=expr`, as long as the `=` is not part of `==`.
fn keyword_argument(arg: &str) -> Option<(String, String)> {
    let name_end = arg
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(arg.len());
    let (name, rest) = arg.split_at(name_end);
    let value = rest.trim_start().strip_prefix('=')?;
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) || value.starts_with('=') {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then(|| (name.to_string(), value.to_string()))
}

/// A plain `"..."` literal without interpolation, unescaped.
fn string_literal(arg: &str) -> Option<String> {
    let inner = arg.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.push(chars.next()?),
            '"' | '$' => return None,
            _ => out.push(ch),
        }
    }
    Some(out)
}
