//! Line scanner.
//!
//! Splits template source into logical [`SourceLine`]s. Blank lines are
//! dropped, trailing whitespace is removed and the leading whitespace is
//! kept verbatim as the line's indentation string.
//!
//! A code line (`- ...`, `= ...`, or a tag followed by `= ...`) continues
//! onto the next physical line when its last significant character, after
//! any trailing `#` comment, is a comma. A tag whose attribute parentheses
//! are still open at the end of a line also continues until they close.
//! Continued lines are joined with `\n` and keep the first line's
//! indentation and location.

use std::iter::Enumerate;
use std::str::Split;
use std::sync::Arc;

use crate::ast::line::SourceLine;
use crate::ast::span::Location;
use crate::error::CompileError;

/// Iterator over the logical lines of a template.
///
/// The scanner is `Clone`, so a scan can be restarted from any point by
/// cloning it before advancing.
#[derive(Clone)]
pub struct LineScanner<'a> {
    file: Option<Arc<str>>,
    prefix: &'a str,
    lines: Enumerate<Split<'a, char>>,
    failed: bool,
}

impl<'a> LineScanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            file: None,
            prefix: "",
            lines: source.split('\n').enumerate(),
            failed: false,
        }
    }

    /// Name used in the locations of produced lines.
    pub fn with_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }

    /// Indentation prefix shared by every line of the source, for text cut
    /// out of a larger indented document. It is stripped from each line;
    /// a non-blank line that does not start with it is an indentation
    /// error.
    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    fn location(&self, index: usize, column: usize) -> Location {
        Location::new(self.file.clone(), index + 1, column)
    }

    /// Next physical line that is not blank, with `\r` and trailing
    /// whitespace removed.
    fn next_physical(&mut self) -> Option<(usize, &'a str)> {
        for (index, raw) in self.lines.by_ref() {
            let line = raw.strip_suffix('\r').unwrap_or(raw).trim_end();
            if !line.trim_start().is_empty() {
                return Some((index, line));
            }
        }
        None
    }

    fn scan_line(&mut self, index: usize, line: &'a str) -> Result<SourceLine, CompileError> {
        let prefix_columns = self.prefix.chars().count();
        let Some(line) = line.strip_prefix(self.prefix) else {
            return Err(CompileError::indentation(
                self.location(index, 1),
                "line is not indented by the enclosing template's prefix",
            ));
        };

        let text_start = line.len() - line.trim_start_matches([' ', '\t']).len();
        let (indent, first) = line.split_at(text_start);
        let location = self.location(index, prefix_columns + indent.chars().count() + 1);

        let mut text = first.to_string();
        while let Some(reason) = continuation(&text) {
            match self.next_physical() {
                Some((_, next)) => {
                    text.push('\n');
                    text.push_str(next.trim_start());
                }
                None => {
                    let message = match reason {
                        Continuation::TrailingComma => {
                            "expression continues past the end of the template"
                        }
                        Continuation::OpenAttributes => "unterminated attribute parentheses",
                    };
                    return Err(CompileError::syntax(location, message)
                        .with_hint("a line ending in `,` or an open `(` continues onto the next line"));
                }
            }
        }

        Ok(SourceLine {
            indent: indent.to_string(),
            text,
            location,
        })
    }
}

impl Iterator for LineScanner<'_> {
    type Item = Result<SourceLine, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (index, line) = self.next_physical()?;
        let result = self.scan_line(index, line);
        self.failed = result.is_err();
        Some(result)
    }
}

/// Scan a whole template into logical lines.
pub fn scan(source: &str, file: Option<Arc<str>>) -> Result<Vec<SourceLine>, CompileError> {
    LineScanner::new(source).with_file(file).collect()
}

// ── Continuation detection ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    TrailingComma,
    OpenAttributes,
}

fn continuation(text: &str) -> Option<Continuation> {
    if text.starts_with("-#") {
        return None;
    }
    if text.starts_with('-') || text.starts_with('=') {
        return ends_with_comma(text).then_some(Continuation::TrailingComma);
    }
    if !starts_tag(text) {
        return None;
    }

    let after_head = tag_head_end(text);
    let rest = &text[after_head..];
    if rest.starts_with('(') {
        return match matching_close(rest, 0) {
            None => Some(Continuation::OpenAttributes),
            Some(close) => inline_expression_continues(&rest[close + 1..]),
        };
    }
    inline_expression_continues(rest)
}

fn inline_expression_continues(rest: &str) -> Option<Continuation> {
    let rest = rest.trim_start_matches(['/', '<']);
    (rest.starts_with('=') && ends_with_comma(rest)).then_some(Continuation::TrailingComma)
}

/// Only the last physical line decides; earlier ones may carry their own
/// comments.
fn ends_with_comma(text: &str) -> bool {
    let last = text.rsplit('\n').next().unwrap_or(text);
    strip_comment(last).trim_end().ends_with(',')
}

/// Remove a trailing `#` comment that is outside of string literals.
fn strip_comment(text: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        } else if ch == '#' {
            return &text[..i];
        }
    }
    text
}

// ── Shared lexical helpers ──────────────────────────────────────────────

pub(crate) fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | ':')
}

pub(crate) fn is_shorthand_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-')
}

/// Whether a line starts with `%`, or with `#`/`.` directly followed by a
/// shorthand name.
pub(crate) fn starts_tag(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some('%') => true,
        Some('#') | Some('.') => chars.next().is_some_and(is_shorthand_char),
        _ => false,
    }
}

/// Byte offset just past the tag name and `#id`/`.class` modifiers.
pub(crate) fn tag_head_end(text: &str) -> usize {
    let mut pos = 0;
    if text.starts_with('%') {
        pos = 1;
        pos += text[pos..]
            .find(|c: char| !is_name_char(c))
            .unwrap_or(text.len() - pos);
    }
    while let Some(ch) = text[pos..].chars().next() {
        if ch != '#' && ch != '.' {
            break;
        }
        let name_len = text[pos + 1..]
            .find(|c: char| !is_shorthand_char(c))
            .unwrap_or(text.len() - pos - 1);
        if name_len == 0 {
            break;
        }
        pos += 1 + name_len;
    }
    pos
}

/// Given `text[open]` is an opening bracket, find the byte offset of its
/// matching close, skipping nested brackets, string literals and `#`
/// comments up to the end of their physical line.
pub(crate) fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut in_comment = false;
    let mut escaped = false;
    for (i, ch) in text[open..].char_indices() {
        if in_comment {
            in_comment = ch != '\n';
            continue;
        }
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
            '#' => in_comment = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}
