//! Indentation tree builder.
//!
//! Groups logical lines into parent/child nesting using a stack of open
//! ancestors. A line closes every open node whose indentation is not a
//! strict prefix of its own; the remaining top of the stack becomes its
//! parent. Indentation strings are compared as raw strings, so a tab and
//! two spaces never match each other.
//!
//! Every child of a node must use exactly the same indentation string as
//! that node's first child. Anything else is an indentation error.

use tracing::trace;

use crate::ast::line::SourceLine;
use crate::ast::tree::{Arena, NodeId};
use crate::error::CompileError;

/// The structural tree of source lines. The root carries no line.
pub type LineTree = Arena<Option<SourceLine>>;

pub fn build<I>(lines: I) -> Result<LineTree, CompileError>
where
    I: IntoIterator<Item = Result<SourceLine, CompileError>>,
{
    let mut tree: LineTree = Arena::with_root(None);
    let mut open: Vec<(String, NodeId)> = Vec::new();

    for line in lines {
        let line = line?;

        while let Some((indent, _)) = open.last() {
            if line.indent.len() > indent.len() && line.indent.starts_with(indent.as_str()) {
                break;
            }
            open.pop();
        }
        let parent = open.last().map(|(_, id)| *id).unwrap_or(tree.root());

        check_sibling_indent(&tree, parent, &line)?;

        trace!(
            line = line.location.line,
            depth = open.len(),
            text = %line.text,
            "tree node"
        );
        let indent = line.indent.clone();
        let id = tree.push_child(parent, Some(line));
        open.push((indent, id));
    }

    Ok(tree)
}

fn check_sibling_indent(
    tree: &LineTree,
    parent: NodeId,
    line: &SourceLine,
) -> Result<(), CompileError> {
    let expected = match tree.children(parent).first() {
        Some(&sibling) => tree.get(sibling).value.as_ref().map(|l| l.indent.as_str()),
        None if parent == tree.root() => Some(""),
        None => None,
    };

    match expected {
        Some(expected) if expected != line.indent => {
            let location = line.location.at_column(1);
            let err = if parent == tree.root() && tree.children(parent).is_empty() {
                CompileError::indentation(location, "the first line must not be indented")
            } else {
                CompileError::indentation(
                    location,
                    format!(
                        "inconsistent indentation: expected {} but found {}",
                        describe(expected),
                        describe(&line.indent)
                    ),
                )
            };
            Err(err.with_hint(
                "every line in a block must use the same indentation, and dedents must return to an enclosing level",
            ))
        }
        _ => Ok(()),
    }
}

fn describe(indent: &str) -> String {
    let spaces = indent.chars().filter(|c| *c == ' ').count();
    let tabs = indent.chars().filter(|c| *c == '\t').count();
    let plural = |n: usize, word: &str| format!("{n} {word}{}", if n == 1 { "" } else { "s" });
    match (spaces, tabs) {
        (0, 0) => "no indentation".to_string(),
        (s, 0) => plural(s, "space"),
        (0, t) => plural(t, "tab"),
        (s, t) => format!("{} and {}", plural(s, "space"), plural(t, "tab")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::scanner::LineScanner;

    fn tree(source: &str) -> Result<LineTree, CompileError> {
        build(LineScanner::new(source))
    }

    fn text(tree: &LineTree, id: NodeId) -> &str {
        &tree.get(id).value.as_ref().unwrap().text
    }

    #[test]
    fn test_nesting() {
        let t = tree("%html\n  %body\n    %p a\n    %p b\n  %footer").unwrap();
        let top = t.children(t.root());
        assert_eq!(top.len(), 1);
        let html = top[0];
        let kids = t.children(html);
        assert_eq!(kids.len(), 2);
        assert_eq!(text(&t, kids[0]), "%body");
        assert_eq!(text(&t, kids[1]), "%footer");
        assert_eq!(t.children(kids[0]).len(), 2);
        assert_eq!(t.get(kids[0]).parent, Some(html));
    }

    #[test]
    fn test_dedent_to_root() {
        let t = tree("%a\n  %b\n    %c\n%d").unwrap();
        assert_eq!(t.children(t.root()).len(), 2);
    }

    #[test]
    fn test_any_deeper_indent_opens_a_block() {
        let t = tree("%a\n     %b\n%c\n\t%d").unwrap();
        let top = t.children(t.root());
        assert_eq!(t.children(top[0]).len(), 1);
        assert_eq!(t.children(top[1]).len(), 1);
    }

    #[test]
    fn test_inconsistent_dedent_is_error() {
        let err = tree("%a\n    %b\n  %c").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert_eq!(err.location.line, 3);
        assert!(err.message.contains("expected 4 spaces but found 2 spaces"));
    }

    #[test]
    fn test_tab_and_spaces_do_not_mix_between_siblings() {
        let err = tree("%ul\n  %li a\n\t%li b").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert!(err.message.contains("1 tab"));
    }

    #[test]
    fn test_indented_first_line_is_error() {
        let err = tree("  %p").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert_eq!(err.location.line, 1);
    }

    #[test]
    fn test_scanner_errors_propagate() {
        let err = tree("%p\n%a(href=1").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
    }
}
