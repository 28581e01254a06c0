use std::fmt;
use std::sync::Arc;

/// Byte-offset range into expression text.
///
/// Carried by host-expression AST nodes so that evaluation errors can point
/// back at the piece of the expression that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one covering both ranges
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Wraps any AST node with its source span.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// A position in template source: optional file name plus 1-based line and
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: Option<Arc<str>>,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: Option<Arc<str>>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }

    /// The same line, shifted to another column.
    pub fn at_column(&self, column: usize) -> Self {
        Self {
            file: self.file.clone(),
            line: self.line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}
