use super::span::Location;
use super::tree::Arena;

/// A parsed template: the indentation tree with every line classified.
pub type Document = Arena<DirectiveNode>;

#[derive(Debug, Clone)]
pub struct DirectiveNode {
    pub directive: Directive,
    pub location: Location,
}

/// What a single template line means.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// The synthetic document root.
    Root,
    /// `!!!` / `!!! 5`
    Doctype,
    /// `-# ...`: the line and its subtree produce nothing.
    SilentComment,
    /// `/ ...`: optional inline comment text.
    HtmlComment(Option<Text>),
    /// `- ...`: host statement or block opener.
    Code(CodeLine),
    /// `= ...`: escaped host expression output.
    Output(String),
    Tag(Tag),
    /// Plain text, possibly with `$` interpolations.
    Text(Text),
    /// `- @helper(...)` lines handled by the compiler itself.
    Helper(Helper),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeLine {
    pub code: String,
    pub opener: Option<BlockOpener>,
}

/// Host statement forms whose indented children form the statement's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOpener {
    For,
    While,
    If,
    ElseIf,
    Else,
    /// A trailing `do` / `do args` iteration callback.
    Do,
}

impl BlockOpener {
    /// Whether this opener continues a preceding `if` chain.
    pub fn continues_chain(self) -> bool {
        matches!(self, BlockOpener::ElseIf | BlockOpener::Else)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tag {
    pub name: String,
    /// `#id` / `.class` modifiers in source order.
    pub shorthand: Vec<Shorthand>,
    /// Raw text between the attribute parentheses, handed to the host
    /// unparsed.
    pub attributes: Option<String>,
    pub self_closing: bool,
    pub inline_children: bool,
    pub content: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shorthand {
    Id(String),
    Class(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(Text),
    Expression(String),
}

/// Literal text split into verbatim runs and `$` interpolations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Text {
    pub parts: Vec<TextPart>,
}

impl Text {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart::Literal(text.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextPart {
    Literal(String),
    /// Host expression text: either a bare identifier (`$name`) or the
    /// contents of `$( ... )`.
    Interpolation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Helper {
    /// `@include("path", key=expr, ...)`
    Include {
        path: String,
        bindings: Vec<(String, String)>,
    },
    /// `@sourcefile("path")`
    SourceFile(String),
    /// `@cdatafile("path")`
    CdataFile(String),
    /// `@surround(before, after) do`
    Surround { before: String, after: String },
    /// `@precede(before) do`
    Precede(String),
    /// `@succeed(after) do`
    Succeed(String),
}
