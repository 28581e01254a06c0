//! Code generator.
//!
//! Walks a parsed [`Document`] depth-first and produces the [`CodeOp`]
//! sequence a compiled template executes. Everything that can be decided
//! at compile time is: tags without attribute expressions become literal
//! text, `@include`d templates are spliced in place and `@sourcefile` /
//! `@cdatafile` contents are read once and stored as literals.
//!
//! Layout follows the source tree. Each block-level item is preceded by a
//! [`CodeOp::LineBreak`] at its depth; inline content, `<` tags and the
//! bodies of `@surround`-style helpers are generated in inline mode, which
//! emits no line breaks at all.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::ast::directive::*;
use crate::ast::span::Location;
use crate::ast::tree::NodeId;
use crate::attrs::{format_attributes, resolve_shorthand};
use crate::error::CompileError;
use crate::parser::parse_source;
use crate::render::escape::wrap_cdata;

/// Host expression text and the template location it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub text: String,
    pub location: Location,
}

impl Code {
    pub fn new(text: impl Into<String>, location: &Location) -> Self {
        Self {
            text: text.into(),
            location: location.clone(),
        }
    }
}

/// One executable unit of a compiled template.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeOp {
    /// Write text verbatim.
    EmitLiteral(String),
    /// Start a new output line indented to the given depth. Writes nothing
    /// when it is the very first output.
    LineBreak(usize),
    /// Evaluate, convert to text, escape and write.
    EmitExpression(Code),
    /// Evaluate an attribute expression and write the resolved attributes.
    EmitAttributes(AttributeSet),
    /// Run a host statement for its effect.
    Execute(Code),
    /// Hand a control-flow construct and its bodies to the host.
    EnterHostBlock(HostBlock),
    /// Evaluate bindings and run the body with them in scope.
    EnterScope(Scope),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSet {
    pub shorthand: Vec<Shorthand>,
    pub expression: Code,
}

/// A block statement such as `for`, `while` or a `do` call. An `if` chain
/// is one block with a clause per branch.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBlock {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub opener: BlockOpener,
    /// The full opening line, e.g. `for x in xs` or `elseif n > 1`.
    pub header: Code,
    pub body: Vec<CodeOp>,
}

/// The body of an included template with its `name=expr` bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub bindings: Vec<(String, Code)>,
    pub body: Vec<CodeOp>,
}

/// Where included and embedded files come from.
pub trait IncludeSource {
    /// The parsed template at canonical `path`.
    fn document(&self, path: &Path) -> Result<Arc<Document>, CompileError>;

    /// Raw contents of a file embedded with `@sourcefile` or `@cdatafile`.
    fn contents(&self, path: &Path) -> io::Result<String>;
}

/// Reads every file from disk, without caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystem;

impl IncludeSource for FileSystem {
    fn document(&self, path: &Path) -> Result<Arc<Document>, CompileError> {
        load_document(path).map(Arc::new)
    }

    fn contents(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Read and parse a template file. Locations in the result name the file.
pub fn load_document(path: &Path) -> Result<Document, CompileError> {
    let name: Arc<str> = Arc::from(path.display().to_string());
    let text = std::fs::read_to_string(path).map_err(|e| {
        CompileError::include(
            Location::new(Some(name.clone()), 1, 1),
            format!("cannot read `{}`: {e}", path.display()),
        )
    })?;
    parse_source(&text, Some(name))
}

#[derive(Debug, Clone, Copy)]
struct Mode {
    depth: usize,
    inline: bool,
}

impl Mode {
    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn inline(self) -> Self {
        Self {
            inline: true,
            ..self
        }
    }
}

#[derive(Default)]
struct Ops(Vec<CodeOp>);

impl Ops {
    fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(CodeOp::EmitLiteral(last)) = self.0.last_mut() {
            last.push_str(text);
        } else {
            self.0.push(CodeOp::EmitLiteral(text.to_string()));
        }
    }

    fn line_break(&mut self, mode: Mode) {
        if !mode.inline {
            self.0.push(CodeOp::LineBreak(mode.depth));
        }
    }

    fn push(&mut self, op: CodeOp) {
        self.0.push(op);
    }
}

/// Turns documents into [`CodeOp`] sequences.
pub struct Generator<'s> {
    source: &'s dyn IncludeSource,
    base_dir: Option<PathBuf>,
    /// Canonical paths of the files being generated, outermost first.
    files: Vec<PathBuf>,
}

impl<'s> Generator<'s> {
    pub fn new(source: &'s dyn IncludeSource) -> Self {
        Self {
            source,
            base_dir: None,
            files: Vec::new(),
        }
    }

    /// Directory for relative paths when the document has no file.
    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// Canonical path of the document's own file.
    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.files.extend(file);
        self
    }

    #[instrument(skip_all, fields(nodes = document.len()))]
    pub fn generate(mut self, document: &Document) -> Result<Vec<CodeOp>, CompileError> {
        let mut ops = Ops::default();
        let mode = Mode {
            depth: 0,
            inline: false,
        };
        self.block(document, document.children(document.root()), mode, &mut ops)?;
        debug!(ops = ops.0.len(), "generated");
        Ok(ops.0)
    }

    fn block(
        &mut self,
        doc: &Document,
        children: &[NodeId],
        mode: Mode,
        ops: &mut Ops,
    ) -> Result<(), CompileError> {
        let mut index = 0;
        while index < children.len() {
            let id = children[index];
            let node = &doc.get(id).value;

            if let Directive::Code(CodeLine {
                opener: Some(opener),
                ..
            }) = &node.directive
            {
                if opener.continues_chain() {
                    return Err(CompileError::syntax(
                        node.location.clone(),
                        "`elseif`/`else` without a preceding `if`",
                    ));
                }
                let mut clauses = vec![self.clause(doc, id, *opener, mode)?];
                if *opener == BlockOpener::If {
                    while let Some(&next) = children.get(index + 1)
                        && let Directive::Code(CodeLine {
                            opener: Some(next_opener),
                            ..
                        }) = &doc.get(next).value.directive
                        && next_opener.continues_chain()
                    {
                        clauses.push(self.clause(doc, next, *next_opener, mode)?);
                        index += 1;
                        if *next_opener == BlockOpener::Else {
                            break;
                        }
                    }
                }
                ops.push(CodeOp::EnterHostBlock(HostBlock { clauses }));
            } else {
                self.node(doc, id, mode, ops)?;
            }
            index += 1;
        }
        Ok(())
    }

    fn clause(
        &mut self,
        doc: &Document,
        id: NodeId,
        opener: BlockOpener,
        mode: Mode,
    ) -> Result<Clause, CompileError> {
        let node = &doc.get(id).value;
        let Directive::Code(line) = &node.directive else {
            return Err(CompileError::syntax(node.location.clone(), "expected a block statement"));
        };
        let mut body = Ops::default();
        self.block(doc, doc.children(id), mode, &mut body)?;
        Ok(Clause {
            opener,
            header: Code::new(&line.code, &node.location),
            body: body.0,
        })
    }

    fn node(&mut self, doc: &Document, id: NodeId, mode: Mode, ops: &mut Ops) -> Result<(), CompileError> {
        let node = &doc.get(id).value;
        let location = &node.location;
        let children = doc.children(id);

        match &node.directive {
            Directive::Root | Directive::SilentComment => {}
            Directive::Doctype => {
                ops.line_break(mode);
                ops.literal("<!DOCTYPE html>");
            }
            Directive::HtmlComment(Some(text)) => {
                ops.line_break(mode);
                ops.literal("<!-- ");
                emit_text(text, location, ops);
                ops.literal(" -->");
            }
            Directive::HtmlComment(None) if children.is_empty() => {}
            Directive::HtmlComment(None) => {
                ops.line_break(mode);
                ops.literal("<!--");
                if mode.inline {
                    self.block(doc, children, mode, ops)?;
                } else if !children.is_empty() {
                    self.block(doc, children, mode.nested(), ops)?;
                    ops.line_break(mode);
                }
                ops.literal("-->");
            }
            Directive::Code(line) => {
                // Block openers are handled by `block`.
                ops.push(CodeOp::Execute(Code::new(&line.code, location)));
            }
            Directive::Output(expr) => {
                ops.line_break(mode);
                ops.push(CodeOp::EmitExpression(Code::new(expr, location)));
            }
            Directive::Text(text) => {
                ops.line_break(mode);
                emit_text(text, location, ops);
            }
            Directive::Tag(tag) => self.tag(doc, id, tag, location, mode, ops)?,
            Directive::Helper(helper) => self.helper(doc, id, helper, location, mode, ops)?,
        }
        Ok(())
    }

    fn tag(
        &mut self,
        doc: &Document,
        id: NodeId,
        tag: &Tag,
        location: &Location,
        mode: Mode,
        ops: &mut Ops,
    ) -> Result<(), CompileError> {
        ops.line_break(mode);
        ops.literal(&format!("<{}", tag.name));
        match &tag.attributes {
            None => ops.literal(&format_attributes(&resolve_shorthand(&tag.shorthand))),
            Some(expression) => ops.push(CodeOp::EmitAttributes(AttributeSet {
                shorthand: tag.shorthand.clone(),
                expression: Code::new(expression, location),
            })),
        }
        let empty_void = tag.content.is_none()
            && doc.children(id).is_empty()
            && is_void_element(&tag.name);
        if tag.self_closing || empty_void {
            ops.literal(" />");
            return Ok(());
        }
        ops.literal(">");

        match &tag.content {
            Some(Content::Text(text)) => emit_text(text, location, ops),
            Some(Content::Expression(expr)) => {
                ops.push(CodeOp::EmitExpression(Code::new(expr, location)))
            }
            None => {
                let children = doc.children(id);
                if mode.inline || tag.inline_children {
                    self.block(doc, children, mode.inline(), ops)?;
                } else if !children.is_empty() {
                    self.block(doc, children, mode.nested(), ops)?;
                    ops.line_break(mode);
                }
            }
        }

        ops.literal(&format!("</{}>", tag.name));
        Ok(())
    }

    fn helper(
        &mut self,
        doc: &Document,
        id: NodeId,
        helper: &Helper,
        location: &Location,
        mode: Mode,
        ops: &mut Ops,
    ) -> Result<(), CompileError> {
        match helper {
            Helper::Include { path, bindings } => {
                let file = self.resolve(path, location)?;
                if self.files.contains(&file) {
                    return Err(CompileError::include(
                        location.clone(),
                        format!("include cycle: `{}` is already being included", file.display()),
                    )
                    .with_hint(self.include_chain(&file)));
                }
                debug!(path = %file.display(), "splicing include");
                let included = self.source.document(&file)?;

                self.files.push(file);
                let mut body = Ops::default();
                let result = self.block(&included, included.children(included.root()), mode, &mut body);
                self.files.pop();
                result?;

                ops.push(CodeOp::EnterScope(Scope {
                    bindings: bindings
                        .iter()
                        .map(|(name, expr)| (name.clone(), Code::new(expr, location)))
                        .collect(),
                    body: body.0,
                }));
            }
            Helper::SourceFile(path) => {
                let contents = self.embed(path, location)?;
                ops.line_break(mode);
                ops.literal(&contents);
            }
            Helper::CdataFile(path) => {
                let contents = self.embed(path, location)?;
                ops.line_break(mode);
                ops.literal(&wrap_cdata(&contents));
            }
            Helper::Surround { before, after } => {
                self.wrapped(doc, id, Some(before.as_str()), Some(after.as_str()), location, mode, ops)?
            }
            Helper::Precede(before) => {
                self.wrapped(doc, id, Some(before.as_str()), None, location, mode, ops)?
            }
            Helper::Succeed(after) => {
                self.wrapped(doc, id, None, Some(after.as_str()), location, mode, ops)?
            }
        }
        Ok(())
    }

    /// A block rendered inline between optional expressions.
    #[allow(clippy::too_many_arguments)]
    fn wrapped(
        &mut self,
        doc: &Document,
        id: NodeId,
        before: Option<&str>,
        after: Option<&str>,
        location: &Location,
        mode: Mode,
        ops: &mut Ops,
    ) -> Result<(), CompileError> {
        ops.line_break(mode);
        if let Some(before) = before {
            ops.push(CodeOp::EmitExpression(Code::new(before, location)));
        }
        self.block(doc, doc.children(id), mode.inline(), ops)?;
        if let Some(after) = after {
            ops.push(CodeOp::EmitExpression(Code::new(after, location)));
        }
        Ok(())
    }

    fn embed(&self, path: &str, location: &Location) -> Result<String, CompileError> {
        let file = self.resolve(path, location)?;
        debug!(path = %file.display(), "embedding file");
        self.source.contents(&file).map_err(|e| {
            CompileError::include(location.clone(), format!("cannot read `{path}`: {e}"))
        })
    }

    /// Canonical path of `path`, relative to the current file's directory.
    fn resolve(&self, path: &str, location: &Location) -> Result<PathBuf, CompileError> {
        let relative = Path::new(path);
        let full = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            let dir = self
                .files
                .last()
                .and_then(|file| file.parent())
                .map(Path::to_path_buf)
                .or_else(|| self.base_dir.clone())
                .unwrap_or_default();
            dir.join(relative)
        };
        full.canonicalize().map_err(|e| {
            CompileError::include(
                location.clone(),
                format!("cannot resolve `{path}` ({}): {e}", full.display()),
            )
        })
    }

    fn include_chain(&self, repeated: &Path) -> String {
        let chain: Vec<String> = self
            .files
            .iter()
            .map(|f| f.display().to_string())
            .chain(std::iter::once(repeated.display().to_string()))
            .collect();
        format!("include chain: {}", chain.join(" -> "))
    }
}

/// HTML elements that never have an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|void| void.eq_ignore_ascii_case(name))
}

fn emit_text(text: &Text, location: &Location, ops: &mut Ops) {
    for part in &text.parts {
        match part {
            TextPart::Literal(literal) => ops.literal(literal),
            TextPart::Interpolation(expr) => {
                ops.push(CodeOp::EmitExpression(Code::new(expr, location)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn generate(source: &str) -> Result<Vec<CodeOp>, CompileError> {
        let document = parse_source(source, None)?;
        Generator::new(&FileSystem).generate(&document)
    }

    fn lit(text: &str) -> CodeOp {
        CodeOp::EmitLiteral(text.to_string())
    }

    fn expr(op: &CodeOp) -> &str {
        match op {
            CodeOp::EmitExpression(code) => &code.text,
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn test_static_tag_is_one_literal() {
        let ops = generate("%p Hello, world!").unwrap();
        assert_eq!(ops, vec![CodeOp::LineBreak(0), lit("<p>Hello, world!</p>")]);
    }

    #[test]
    fn test_nested_tags_break_lines() {
        let ops = generate("%ul\n  %li a\n  %li b").unwrap();
        assert_eq!(
            ops,
            vec![
                CodeOp::LineBreak(0),
                lit("<ul>"),
                CodeOp::LineBreak(1),
                lit("<li>a</li>"),
                CodeOp::LineBreak(1),
                lit("<li>b</li>"),
                CodeOp::LineBreak(0),
                lit("</ul>"),
            ]
        );
    }

    #[test]
    fn test_inline_children_marker() {
        let ops = generate("%p<\n  %b bold\n  text").unwrap();
        assert_eq!(ops, vec![CodeOp::LineBreak(0), lit("<p><b>bold</b>text</p>")]);
    }

    #[test]
    fn test_shorthand_attributes_are_static() {
        let ops = generate("#main.a.b").unwrap();
        assert_eq!(
            ops,
            vec![CodeOp::LineBreak(0), lit(r#"<div id="main" class="a b"></div>"#)]
        );
    }

    #[test]
    fn test_attribute_expression_is_deferred() {
        let ops = generate(r#"%a.nav(href="/") Home"#).unwrap();
        match &ops[2] {
            CodeOp::EmitAttributes(set) => {
                assert_eq!(set.shorthand, vec![Shorthand::Class("nav".to_string())]);
                assert_eq!(set.expression.text, r#"href="/""#);
                assert_eq!(set.expression.location.line, 1);
            }
            other => panic!("expected attributes, got {other:?}"),
        }
        assert_eq!(ops[1], lit("<a"));
        assert_eq!(ops[3], lit(">Home</a>"));
    }

    #[test]
    fn test_interpolation_becomes_expression() {
        let ops = generate("%p This is $quality cake!").unwrap();
        assert_eq!(ops[1], lit("<p>This is "));
        assert_eq!(expr(&ops[2]), "quality");
        assert_eq!(ops[3], lit(" cake!</p>"));
    }

    #[test]
    fn test_for_loop_body_stays_at_code_depth() {
        let ops = generate("%ul\n  - for i in 1:2\n    %li= i").unwrap();
        let CodeOp::EnterHostBlock(block) = &ops[2] else {
            panic!("expected host block, got {:?}", ops[2]);
        };
        assert_eq!(block.clauses.len(), 1);
        let clause = &block.clauses[0];
        assert_eq!(clause.opener, BlockOpener::For);
        assert_eq!(clause.header.text, "for i in 1:2");
        assert_eq!(clause.body[0], CodeOp::LineBreak(1));
        assert_eq!(clause.body[1], lit("<li>"));
        assert_eq!(expr(&clause.body[2]), "i");
    }

    #[test]
    fn test_if_chain_is_one_block() {
        let ops = generate("- if a\n  %p a\n- elseif b\n  %p b\n- else\n  %p c\n%p after").unwrap();
        let CodeOp::EnterHostBlock(block) = &ops[0] else {
            panic!("expected host block");
        };
        let openers: Vec<_> = block.clauses.iter().map(|c| c.opener).collect();
        assert_eq!(
            openers,
            vec![BlockOpener::If, BlockOpener::ElseIf, BlockOpener::Else]
        );
        assert_eq!(ops[1], CodeOp::LineBreak(0));
        assert_eq!(ops[2], lit("<p>after</p>"));
    }

    #[test]
    fn test_orphan_else_is_error() {
        let err = generate("%p x\n- else\n  %p y").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert_eq!(err.location.line, 2);

        let err = generate("- if a\n  %p\n- else\n  %p\n- else\n  %p").unwrap_err();
        assert_eq!(err.location.line, 5);
    }

    #[test]
    fn test_silent_comment_produces_nothing() {
        let ops = generate("-# hidden\n  %p never\n%p shown").unwrap();
        assert_eq!(ops, vec![CodeOp::LineBreak(0), lit("<p>shown</p>")]);
    }

    #[test]
    fn test_comments() {
        let ops = generate("/ note\n/\n  %p x").unwrap();
        assert_eq!(
            ops,
            vec![
                CodeOp::LineBreak(0),
                lit("<!-- note -->"),
                CodeOp::LineBreak(0),
                lit("<!--"),
                CodeOp::LineBreak(1),
                lit("<p>x</p>"),
                CodeOp::LineBreak(0),
                lit("-->"),
            ]
        );
    }

    #[test]
    fn test_surround_renders_inline() {
        let ops = generate("- @surround(\"(\", \")\") do\n  %a(href=u) link").unwrap();
        assert_eq!(ops[0], CodeOp::LineBreak(0));
        assert_eq!(expr(&ops[1]), "\"(\"");
        assert_eq!(ops[2], lit("<a"));
        assert!(matches!(ops[3], CodeOp::EmitAttributes(_)));
        assert_eq!(ops[4], lit(">link</a>"));
        assert_eq!(expr(&ops[5]), "\")\"");
    }

    #[test]
    fn test_doctype_and_self_closing() {
        let ops = generate("!!! 5\n%br/").unwrap();
        assert_eq!(
            ops,
            vec![
                CodeOp::LineBreak(0),
                lit("<!DOCTYPE html>"),
                CodeOp::LineBreak(0),
                lit("<br />"),
            ]
        );
    }

    #[test]
    fn test_missing_include_is_include_error() {
        let err = generate("- @include(\"does/not/exist.hamljl\")").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Include);
        assert!(err.message.contains("does/not/exist.hamljl"));
    }
}
