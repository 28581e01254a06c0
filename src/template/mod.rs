//! Compiled templates and their options.
//!
//! A [`CompiledTemplate`] is the immutable [`CodeOp`] sequence produced by
//! compiling template source once. It can be rendered any number of times,
//! concurrently, each render with its own [`Host`] and output sink.

mod loader;

pub use loader::TemplateLoader;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::instrument;

use crate::ast::directive::Document;
use crate::ast::span::Location;
use crate::codegen::{CodeOp, FileSystem, Generator, IncludeSource};
use crate::error::{CompileError, RenderError};
use crate::parser::parse_source;
use crate::render::{FmtSink, FnSink, Host, IoSink, Renderer, Sink};

// ── Options ─────────────────────────────────────────────────────────────

/// Settings that affect compilation.
///
/// ```rust
/// use haml_lang::CompileOptions;
///
/// let opts = CompileOptions::new()
///     .base_dir("templates")
///     .indent_step("\t");
/// ```
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// The file the source was read from. Used in error locations and as
    /// the directory for relative `@include` paths.
    pub file: Option<PathBuf>,
    /// Directory for relative paths when there is no `file`. Defaults to
    /// the working directory.
    pub base_dir: Option<PathBuf>,
    /// Indentation added per nesting level in the output.
    pub indent_step: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            file: None,
            base_dir: None,
            indent_step: "  ".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn indent_step(mut self, step: impl Into<String>) -> Self {
        self.indent_step = step.into();
        self
    }
}

/// Settings for a single render.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Written at the start of every output line after the first, so the
    /// output can be embedded in an already indented document.
    pub indent: String,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent(mut self, indent: impl Into<String>) -> Self {
        self.indent = indent.into();
        self
    }
}

// ── Source ──────────────────────────────────────────────────────────────

/// Template text together with where it came from.
#[derive(Debug, Clone)]
pub struct Source {
    /// Name shown in error locations.
    pub name: Option<Arc<str>>,
    pub path: Option<PathBuf>,
    pub text: String,
}

impl Source {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            name: None,
            path: None,
            text: text.into(),
        }
    }

    pub fn named(name: &str, text: impl Into<String>) -> Self {
        Self {
            name: Some(Arc::from(name)),
            path: None,
            text: text.into(),
        }
    }

    /// Read a template file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CompileError> {
        let path = path.as_ref();
        let name: Arc<str> = Arc::from(path.display().to_string());
        let text = std::fs::read_to_string(path).map_err(|e| {
            CompileError::include(
                Location::new(Some(name.clone()), 1, 1),
                format!("cannot read `{}`: {e}", path.display()),
            )
        })?;
        Ok(Self {
            name: Some(name),
            path: Some(path.to_path_buf()),
            text,
        })
    }

    pub fn parse(&self) -> Result<Document, CompileError> {
        parse_source(&self.text, self.name.clone())
    }
}

// ── Compiled template ───────────────────────────────────────────────────

/// A template compiled once and rendered many times.
///
/// ```rust
/// use haml_lang::{Bindings, CompiledTemplate, Interpreter, Registry};
///
/// let template = CompiledTemplate::compile("%p Hello, $name!").unwrap();
/// let registry = Registry::with_builtins();
///
/// let mut host = Interpreter::new(&registry, Bindings::new().with("name", "world"));
/// assert_eq!(template.render(&mut host).unwrap(), "<p>Hello, world!</p>");
/// ```
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    name: Option<Arc<str>>,
    ops: Arc<[CodeOp]>,
    indent_step: String,
}

impl CompiledTemplate {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        Self::compile_with_options(source, &CompileOptions::default())
    }

    pub fn compile_with_options(source: &str, options: &CompileOptions) -> Result<Self, CompileError> {
        let source = Source {
            name: options
                .file
                .as_ref()
                .map(|path| Arc::from(path.display().to_string())),
            path: options.file.clone(),
            text: source.to_string(),
        };
        Self::compile_source(&source, options)
    }

    pub fn compile_source(source: &Source, options: &CompileOptions) -> Result<Self, CompileError> {
        Self::compile_document(&source.parse()?, source.name.clone(), options, &FileSystem)
    }

    #[instrument(skip_all, fields(name = name.as_deref()))]
    pub(crate) fn compile_document(
        document: &Document,
        name: Option<Arc<str>>,
        options: &CompileOptions,
        includes: &dyn IncludeSource,
    ) -> Result<Self, CompileError> {
        let file = options.file.as_ref().and_then(|f| f.canonicalize().ok());
        let ops = Generator::new(includes)
            .with_base_dir(options.base_dir.clone())
            .with_file(file)
            .generate(document)?;
        Ok(Self {
            name,
            ops: ops.into(),
            indent_step: options.indent_step.clone(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ops(&self) -> &[CodeOp] {
        &self.ops
    }

    /// Render to a new string.
    pub fn render(&self, host: &mut dyn Host) -> Result<String, RenderError> {
        self.render_with_options(host, &RenderOptions::default())
    }

    pub fn render_with_options(
        &self,
        host: &mut dyn Host,
        options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render_sink(&mut out, host, options)?;
        Ok(out)
    }

    /// Render into any [`fmt::Write`], returning the number of bytes written.
    pub fn render_to<W: fmt::Write + ?Sized>(
        &self,
        out: &mut W,
        host: &mut dyn Host,
        options: &RenderOptions,
    ) -> Result<usize, RenderError> {
        self.render_sink(&mut FmtSink(out), host, options)
    }

    /// Render into any [`io::Write`], returning the number of bytes written.
    pub fn render_io<W: io::Write + ?Sized>(
        &self,
        out: &mut W,
        host: &mut dyn Host,
        options: &RenderOptions,
    ) -> Result<usize, RenderError> {
        self.render_sink(&mut IoSink(out), host, options)
    }

    /// Stream output chunks to `callback` as they are produced.
    pub fn render_with<F>(
        &self,
        callback: F,
        host: &mut dyn Host,
        options: &RenderOptions,
    ) -> Result<usize, RenderError>
    where
        F: FnMut(&str) -> Result<(), RenderError>,
    {
        self.render_sink(&mut FnSink(callback), host, options)
    }

    #[instrument(skip_all, fields(name = self.name.as_deref()))]
    pub fn render_sink(
        &self,
        sink: &mut dyn Sink,
        host: &mut dyn Host,
        options: &RenderOptions,
    ) -> Result<usize, RenderError> {
        let mut renderer = Renderer::new(sink, &options.indent, &self.indent_step);
        renderer.run(&self.ops, host)?;
        Ok(renderer.written())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Bindings, Interpreter};
    use crate::registry::Registry;

    fn render(source: &str, bindings: Bindings) -> String {
        let template = CompiledTemplate::compile(source).unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, bindings);
        template.render(&mut host).unwrap()
    }

    #[test]
    fn test_render_prefix() {
        let template = CompiledTemplate::compile("%ul\n  %li a").unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new());
        let out = template
            .render_with_options(&mut host, &RenderOptions::new().indent("    "))
            .unwrap();
        assert_eq!(out, "<ul>\n      <li>a</li>\n    </ul>");
    }

    #[test]
    fn test_indent_step_option() {
        let options = CompileOptions::new().indent_step("\t");
        let template = CompiledTemplate::compile_with_options("%ul\n  %li a", &options).unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new());
        assert_eq!(template.render(&mut host).unwrap(), "<ul>\n\t<li>a</li>\n</ul>");
    }

    #[test]
    fn test_render_io_counts_bytes() {
        let template = CompiledTemplate::compile("%p= x").unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new().with("x", "é"));
        let mut out = Vec::new();
        let written = template
            .render_io(&mut out, &mut host, &RenderOptions::default())
            .unwrap();
        assert_eq!(written, out.len());
        assert_eq!(String::from_utf8(out).unwrap(), "<p>é</p>");
    }

    #[test]
    fn test_render_with_streams_in_order() {
        let template = CompiledTemplate::compile("- for i in 1:3\n  %i= i").unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new());
        let mut chunks = Vec::new();
        template
            .render_with(
                |chunk| {
                    chunks.push(chunk.to_string());
                    Ok(())
                },
                &mut host,
                &RenderOptions::default(),
            )
            .unwrap();
        assert_eq!(chunks.concat(), "<i>1</i>\n<i>2</i>\n<i>3</i>");
        assert!(chunks.len() > 3);
    }

    #[test]
    fn test_error_location_names_file() {
        let options = CompileOptions::new().file("views/page.hamljl");
        let err = CompiledTemplate::compile_with_options("%p\n   %a\n  %b", &options).unwrap_err();
        assert_eq!(err.location.file.as_deref(), Some("views/page.hamljl"));
        assert_eq!(err.location.line, 3);
    }

    #[test]
    fn test_compiled_template_is_reusable() {
        let template = CompiledTemplate::compile("%p= n").unwrap();
        let registry = Registry::with_builtins();
        for n in 0..3 {
            let mut host = Interpreter::new(&registry, Bindings::new().with("n", n));
            assert_eq!(template.render(&mut host).unwrap(), format!("<p>{n}</p>"));
        }
        assert_eq!(render("%p static", Bindings::new()), "<p>static</p>");
    }
}
