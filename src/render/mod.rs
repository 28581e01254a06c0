//! Renderer.
//!
//! Executes a compiled [`CodeOp`] sequence against a [`Host`], writing to a
//! [`Sink`] as it goes. Output is written incrementally in the order ops
//! execute; nothing is buffered, so a failed render leaves whatever was
//! already written in the sink.
//!
//! The renderer never interprets host expression text. Expressions,
//! statements, attribute mappings and block statements are all handed to
//! the [`Host`]; block bodies are passed back as callbacks that the host
//! may invoke any number of times.

pub mod escape;

use std::fmt;
use std::io;

use tracing::trace;

use crate::ast::value::Value;
use crate::attrs::{format_attributes, resolve};
use crate::codegen::{Code, CodeOp, HostBlock};
use crate::error::RenderError;
use escape::escape_html;

/// Callback that renders clause `n` of a [`HostBlock`].
pub type BlockBody<'b> = dyn FnMut(usize, &mut dyn Host) -> Result<(), RenderError> + 'b;

/// Callback that renders the body of an included template.
pub type ScopeBody<'b> = dyn FnMut(&mut dyn Host) -> Result<(), RenderError> + 'b;

/// The expression evaluator a template is rendered against.
///
/// Implementations own the variable bindings. Every method receives the
/// [`Code`] being evaluated so errors can point back at the template; the
/// renderer fills in that location for errors that carry none.
pub trait Host {
    /// Evaluate an expression for output.
    fn evaluate(&mut self, code: &Code) -> Result<Value, RenderError>;

    /// Run a statement for its effect, such as `x = 1`.
    fn execute(&mut self, code: &Code) -> Result<(), RenderError>;

    /// Evaluate the text inside a tag's attribute parentheses. The result
    /// must be a [`Value::Mapping`].
    fn evaluate_attributes(&mut self, code: &Code) -> Result<Value, RenderError>;

    /// Run a block statement. `body(i, host)` renders the body of clause
    /// `i` with the host's current bindings; the host decides which
    /// clauses run and how often.
    fn run_block(&mut self, block: &HostBlock, body: &mut BlockBody<'_>) -> Result<(), RenderError>;

    /// Run `body` with extra bindings visible only inside it.
    fn with_scope(
        &mut self,
        bindings: Vec<(String, Value)>,
        body: &mut ScopeBody<'_>,
    ) -> Result<(), RenderError>;
}

// ── Sinks ───────────────────────────────────────────────────────────────

/// Destination for rendered text.
pub trait Sink {
    fn write_str(&mut self, text: &str) -> Result<(), RenderError>;
}

impl Sink for String {
    fn write_str(&mut self, text: &str) -> Result<(), RenderError> {
        self.push_str(text);
        Ok(())
    }
}

/// Adapts any [`fmt::Write`].
pub struct FmtSink<'w, W: ?Sized>(pub &'w mut W);

impl<W: fmt::Write + ?Sized> Sink for FmtSink<'_, W> {
    fn write_str(&mut self, text: &str) -> Result<(), RenderError> {
        self.0.write_str(text).map_err(RenderError::from)
    }
}

/// Adapts any [`io::Write`]. Text is written as UTF-8.
pub struct IoSink<'w, W: ?Sized>(pub &'w mut W);

impl<W: io::Write + ?Sized> Sink for IoSink<'_, W> {
    fn write_str(&mut self, text: &str) -> Result<(), RenderError> {
        self.0.write_all(text.as_bytes()).map_err(RenderError::from)
    }
}

/// Streams each chunk to a callback.
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: FnMut(&str) -> Result<(), RenderError>,
{
    fn write_str(&mut self, text: &str) -> Result<(), RenderError> {
        (self.0)(text)
    }
}

// ── Renderer ────────────────────────────────────────────────────────────

pub struct Renderer<'a> {
    sink: &'a mut dyn Sink,
    prefix: &'a str,
    indent_step: &'a str,
    fresh: bool,
    written: usize,
}

impl<'a> Renderer<'a> {
    /// `prefix` starts every output line after the first; `indent_step` is
    /// repeated once per nesting level after it.
    pub fn new(sink: &'a mut dyn Sink, prefix: &'a str, indent_step: &'a str) -> Self {
        Self {
            sink,
            prefix,
            indent_step,
            fresh: true,
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn run(&mut self, ops: &[CodeOp], host: &mut dyn Host) -> Result<(), RenderError> {
        for op in ops {
            match op {
                CodeOp::EmitLiteral(text) => self.write(text)?,
                CodeOp::LineBreak(depth) => self.line_break(*depth)?,
                CodeOp::EmitExpression(code) => {
                    let value = host.evaluate(code).map_err(|e| e.or_location(&code.location))?;
                    self.write(&escape_html(&value.to_output_string()))?;
                }
                CodeOp::EmitAttributes(set) => {
                    let location = &set.expression.location;
                    let value = host
                        .evaluate_attributes(&set.expression)
                        .map_err(|e| e.or_location(location))?;
                    let attributes =
                        resolve(&set.shorthand, &value).map_err(|e| e.or_location(location))?;
                    self.write(&format_attributes(&attributes))?;
                }
                CodeOp::Execute(code) => {
                    host.execute(code).map_err(|e| e.or_location(&code.location))?
                }
                CodeOp::EnterHostBlock(block) => self.host_block(block, host)?,
                CodeOp::EnterScope(scope) => {
                    let mut bindings = Vec::with_capacity(scope.bindings.len());
                    for (name, code) in &scope.bindings {
                        let value = host.evaluate(code).map_err(|e| e.or_location(&code.location))?;
                        bindings.push((name.clone(), value));
                    }
                    let mut body = |host: &mut dyn Host| self.run(&scope.body, host);
                    host.with_scope(bindings, &mut body)?;
                }
            }
        }
        Ok(())
    }

    fn host_block(&mut self, block: &HostBlock, host: &mut dyn Host) -> Result<(), RenderError> {
        let Some(first) = block.clauses.first() else {
            return Ok(());
        };
        trace!(header = %first.header.text, clauses = block.clauses.len(), "host block");

        let mut body = |clause: usize, host: &mut dyn Host| match block.clauses.get(clause) {
            Some(clause) => self.run(&clause.body, host),
            None => Err(RenderError::host(format!(
                "block `{}` has no clause {clause}",
                first.header.text
            ))),
        };
        host.run_block(block, &mut body)
            .map_err(|e| e.or_location(&first.header.location))
    }

    fn write(&mut self, text: &str) -> Result<(), RenderError> {
        if text.is_empty() {
            return Ok(());
        }
        self.fresh = false;
        self.written += text.len();
        self.sink.write_str(text)
    }

    fn line_break(&mut self, depth: usize) -> Result<(), RenderError> {
        if self.fresh {
            return Ok(());
        }
        self.write("\n")?;
        self.write(self.prefix)?;
        for _ in 0..depth {
            self.write(self.indent_step)?;
        }
        Ok(())
    }
}
