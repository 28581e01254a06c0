//! Error types for compilation and rendering.
//!
//! [`CompileError`] is produced while turning template source into a
//! [`CompiledTemplate`](crate::CompiledTemplate) and is always fatal.
//! [`RenderError`] is produced while executing a compiled template and can
//! originate from the renderer itself (attribute conflicts, sink failures)
//! or from the [`Host`](crate::render::Host) evaluating expression text.

use crate::ast::span::Location;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ── Compile errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A line's indentation does not nest consistently with its ancestors
    /// or siblings.
    Indentation,
    /// A line does not match the template grammar.
    Syntax,
    /// An included or embedded file could not be resolved or read, or the
    /// include chain loops back on itself.
    Include,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompileErrorKind::Indentation => "indentation error",
            CompileErrorKind::Syntax => "syntax error",
            CompileErrorKind::Include => "include error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} at {location}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            location,
            message: message.into(),
            hint: None,
        }
    }

    pub fn syntax(location: Location, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Syntax, location, message)
    }

    pub fn indentation(location: Location, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Indentation, location, message)
    }

    pub fn include(location: Location, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Include, location, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context for display
    pub fn format_with_source(&self, source: &str) -> String {
        let line = self.location.line;
        let col = self.location.column;
        let source_line = source.lines().nth(line.saturating_sub(1)).unwrap_or("");
        let pointer = " ".repeat(col.saturating_sub(1)) + "^";

        let mut output = format!(
            "Error: {}\n --> {}\n  |\n{line:>3} | {source_line}\n    | {pointer}",
            self.message, self.location
        );

        if let Some(hint) = &self.hint {
            output.push_str(&format!("\n  = hint: {hint}"));
        }

        output
    }
}

// ── Render errors ───────────────────────────────────────────────────────

/// An error that occurs while rendering a compiled template.
///
/// Carries a structured [`RenderErrorKind`], a human-readable message, the
/// template [`Location`] of the construct being rendered (when known) and
/// an optional underlying cause.
///
/// # Error chaining
///
/// Host implementations that wrap an underlying failure can keep the chain
/// with [`with_source`](RenderError::with_source):
///
/// ```rust
/// use haml_lang::RenderError;
///
/// fn lookup() -> Result<(), RenderError> {
///     let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "row missing");
///     Err(RenderError::host("failed to load user").with_source(io_err))
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub location: Option<Location>,
    pub message: String,
    /// Wrapped in `Arc` so that `RenderError` remains `Clone`.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach a location only if the error does not already carry one.
    pub fn or_location(self, location: &Location) -> Self {
        if self.location.is_none() {
            self.with_location(location.clone())
        } else {
            self
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Whether this error was raised while evaluating host expression text,
    /// as opposed to by the renderer itself.
    pub fn is_host_evaluation(&self) -> bool {
        !matches!(
            self.kind,
            RenderErrorKind::AttributeConflict | RenderErrorKind::Io
        )
    }

    pub fn attribute_conflict(name: &str) -> Self {
        Self::new(
            RenderErrorKind::AttributeConflict,
            format!("attribute `{name}` is given more than once"),
        )
    }

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(
            RenderErrorKind::UndefinedVariable,
            format!("undefined variable: {name}"),
        )
    }

    pub fn undefined_function(name: &str) -> Self {
        Self::new(
            RenderErrorKind::UndefinedFunction,
            format!("undefined function: {name}"),
        )
    }

    pub fn type_error(expected: &str, got: &str) -> Self {
        Self::new(
            RenderErrorKind::TypeError,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn not_iterable(got: &str) -> Self {
        Self::new(
            RenderErrorKind::NotIterable,
            format!("cannot iterate over {got}"),
        )
    }

    pub fn invalid_expression(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::InvalidExpression, message)
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::Host, message)
    }
}

impl From<fmt::Error> for RenderError {
    fn from(err: fmt::Error) -> Self {
        RenderError::new(RenderErrorKind::Io, "failed to write to output sink").with_source(err)
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::new(RenderErrorKind::Io, format!("failed to write to output sink: {err}"))
            .with_source(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// The same attribute name was produced twice after flattening.
    AttributeConflict,
    /// The output sink rejected a write.
    Io,
    UndefinedVariable,
    UndefinedFunction,
    TypeError,
    NotIterable,
    ArithmeticError,
    /// Expression text handed to the host could not be parsed.
    InvalidExpression,
    /// The host exceeded a configured resource limit.
    ResourceLimit,
    /// Rendering was cancelled via an external cancellation token.
    Cancelled,
    /// Any other failure reported by a host implementation.
    Host,
}

// ── Combined error ──────────────────────────────────────────────────────

/// Combined error type returned by the one-shot helpers such as
/// [`render`](crate::render()) and
/// [`TemplateLoader::render_file`](crate::TemplateLoader::render_file).
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Render(#[from] RenderError),
}
