//! # haml_lang
//!
//! A compiler and renderer for HAML-style, indentation-sensitive HTML
//! templates with embedded Julia-flavoured expressions.
//!
//! Template source is compiled once into a flat sequence of [`CodeOp`]s
//! and rendered any number of times against a variable binding set. The
//! crate is split into two layers:
//!
//! - **The core** (scanning, tree building, directive parsing, code
//!   generation, attribute resolution, rendering) treats embedded
//!   expressions as opaque text and hands them to a [`Host`].
//! - **The reference host** ([`Interpreter`]) evaluates that text for a
//!   small expression language and calls functions from a [`Registry`].
//!
//! ## Quick start
//!
//! ```rust
//! use haml_lang::{render, Bindings};
//!
//! let bindings = Bindings::new().with("quality", "nice");
//! let html = render("%p This is $quality cake!", bindings).unwrap();
//! assert_eq!(html, "<p>This is nice cake!</p>");
//! ```
//!
//! ## Compiled templates
//!
//! For repeated rendering, compile once with [`CompiledTemplate::compile`]
//! and render against a fresh [`Interpreter`] each time:
//!
//! ```rust
//! use haml_lang::{Bindings, CompiledTemplate, Interpreter, Registry};
//!
//! let template = CompiledTemplate::compile("%ul\n  - for i in 1:2\n    %li= i").unwrap();
//! let registry = Registry::with_builtins();
//!
//! let mut host = Interpreter::new(&registry, Bindings::new());
//! assert_eq!(
//!     template.render(&mut host).unwrap(),
//!     "<ul>\n  <li>1</li>\n  <li>2</li>\n</ul>"
//! );
//! ```
//!
//! ## Template files
//!
//! [`TemplateLoader`] compiles files on first use and caches them by
//! canonical path. `@include`, `@sourcefile` and `@cdatafile` paths are
//! resolved relative to the including file.

pub mod ast;
pub mod attrs;
pub mod codegen;
pub mod error;
pub mod eval;
pub mod parser;
pub mod registry;
pub mod render;
pub mod scanner;
pub mod template;
pub mod tree;

pub use ast::span::{Location, Span, Spanned};
pub use ast::value::Value;
pub use codegen::{Code, CodeOp};
pub use error::{CompileError, CompileErrorKind, Error, RenderError, RenderErrorKind};
pub use eval::{Bindings, EvalOptions, Interpreter};
pub use registry::{ClosureFunction, FunctionSignature, HamlFunction, Registry, ValueType};
pub use render::{Host, Sink};
pub use template::{CompileOptions, CompiledTemplate, RenderOptions, Source, TemplateLoader};

/// Compile template source with default options.
pub fn compile(source: &str) -> Result<CompiledTemplate, CompileError> {
    CompiledTemplate::compile(source)
}

/// Compile and render template source in a single step, using the bundled
/// [`Interpreter`] with the builtin functions.
///
/// For repeated rendering of the same source, prefer [`CompiledTemplate`]
/// to avoid recompiling.
pub fn render(source: &str, bindings: Bindings) -> Result<String, Error> {
    let template = compile(source)?;
    let registry = Registry::with_builtins();
    let mut host = Interpreter::new(&registry, bindings);
    Ok(template.render(&mut host)?)
}
