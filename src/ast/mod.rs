//! Data types shared by the compiler stages.
//!
//! - [`line`]: logical source lines produced by the scanner.
//! - [`tree`]: the index-based arena used for the indentation tree.
//! - [`directive`]: the classified form of each line ([`Document`]).
//! - [`value`]: the runtime [`Value`] type exchanged with the host.
//! - [`expr`]: expressions of the bundled reference host language.

pub mod directive;
pub mod expr;
pub mod line;
pub mod span;
pub mod tree;
pub mod value;

// Convenience re-exports
pub use directive::*;
pub use line::SourceLine;
pub use span::{Location, Span, Spanned};
pub use tree::{Arena, Node, NodeId};
pub use value::Value;
