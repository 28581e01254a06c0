//! Expression AST of the bundled reference host language.
//!
//! The template core never looks inside host code. These types are only
//! used by [`Interpreter`](crate::Interpreter), which parses the code
//! handed to it through the [`Host`](crate::Host) trait.

use super::{span::Spanned, value::Value};

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value: `"hello"`, `42`, `true`, `nothing`, `:sym`
    Literal(Value),

    /// String with `$name` / `$(expr)` interpolation.
    Interpolated(Vec<StringPart>),

    /// Array literal: `[1, 2, "three"]`
    Array(Vec<Expr>),

    /// Tuple: `(a, b)`. Evaluates to a sequence.
    Tuple(Vec<Expr>),

    /// Named tuple: `(href = "/", title = t)`. Evaluates to a mapping.
    NamedTuple(Vec<(String, Expr)>),

    /// Variable reference: `name` or `$name`
    Variable(String),

    /// Function call: `join(xs, ", ")`
    Call { name: String, args: Vec<Expr> },

    /// Indexing: `xs[1]`, `d["key"]`
    Index { target: Box<Expr>, index: Box<Expr> },

    /// Field access on a mapping: `user.name`
    Field { target: Box<Expr>, name: String },

    BinaryOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },

    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

#[derive(Debug, Clone)]
pub enum StringPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `k => v`
    Pair,

    // Logical
    Or,
    And,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    /// `a:b`
    Range,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::Pair => 1,
            BinOp::Or => 2,
            BinOp::And => 3,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => 4,
            BinOp::Range => 5,
            BinOp::Add | BinOp::Sub => 6,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 7,
        }
    }

    /// `=>` groups to the right, everything else to the left.
    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinOp::Pair)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Left-hand side of an assignment or a loop variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Name(String),
    /// `(k, v)`: destructures a sequence (or a single-entry mapping).
    Tuple(Vec<Pattern>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
}

/// A code line run for its effect.
#[derive(Debug, Clone)]
pub enum Statement {
    Assign {
        target: Pattern,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
}

/// One entry of a tag's attribute list.
#[derive(Debug, Clone)]
pub enum AttributeEntry {
    /// `name = expr`
    Named(String, Expr),
    /// Any expression producing a mapping, e.g. `"k" => v` or `Dict(...)`.
    Splat(Expr),
}

/// The parsed opening line of a host block.
#[derive(Debug, Clone)]
pub enum BlockHeader {
    For { pattern: Pattern, iterable: Expr },
    While(Expr),
    /// `if cond` or `elseif cond`
    Condition(Expr),
    Else,
    /// `name(args) do params`
    Do {
        name: String,
        args: Vec<Expr>,
        params: Vec<Pattern>,
    },
}
