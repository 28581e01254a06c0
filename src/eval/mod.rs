//! Reference host evaluator.
//!
//! [`Interpreter`] implements [`Host`] for a small Julia-flavoured
//! expression language, so templates can be rendered without plugging in
//! an external evaluator. Code text is parsed lazily on first use and the
//! parsed form is cached for the lifetime of the interpreter.
//!
//! Variables live in a stack of scope frames. The outermost frame holds
//! the [`Bindings`] of the render; loop iterations, `do` blocks and
//! included templates push their own frame. Assignment updates the
//! nearest frame that already binds the name, otherwise it creates the
//! name in the innermost frame.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::ast::directive::BlockOpener;
use crate::ast::expr::*;
use crate::ast::value::Value;
use crate::codegen::{Code, HostBlock};
use crate::error::{RenderError, RenderErrorKind};
use crate::parser::expr::{parse_attributes, parse_block_header, parse_expression, parse_statement};
use crate::registry::Registry;
use crate::render::{BlockBody, Host, ScopeBody};

mod context;

pub use context::Bindings;

/// Configuration for an [`Interpreter`].
///
/// All fields are optional and default to unlimited. Use the builder
/// methods to set only the options you need:
///
/// ```rust
/// use haml_lang::EvalOptions;
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
///
/// let token = Arc::new(AtomicBool::new(false));
/// let opts = EvalOptions::new()
///     .max_node_evaluations(10_000)
///     .max_iterations(1_000)
///     .cancellation_token(token);
/// ```
#[derive(Clone, Default)]
pub struct EvalOptions {
    /// Maximum number of expression nodes evaluated before the interpreter
    /// returns a [`ResourceLimit`](RenderErrorKind::ResourceLimit) error.
    /// `None` means unlimited.
    pub max_node_evaluations: Option<u64>,

    /// Maximum number of loop iterations (across all `for`, `while` and
    /// `do` blocks) before the interpreter returns a
    /// [`ResourceLimit`](RenderErrorKind::ResourceLimit) error. Also caps
    /// the length of ranges. `None` means unlimited.
    pub max_iterations: Option<u64>,

    /// An external flag that can be set to `true` to cancel an
    /// in-progress render. Checked on every node evaluation and loop
    /// iteration.
    pub cancellation_token: Option<Arc<AtomicBool>>,
}

impl EvalOptions {
    /// Create a new `EvalOptions` with all defaults (no limits).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of expression node evaluations.
    pub fn max_node_evaluations(mut self, limit: u64) -> Self {
        self.max_node_evaluations = Some(limit);
        self
    }

    /// Set the maximum number of loop iterations.
    pub fn max_iterations(mut self, limit: u64) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Attach a cancellation token. Set the `AtomicBool` to `true` from
    /// another thread to abort rendering.
    pub fn cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

impl std::fmt::Debug for EvalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalOptions")
            .field("max_node_evaluations", &self.max_node_evaluations)
            .field("max_iterations", &self.max_iterations)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .finish()
    }
}

// ── Lexical scope stack ─────────────────────────────────────────────────

#[derive(Default)]
struct ScopeFrame {
    bindings: HashMap<String, Value>,
}

impl ScopeFrame {
    fn set(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

// ── Parse cache ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ParseCache {
    expressions: HashMap<String, Rc<Expr>>,
    statements: HashMap<String, Rc<Statement>>,
    attributes: HashMap<String, Rc<Vec<AttributeEntry>>>,
    headers: HashMap<String, Rc<BlockHeader>>,
}

fn cached<T>(
    map: &mut HashMap<String, Rc<T>>,
    text: &str,
    parse: impl FnOnce(&str) -> Result<T, RenderError>,
) -> Result<Rc<T>, RenderError> {
    if let Some(parsed) = map.get(text) {
        return Ok(Rc::clone(parsed));
    }
    let parsed = Rc::new(parse(text)?);
    map.insert(text.to_string(), Rc::clone(&parsed));
    Ok(parsed)
}

// ── Interpreter ─────────────────────────────────────────────────────────

/// The bundled [`Host`] implementation.
///
/// An interpreter serves one render at a time: it holds that render's
/// variables. Create a new one (cheap) per render, sharing the
/// [`Registry`].
///
/// ```rust
/// use haml_lang::{Bindings, Code, Host, Interpreter, Location, Registry, Value};
///
/// let registry = Registry::with_builtins();
/// let mut host = Interpreter::new(&registry, Bindings::new().with("xs", vec!["a", "b"]));
///
/// let code = Code::new(r#"join(xs, ", ")"#, &Location::default());
/// assert_eq!(host.evaluate(&code).unwrap(), Value::from("a, b"));
/// ```
pub struct Interpreter<'r> {
    registry: &'r Registry,
    scopes: Vec<ScopeFrame>,
    options: EvalOptions,
    cache: ParseCache,
    node_count: u64,
    iteration_count: u64,
}

impl<'r> Interpreter<'r> {
    pub fn new(registry: &'r Registry, bindings: Bindings) -> Self {
        Self::with_options(registry, bindings, EvalOptions::default())
    }

    pub fn with_options(registry: &'r Registry, bindings: Bindings, options: EvalOptions) -> Self {
        let globals = ScopeFrame {
            bindings: bindings.into_iter().collect(),
        };
        Self {
            registry,
            scopes: vec![globals],
            options,
            cache: ParseCache::default(),
            node_count: 0,
            iteration_count: 0,
        }
    }

    /// Look a variable up through the scope stack.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Bind a variable in the outermost scope.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(globals) = self.scopes.first_mut() {
            globals.set(name.into(), value.into());
        }
    }

    /// Evaluate a standalone expression.
    pub fn eval_str(&mut self, text: &str) -> Result<Value, RenderError> {
        let expr = cached(&mut self.cache.expressions, text, parse_expression)?;
        self.eval(&expr)
    }

    fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame::default());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Run `f` inside a fresh scope frame, popping it even on error.
    fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        self.push_scope();
        let result = f(self);
        self.pop_scope();
        result
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.set(name.to_string(), value);
        }
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.scopes.iter_mut().rev().find(|f| f.get(name).is_some()) {
            Some(frame) => frame.set(name.to_string(), value),
            None => self.bind(name, value),
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, update: bool) -> Result<(), RenderError> {
        match pattern {
            Pattern::Name(name) if update => self.assign(name, value),
            Pattern::Name(name) => self.bind(name, value),
            Pattern::Tuple(parts) => {
                let items = destructure(value, parts.len())?;
                for (part, item) in parts.iter().zip(items) {
                    self.bind_pattern(part, item, update)?;
                }
            }
        }
        Ok(())
    }

    /// Check resource limits and cancellation. Called once per node evaluation.
    fn check_limits(&mut self) -> Result<(), RenderError> {
        self.node_count += 1;

        if let Some(max) = self.options.max_node_evaluations
            && self.node_count > max
        {
            return Err(RenderError::new(
                RenderErrorKind::ResourceLimit,
                format!("evaluation exceeded maximum of {max} node evaluations"),
            ));
        }

        self.check_cancelled()
    }

    fn check_cancelled(&self) -> Result<(), RenderError> {
        if let Some(ref token) = self.options.cancellation_token
            && token.load(Ordering::Relaxed)
        {
            return Err(RenderError::new(RenderErrorKind::Cancelled, "rendering cancelled"));
        }
        Ok(())
    }

    /// Check iteration limit. Called once per loop iteration.
    fn check_iteration_limit(&mut self) -> Result<(), RenderError> {
        self.iteration_count += 1;

        if let Some(max) = self.options.max_iterations
            && self.iteration_count > max
        {
            return Err(RenderError::new(
                RenderErrorKind::ResourceLimit,
                format!("evaluation exceeded maximum of {max} loop iterations"),
            ));
        }

        self.check_cancelled()
    }

    fn header(&mut self, opener: BlockOpener, code: &Code) -> Result<Rc<BlockHeader>, RenderError> {
        cached(&mut self.cache.headers, &code.text, |text| {
            parse_block_header(opener, text)
        })
        .map_err(|e| e.or_location(&code.location))
    }

    // ── Expression evaluation ───────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Result<Value, RenderError> {
        self.check_limits()?;

        match &expr.node {
            ExprKind::Literal(value) => Ok(value.clone()),

            ExprKind::Interpolated(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        StringPart::Literal(text) => out.push_str(text),
                        StringPart::Expr(expr) => out.push_str(&self.eval(expr)?.to_output_string()),
                    }
                }
                Ok(Value::String(out))
            }

            ExprKind::Array(elements) | ExprKind::Tuple(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval(element)?);
                }
                Ok(Value::Sequence(values))
            }

            ExprKind::NamedTuple(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for (name, expr) in entries {
                    values.push((name.clone(), self.eval(expr)?));
                }
                Ok(Value::Mapping(values))
            }

            ExprKind::Variable(name) => self
                .get(name)
                .cloned()
                .ok_or_else(|| RenderError::undefined_variable(name)),

            ExprKind::Call { name, args } if IN_PLACE_FUNCTIONS.contains(&name.as_str()) => {
                self.call_in_place(name, args)
            }

            ExprKind::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.registry.call(name, values)
            }

            ExprKind::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                eval_index(target, &index)
            }

            ExprKind::Field { target, name } => match self.eval(target)? {
                Value::Mapping(entries) => entries
                    .into_iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        RenderError::new(
                            RenderErrorKind::UndefinedVariable,
                            format!("mapping has no field `{name}`"),
                        )
                    }),
                other => Err(RenderError::type_error("a mapping", other.type_name())),
            },

            ExprKind::BinaryOp { left, op, right } => match op {
                BinOp::And => {
                    let left = self.eval(left)?;
                    if left.is_truthy() {
                        self.eval(right)
                    } else {
                        Ok(left)
                    }
                }
                BinOp::Or => {
                    let left = self.eval(left)?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval(right)
                    }
                }
                BinOp::Range => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    eval_range(&left, &right, self.options.max_iterations)
                }
                op => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    eval_binary_op(left, *op, right)
                }
            },

            ExprKind::UnaryOp { op, operand } => {
                let value = self.eval(operand)?;
                eval_unary_op(*op, &value)
            }
        }
    }

    /// `push!`, `pushfirst!`, `pop!` and `popfirst!` update the sequence
    /// bound to the variable passed as their first argument.
    fn call_in_place(&mut self, name: &str, args: &[Expr]) -> Result<Value, RenderError> {
        let Some((target, rest)) = args.split_first() else {
            return Err(RenderError::type_error(
                "a variable holding a sequence",
                "no arguments",
            ));
        };
        let ExprKind::Variable(var) = &target.node else {
            return Err(RenderError::invalid_expression(format!(
                "`{name}` needs a variable as its first argument"
            )));
        };
        let mut items = match self.eval(target)? {
            Value::Sequence(items) => items,
            other => return Err(RenderError::type_error("a sequence", other.type_name())),
        };
        let mut extra = Vec::with_capacity(rest.len());
        for arg in rest {
            extra.push(self.eval(arg)?);
        }

        let popping = matches!(name, "pop!" | "popfirst!");
        if popping != extra.is_empty() {
            let expected = if popping { "exactly 1" } else { "at least 2" };
            return Err(RenderError::type_error(
                &format!("{expected} argument(s) to `{name}`"),
                &args.len().to_string(),
            ));
        }

        let result = match name {
            "push!" => {
                items.extend(extra);
                Value::Sequence(items.clone())
            }
            "pushfirst!" => {
                extra.append(&mut items);
                items = extra;
                Value::Sequence(items.clone())
            }
            "pop!" => items.pop().ok_or_else(empty_sequence)?,
            _ if items.is_empty() => return Err(empty_sequence()),
            _ => items.remove(0),
        };
        self.assign(var, Value::Sequence(items));
        Ok(result)
    }

    fn exec(&mut self, statement: &Statement) -> Result<(), RenderError> {
        match statement {
            Statement::Expr(expr) => self.eval(expr).map(drop),
            Statement::Assign { target, op, value } => {
                let value = self.eval(value)?;
                let value = match (op, target) {
                    (AssignOp::Set, _) => value,
                    (op, Pattern::Name(name)) => {
                        let current = self
                            .get(name)
                            .cloned()
                            .ok_or_else(|| RenderError::undefined_variable(name))?;
                        let bin = match op {
                            AssignOp::Add => BinOp::Add,
                            AssignOp::Sub => BinOp::Sub,
                            _ => BinOp::Mul,
                        };
                        eval_binary_op(current, bin, value)?
                    }
                    (_, Pattern::Tuple(_)) => {
                        return Err(RenderError::invalid_expression(
                            "only a single name can be updated in place",
                        ));
                    }
                };
                self.bind_pattern(target, value, true)
            }
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    fn run_chain(&mut self, block: &HostBlock, body: &mut BlockBody<'_>) -> Result<(), RenderError> {
        for (index, clause) in block.clauses.iter().enumerate() {
            let header = self.header(clause.opener, &clause.header)?;
            let taken = match &*header {
                BlockHeader::Condition(cond) => self
                    .eval(cond)
                    .map_err(|e| e.or_location(&clause.header.location))?
                    .is_truthy(),
                BlockHeader::Else => true,
                _ => {
                    return Err(RenderError::host(format!(
                        "`{}` cannot appear in an `if` chain",
                        clause.header.text
                    ))
                    .with_location(clause.header.location.clone()));
                }
            };
            if taken {
                return body(index, self);
            }
        }
        Ok(())
    }

    fn run_loop(
        &mut self,
        pattern: Option<&Pattern>,
        items: Vec<Value>,
        body: &mut BlockBody<'_>,
    ) -> Result<(), RenderError> {
        for item in items {
            self.check_iteration_limit()?;
            self.scoped(|this| {
                if let Some(pattern) = pattern {
                    this.bind_pattern(pattern, item, false)?;
                }
                body(0, this)
            })?;
        }
        Ok(())
    }

    fn run_do(
        &mut self,
        name: &str,
        args: &[Expr],
        params: &[Pattern],
        body: &mut BlockBody<'_>,
    ) -> Result<(), RenderError> {
        if name != "foreach" {
            return Err(RenderError::new(
                RenderErrorKind::UndefinedFunction,
                format!("`{name}` does not take a `do` block"),
            ));
        }

        let mut iterables = Vec::with_capacity(args.len());
        for arg in args {
            iterables.push(iterate(&self.eval(arg)?)?);
        }
        let items = match iterables.len() {
            0 => {
                return Err(RenderError::new(
                    RenderErrorKind::TypeError,
                    "`foreach` needs at least one collection",
                ));
            }
            1 => iterables.pop().unwrap_or_default(),
            _ => zip(iterables),
        };

        let pattern = match params {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(Pattern::Tuple(many.to_vec())),
        };
        self.run_loop(pattern.as_ref(), items, body)
    }
}

impl Host for Interpreter<'_> {
    fn evaluate(&mut self, code: &Code) -> Result<Value, RenderError> {
        let expr = cached(&mut self.cache.expressions, &code.text, parse_expression)?;
        self.eval(&expr)
    }

    fn execute(&mut self, code: &Code) -> Result<(), RenderError> {
        let statement = cached(&mut self.cache.statements, &code.text, parse_statement)?;
        self.exec(&statement)
    }

    fn evaluate_attributes(&mut self, code: &Code) -> Result<Value, RenderError> {
        let entries = cached(&mut self.cache.attributes, &code.text, parse_attributes)?;
        let mut mapping = Vec::new();
        for entry in entries.iter() {
            match entry {
                AttributeEntry::Named(name, expr) => mapping.push((name.clone(), self.eval(expr)?)),
                AttributeEntry::Splat(expr) => splat(self.eval(expr)?, &mut mapping)?,
            }
        }
        Ok(Value::Mapping(mapping))
    }

    fn run_block(&mut self, block: &HostBlock, body: &mut BlockBody<'_>) -> Result<(), RenderError> {
        let Some(first) = block.clauses.first() else {
            return Ok(());
        };
        debug!(header = %first.header.text, "host block");

        if first.opener == BlockOpener::If {
            return self.run_chain(block, body);
        }

        let header = self.header(first.opener, &first.header)?;
        match &*header {
            BlockHeader::For { pattern, iterable } => {
                let items = iterate(&self.eval(iterable)?)?;
                self.run_loop(Some(pattern), items, body)
            }
            BlockHeader::While(cond) => loop {
                if !self.eval(cond)?.is_truthy() {
                    return Ok(());
                }
                self.check_iteration_limit()?;
                self.scoped(|this| body(0, this))?;
            },
            BlockHeader::Do { name, args, params } => self.run_do(name, args, params, body),
            BlockHeader::Condition(_) | BlockHeader::Else => Err(RenderError::host(format!(
                "`{}` without a preceding `if`",
                first.header.text
            ))),
        }
    }

    fn with_scope(
        &mut self,
        bindings: Vec<(String, Value)>,
        body: &mut ScopeBody<'_>,
    ) -> Result<(), RenderError> {
        self.scoped(|this| {
            for (name, value) in bindings {
                this.bind(&name, value);
            }
            body(this)
        })
    }
}

impl std::fmt::Debug for Interpreter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("scopes", &self.scopes.len())
            .field("options", &self.options)
            .finish()
    }
}

// ── Iteration ───────────────────────────────────────────────────────────

/// The items a `for` loop visits.
///
/// Sequences yield their items, mappings yield `[key, value]` pairs,
/// strings yield one-character strings and a number yields itself.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, RenderError> {
    match value {
        Value::Sequence(items) => Ok(items.clone()),
        Value::Mapping(entries) => Ok(entries
            .iter()
            .map(|(k, v)| Value::Sequence(vec![Value::String(k.clone()), v.clone()]))
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Number(_) => Ok(vec![value.clone()]),
        other => Err(RenderError::not_iterable(other.type_name())),
    }
}

fn zip(iterables: Vec<Vec<Value>>) -> Vec<Value> {
    let len = iterables.iter().map(Vec::len).min().unwrap_or(0);
    let mut iters: Vec<_> = iterables.into_iter().map(Vec::into_iter).collect();
    (0..len)
        .map(|_| Value::Sequence(iters.iter_mut().filter_map(Iterator::next).collect()))
        .collect()
}

fn destructure(value: Value, count: usize) -> Result<Vec<Value>, RenderError> {
    let type_name = value.type_name();
    let items = match value {
        Value::Sequence(items) => items,
        Value::Mapping(mut entries) if entries.len() == 1 => {
            let (key, value) = entries.remove(0);
            vec![Value::String(key), value]
        }
        _ => {
            return Err(RenderError::type_error(
                &format!("a collection of {count} values to destructure"),
                type_name,
            ));
        }
    };
    if items.len() < count {
        return Err(RenderError::new(
            RenderErrorKind::TypeError,
            format!("cannot destructure {} value(s) into {count} names", items.len()),
        ));
    }
    Ok(items)
}

fn splat(value: Value, mapping: &mut Vec<(String, Value)>) -> Result<(), RenderError> {
    match value {
        Value::Mapping(entries) => mapping.extend(entries),
        Value::Sequence(items) => {
            for item in items {
                splat(item, mapping)?;
            }
        }
        Value::Nothing => {}
        other => {
            return Err(RenderError::type_error(
                "a `name=value` entry or a mapping",
                other.type_name(),
            ));
        }
    }
    Ok(())
}

// ── Pure operator evaluation ────────────────────────────────────────────

fn eval_binary_op(left: Value, op: BinOp, right: Value) -> Result<Value, RenderError> {
    match op {
        BinOp::Pair => {
            let key = match &left {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => left.to_output_string(),
                other => return Err(RenderError::type_error("a string or symbol key", other.type_name())),
            };
            Ok(Value::Mapping(vec![(key, right)]))
        }

        BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(&left, &right))),

        BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => {
            let ordering = match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => l.partial_cmp(r),
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => None,
            }
            .ok_or_else(|| {
                RenderError::type_error(
                    "two numbers or two strings",
                    &format!("{} and {}", left.type_name(), right.type_name()),
                )
            })?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::LtEq => ordering.is_le(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }

        BinOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),

        BinOp::Mul => eval_mul(&left, &right),
        BinOp::Add | BinOp::Sub | BinOp::Div | BinOp::Rem => {
            let l = require_number(&left)?;
            let r = require_number(&right)?;
            let result = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Div | BinOp::Rem if r == 0.0 => {
                    return Err(RenderError::new(
                        RenderErrorKind::ArithmeticError,
                        "division by zero",
                    ));
                }
                BinOp::Div => l / r,
                _ => l % r,
            };
            Ok(Value::Number(result))
        }

        BinOp::Range => eval_range(&left, &right, None),
    }
}

/// `*` multiplies numbers and concatenates strings.
fn eval_mul(left: &Value, right: &Value) -> Result<Value, RenderError> {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return Ok(Value::Number(l * r));
    }
    if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
        return Ok(Value::String(format!(
            "{}{}",
            left.to_output_string(),
            right.to_output_string()
        )));
    }
    Err(RenderError::type_error(
        "number or string",
        &format!("{} * {}", left.type_name(), right.type_name()),
    ))
}

const IN_PLACE_FUNCTIONS: &[&str] = &["push!", "pushfirst!", "pop!", "popfirst!"];

fn empty_sequence() -> RenderError {
    RenderError::host("sequence must be non-empty")
}

/// Upper bound on the length of a materialised range, applied even when
/// no iteration limit is configured.
pub const MAX_RANGE_LENGTH: u64 = 1 << 24;

fn eval_range(left: &Value, right: &Value, limit: Option<u64>) -> Result<Value, RenderError> {
    let start = require_integer(left)?;
    let end = require_integer(right)?;
    let len = (i128::from(end) - i128::from(start) + 1).max(0);
    let max = limit.map_or(MAX_RANGE_LENGTH, |l| l.min(MAX_RANGE_LENGTH));
    if len > i128::from(max) {
        return Err(RenderError::new(
            RenderErrorKind::ResourceLimit,
            format!("range of {len} values exceeds the limit of {max} iterations"),
        ));
    }
    Ok(Value::Sequence(
        (start..=end).map(|n| Value::Number(n as f64)).collect(),
    ))
}

fn eval_index(target: Value, index: &Value) -> Result<Value, RenderError> {
    let out_of_bounds = |len: usize| {
        RenderError::host(format!(
            "index {} is out of bounds for length {len}",
            index.to_output_string()
        ))
    };
    match target {
        Value::Sequence(mut items) => {
            let i = position(index, items.len()).ok_or_else(|| out_of_bounds(items.len()))?;
            Ok(items.swap_remove(i))
        }
        Value::String(s) => {
            let len = s.chars().count();
            let i = position(index, len).ok_or_else(|| out_of_bounds(len))?;
            Ok(s.chars().nth(i).map(|c| Value::String(c.to_string())).unwrap_or(Value::Nothing))
        }
        Value::Mapping(entries) => {
            let key = index.to_output_string();
            entries
                .into_iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| RenderError::host(format!("key `{key}` not found")))
        }
        other => Err(RenderError::type_error("a sequence, string or mapping", other.type_name())),
    }
}

/// Zero-based position of a 1-based index, if in bounds.
fn position(index: &Value, len: usize) -> Option<usize> {
    let n = index.as_number()?;
    if n.fract() != 0.0 || n < 1.0 || n > len as f64 {
        return None;
    }
    Some(n as usize - 1)
}

fn eval_unary_op(op: UnaryOp, val: &Value) -> Result<Value, RenderError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
        UnaryOp::Neg => {
            let n = require_number(val)?;
            Ok(Value::Number(-n))
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left == right,
    }
}

fn require_number(val: &Value) -> Result<f64, RenderError> {
    val.as_number()
        .ok_or_else(|| RenderError::type_error("number", val.type_name()))
}

fn require_integer(val: &Value) -> Result<i64, RenderError> {
    let n = require_number(val)?;
    if n.fract() != 0.0 {
        return Err(RenderError::type_error("an integer", "a fractional number"));
    }
    Ok(n as i64)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::span::Location;

    fn eval_with(source: &str, bindings: Bindings) -> Result<Value, RenderError> {
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, bindings);
        host.eval_str(source)
    }

    fn eval(source: &str) -> Value {
        eval_with(source, Bindings::new()).unwrap()
    }

    fn code(text: &str) -> Code {
        Code::new(text, &Location::new(None, 1, 1))
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("42"), Value::Number(42.0));
        assert_eq!(eval(r#""hi""#), Value::from("hi"));
        assert_eq!(eval("true"), Value::Bool(true));
        assert_eq!(eval("nothing"), Value::Nothing);
        assert_eq!(eval(":sym"), Value::from("sym"));
        assert_eq!(eval("[1, \"a\"]"), Value::Sequence(vec![1.into(), "a".into()]));
    }

    #[test]
    fn test_arithmetic_operators() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("7 % 4"), Value::Number(3.0));
        assert_eq!(eval("-2 + 5"), Value::Number(3.0));
        assert_eq!(eval("10 / 4"), Value::Number(2.5));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_with("1 / 0", Bindings::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ArithmeticError);
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval(r#""a" * "b""#), Value::from("ab"));
        assert_eq!(eval(r#""n" * string(1)"#), Value::from("n1"));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2 && 2 <= 2"), Value::Bool(true));
        assert_eq!(eval(r#""a" < "b""#), Value::Bool(true));
        assert_eq!(eval("1 == 1.0"), Value::Bool(true));
        assert_eq!(eval("!true || false"), Value::Bool(false));
        assert_eq!(eval("[1, 2] == [1, 2]"), Value::Bool(true));
        let err = eval_with("1 < \"a\"", Bindings::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
    }

    #[test]
    fn test_short_circuit() {
        // `missing` is never evaluated
        assert_eq!(eval("false && missing"), Value::Bool(false));
        assert_eq!(eval("1 || missing"), Value::Number(1.0));
    }

    #[test]
    fn test_ranges() {
        assert_eq!(eval("1:3"), Value::Sequence(vec![1.into(), 2.into(), 3.into()]));
        assert_eq!(eval("3:1"), Value::Sequence(vec![]));
        assert!(eval_with("1:2.5", Bindings::new()).is_err());
    }

    #[test]
    fn test_pairs_and_named_tuples() {
        assert_eq!(eval(r#""a" => 1"#), Value::Mapping(vec![("a".into(), 1.into())]));
        assert_eq!(
            eval("(x=1, y=2)"),
            Value::Mapping(vec![("x".into(), 1.into()), ("y".into(), 2.into())])
        );
        assert_eq!(
            eval(r#"Dict("a" => 1, "b" => 2)"#),
            Value::Mapping(vec![("a".into(), 1.into()), ("b".into(), 2.into())])
        );
    }

    #[test]
    fn test_variables_and_interpolation() {
        let bindings = Bindings::new().with("name", "Ada").with("n", 2);
        assert_eq!(
            eval_with(r#""Hi $name, $(n + 1)!""#, bindings.clone()).unwrap(),
            Value::from("Hi Ada, 3!")
        );
        assert_eq!(
            eval_with(r#""Hello $name!""#, bindings.clone()).unwrap(),
            Value::from("Hello Ada!")
        );
        assert_eq!(eval_with("$name", bindings).unwrap(), Value::from("Ada"));
    }

    #[test]
    fn test_undefined_variable_errors() {
        let err = eval_with("missing + 1", Bindings::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UndefinedVariable);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_undefined_function_errors() {
        let err = eval_with("nope(1)", Bindings::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UndefinedFunction);
    }

    #[test]
    fn test_indexing_is_one_based() {
        let bindings = Bindings::new()
            .with("xs", vec!["a", "b", "c"])
            .with("user", [("name", "Ada")].into_iter().collect::<Value>());
        assert_eq!(eval_with("xs[1]", bindings.clone()).unwrap(), Value::from("a"));
        assert_eq!(eval_with("xs[3]", bindings.clone()).unwrap(), Value::from("c"));
        assert!(eval_with("xs[0]", bindings.clone()).is_err());
        assert_eq!(eval_with("user.name", bindings.clone()).unwrap(), Value::from("Ada"));
        assert_eq!(eval_with(r#"user["name"]"#, bindings).unwrap(), Value::from("Ada"));
    }

    #[test]
    fn test_assignment_updates_nearest_binding() {
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new().with("total", 0));
        host.execute(&code("total += 5")).unwrap();
        host.execute(&code("(a, b) = (1, 2)")).unwrap();
        assert_eq!(host.get("total"), Some(&Value::Number(5.0)));
        assert_eq!(host.get("b"), Some(&Value::Number(2.0)));

        let err = host.execute(&code("missing += 1")).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UndefinedVariable);
    }

    #[test]
    fn test_attributes_merge_named_and_pairs() {
        let registry = Registry::with_builtins();
        let mut host = Interpreter::new(&registry, Bindings::new().with("on", true));
        let value = host
            .evaluate_attributes(&code(r#"href="/", Symbol("xml:lang") => "en", selected=on"#))
            .unwrap();
        assert_eq!(
            value,
            Value::Mapping(vec![
                ("href".into(), "/".into()),
                ("xml:lang".into(), "en".into()),
                ("selected".into(), true.into()),
            ])
        );

        let err = host.evaluate_attributes(&code("1")).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
    }

    #[test]
    fn test_iterate() {
        let m = Value::Mapping(vec![("k".into(), 1.into())]);
        assert_eq!(
            iterate(&m).unwrap(),
            vec![Value::Sequence(vec!["k".into(), 1.into()])]
        );
        assert_eq!(iterate(&Value::from("ab")).unwrap().len(), 2);
        let err = iterate(&Value::Bool(true)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::NotIterable);
    }

    #[test]
    fn test_in_place_functions_update_the_binding() {
        let registry = Registry::with_builtins();
        let bindings = Bindings::new().with("xs", vec![1, 2]);
        let mut host = Interpreter::new(&registry, bindings);

        assert_eq!(host.eval_str("popfirst!(xs)").unwrap(), Value::from(1));
        host.eval_str("push!(xs, 3, 4)").unwrap();
        assert_eq!(host.eval_str("pop!(xs)").unwrap(), Value::from(4));
        assert_eq!(host.get("xs"), Some(&Value::from(vec![2, 3])));

        let err = host.eval_str("pop!([])").unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::InvalidExpression);
    }

    #[test]
    fn test_bang_before_equals_is_comparison() {
        let bindings = Bindings::new().with("a", 1).with("b", 2);
        assert_eq!(eval_with("a!=b", bindings.clone()).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("a != b", bindings).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_invalid_expression() {
        let err = eval_with("1 +* 2", Bindings::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::InvalidExpression);
    }
}

#[cfg(test)]
mod options_tests {
    use super::*;
    use crate::template::CompiledTemplate;

    fn render(source: &str, options: EvalOptions) -> Result<String, RenderError> {
        let template = CompiledTemplate::compile(source).unwrap();
        let registry = Registry::with_builtins();
        let mut host = Interpreter::with_options(&registry, Bindings::new(), options);
        template.render(&mut host)
    }

    #[test]
    fn test_iteration_limit() {
        let err = render("- for i in 1:5\n  %i= i", EvalOptions::new().max_iterations(3)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ResourceLimit);
        assert!(err.message.contains("loop iterations") || err.message.contains("range"));
    }

    #[test]
    fn test_iteration_limit_counts_while_loops() {
        let src = "- n = 0\n- while n < 10\n  - n += 1";
        let err = render(src, EvalOptions::new().max_iterations(4)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ResourceLimit);
        assert!(err.message.contains("loop iterations"));
    }

    #[test]
    fn test_iteration_limit_sufficient() {
        let out = render("- for i in [1, 2]\n  %i= i", EvalOptions::new().max_iterations(2)).unwrap();
        assert_eq!(out, "<i>1</i>\n<i>2</i>");
    }

    #[test]
    fn test_range_spanning_i64_extremes_is_rejected() {
        let src = "%p= length(-9000000000000000000:9000000000000000000)";
        let err = render(src, EvalOptions::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ResourceLimit);
        assert!(err.message.contains("range"));
    }

    #[test]
    fn test_huge_range_is_capped_without_iteration_limit() {
        let err = render("%p= length(1:1000000000000)", EvalOptions::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ResourceLimit);

        let out = render("%p= length(1:1000)", EvalOptions::new()).unwrap();
        assert_eq!(out, "<p>1000</p>");
    }

    #[test]
    fn test_node_evaluation_limit() {
        let err = render("%p= 1 + 2 + 3 + 4", EvalOptions::new().max_node_evaluations(3)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::ResourceLimit);
        assert!(err.message.contains("node evaluations"));
    }

    #[test]
    fn test_cancellation() {
        let token = Arc::new(AtomicBool::new(true));
        let err = render("%p= 1", EvalOptions::new().cancellation_token(token)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::Cancelled);
    }

    #[test]
    fn test_error_carries_template_location() {
        let err = render("%div\n  %p= missing", EvalOptions::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UndefinedVariable);
        assert_eq!(err.location.map(|l| l.line), Some(2));
    }
}
