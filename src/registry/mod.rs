//! Function registration for the reference host.
//!
//! The [`Registry`] stores the functions that template expressions can
//! call, such as `join(xs, ", ")`. The host application populates it
//! before rendering; [`Registry::with_builtins`] starts from the standard
//! set listed in [`builtins`].
//!
//! There are two ways to register functions:
//!
//! - **Closure-based**: [`ClosureFunction`] for simple cases where a full
//!   trait implementation would be boilerplate.
//! - **Trait-based**: implement [`HamlFunction`] directly. The
//!   `#[haml_function]` macro in the `haml_macros` crate generates an
//!   implementation from an ordinary function signature.

pub mod builtins;

use std::collections::HashMap;

use crate::ast::value::Value;
use crate::error::{RenderError, RenderErrorKind};

// ── Trait definition ────────────────────────────────────────────────────

/// A function callable from template expressions.
pub trait HamlFunction: Send + Sync {
    /// Execute the function with pre-evaluated positional arguments.
    fn call(&self, args: Vec<Value>) -> Result<Value, RenderError>;

    /// Declare this function's name and parameter expectations.
    fn signature(&self) -> FunctionSignature;
}

// ── Signatures ──────────────────────────────────────────────────────────

/// Describes a function's name and expected parameters.
///
/// [`Registry::call`] checks arity and parameter types against the
/// signature before dispatching, unless the signature is `variadic` with
/// no declared parameters.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamDef>,
    /// Accept arguments beyond the declared parameters.
    pub variadic: bool,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            variadic: false,
        }
    }

    pub fn param(mut self, name: &str, expected_type: ValueType) -> Self {
        self.params.push(ParamDef {
            name: name.to_string(),
            expected_type: Some(expected_type),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, expected_type: ValueType) -> Self {
        self.params.push(ParamDef {
            name: name.to_string(),
            expected_type: Some(expected_type),
            required: false,
        });
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    fn check(&self, args: &[Value]) -> Result<(), RenderError> {
        if !self.variadic && args.len() > self.params.len() {
            return Err(RenderError::new(
                RenderErrorKind::TypeError,
                format!(
                    "`{}` takes at most {} argument(s), got {}",
                    self.name,
                    self.params.len(),
                    args.len()
                ),
            ));
        }
        for (index, param) in self.params.iter().enumerate() {
            match args.get(index) {
                Some(arg) => {
                    if let Some(expected) = param.expected_type
                        && !expected.matches(arg)
                    {
                        return Err(RenderError::type_error(
                            &format!("{} for `{}` argument `{}`", expected.name(), self.name, param.name),
                            arg.type_name(),
                        ));
                    }
                }
                None if param.required => {
                    return Err(RenderError::new(
                        RenderErrorKind::TypeError,
                        format!("missing required argument at position {index}: {}", param.name),
                    ));
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// A positional parameter definition.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub expected_type: Option<ValueType>,
    pub required: bool,
}

/// Type tag used in signatures for runtime validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Bool,
    Sequence,
    Mapping,
    /// Accepts any value type.
    Any,
}

impl ValueType {
    /// Check whether a runtime [`Value`] matches this type expectation.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => matches!(value, Value::String(_)),
            ValueType::Number => matches!(value, Value::Number(_)),
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::Sequence => matches!(value, Value::Sequence(_)),
            ValueType::Mapping => matches!(value, Value::Mapping(_)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Any => "any value",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Bool => "bool",
            ValueType::Sequence => "sequence",
            ValueType::Mapping => "mapping",
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────

/// Stores registered functions for use during rendering.
///
/// ```rust
/// use haml_lang::{ClosureFunction, Registry, Value};
///
/// let mut registry = Registry::new();
///
/// registry.register(ClosureFunction::new("double", |args| {
///     let n = args.first().and_then(|v| v.as_number()).unwrap_or(0.0);
///     Ok(Value::Number(n * 2.0))
/// }));
/// assert!(registry.contains("double"));
/// ```
pub struct Registry {
    functions: HashMap<String, Box<dyn HamlFunction>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry holding the standard functions from [`builtins`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Register a function. A function with the same name is replaced.
    pub fn register(&mut self, function: impl HamlFunction + 'static) {
        let sig = function.signature();
        self.functions.insert(sig.name, Box::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Validate the arguments against the function's signature and call it.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
        match self.functions.get(name) {
            Some(function) => {
                function.signature().check(&args)?;
                function.call(args)
            }
            None => Err(RenderError::undefined_function(name)),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

// ── Closure-based convenience wrapper ───────────────────────────────────

/// A [`HamlFunction`] implementation backed by a closure.
///
/// Arguments are passed through unchecked unless a signature is attached
/// with [`ClosureFunction::with_signature`].
///
/// ```rust
/// use haml_lang::{ClosureFunction, Value};
///
/// let greet = ClosureFunction::new("greet", |args| {
///     let name = args.first().and_then(|v| v.as_string()).unwrap_or("world");
///     Ok(Value::String(format!("Hello, {name}!")))
/// });
/// ```
pub struct ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, RenderError> + Send + Sync,
{
    sig: FunctionSignature,
    func: F,
}

impl<F> ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, RenderError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            sig: FunctionSignature::new(name).variadic(),
            func,
        }
    }

    /// Replace the signature; its name is used for registration.
    pub fn with_signature(mut self, sig: FunctionSignature) -> Self {
        self.sig = sig;
        self
    }
}

impl<F> HamlFunction for ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, RenderError> + Send + Sync,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, RenderError> {
        (self.func)(args)
    }

    fn signature(&self) -> FunctionSignature {
        self.sig.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            ClosureFunction::new("repeat", |args| {
                let text = args[0].as_string().unwrap_or_default().to_string();
                let count = args.get(1).and_then(Value::as_number).unwrap_or(2.0);
                Ok(Value::String(text.repeat(count as usize)))
            })
            .with_signature(
                FunctionSignature::new("repeat")
                    .param("text", ValueType::String)
                    .optional("count", ValueType::Number),
            ),
        );
        registry
    }

    #[test]
    fn test_call_dispatches() {
        let registry = registry();
        assert_eq!(
            registry.call("repeat", vec!["ab".into(), 3.into()]).unwrap(),
            Value::from("ababab")
        );
        assert_eq!(registry.call("repeat", vec!["x".into()]).unwrap(), Value::from("xx"));
    }

    #[test]
    fn test_undefined_function() {
        let err = Registry::new().call("missing", vec![]).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UndefinedFunction);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_signature_checks() {
        let registry = registry();

        let err = registry.call("repeat", vec![]).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
        assert!(err.message.contains("text"));

        let err = registry.call("repeat", vec![1.into()]).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
        assert!(err.message.contains("string"));

        let err = registry
            .call("repeat", vec!["a".into(), 1.into(), 2.into()])
            .unwrap_err();
        assert!(err.message.contains("at most 2"));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = registry();
        registry.register(ClosureFunction::new("repeat", |_| Ok(Value::Nothing)));
        assert_eq!(registry.call("repeat", vec![]).unwrap(), Value::Nothing);
    }
}
