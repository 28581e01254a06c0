//! Standard functions registered by [`Registry::with_builtins`].
//!
//! | name | behaviour |
//! |------|-----------|
//! | `join(xs, delim="", last=delim)` | text of each item joined with `delim`, `last` between the final two |
//! | `length(x)` | characters of a string, items of a sequence or mapping |
//! | `isempty(x)` | `length(x) == 0` |
//! | `uppercase(s)`, `lowercase(s)` | case conversion |
//! | `string(xs...)` | text of every argument concatenated |
//! | `collect(x)` | the items of any iterable as a sequence |
//! | `Symbol(s)` | a symbol; symbols are plain strings at runtime |
//! | `Dict(pairs...)` | a mapping built from pairs, mappings or `[k, v]` sequences |
//! | `pairs(x)`, `keys(x)`, `values(x)` | views of a mapping (or of a sequence by index) |
//! | `first(x)`, `last(x)` | the first or last item of an iterable |

use super::{ClosureFunction, FunctionSignature, Registry, ValueType};
use crate::ast::value::Value;
use crate::error::RenderError;
use crate::eval::iterate;

pub(crate) fn register_all(registry: &mut Registry) {
    registry.register(
        ClosureFunction::new("join", |args| {
            let delim = args.get(1).map(Value::to_output_string).unwrap_or_default();
            let last = args.get(2).map(Value::to_output_string);
            let items = iterate(&args[0])?;
            Ok(Value::String(join(&items, &delim, last.as_deref())))
        })
        .with_signature(
            FunctionSignature::new("join")
                .param("items", ValueType::Any)
                .optional("delim", ValueType::String)
                .optional("last", ValueType::String),
        ),
    );

    registry.register(
        ClosureFunction::new("length", |args| Ok(Value::Number(length(&args[0])? as f64)))
            .with_signature(FunctionSignature::new("length").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("isempty", |args| Ok(Value::Bool(length(&args[0])? == 0)))
            .with_signature(FunctionSignature::new("isempty").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("uppercase", |args| {
            Ok(Value::String(args[0].to_output_string().to_uppercase()))
        })
        .with_signature(FunctionSignature::new("uppercase").param("s", ValueType::String)),
    );

    registry.register(
        ClosureFunction::new("lowercase", |args| {
            Ok(Value::String(args[0].to_output_string().to_lowercase()))
        })
        .with_signature(FunctionSignature::new("lowercase").param("s", ValueType::String)),
    );

    registry.register(ClosureFunction::new("string", |args| {
        Ok(Value::String(
            args.iter().map(Value::to_output_string).collect(),
        ))
    }));

    registry.register(
        ClosureFunction::new("collect", |args| Ok(Value::Sequence(iterate(&args[0])?)))
            .with_signature(FunctionSignature::new("collect").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("Symbol", |args| Ok(Value::String(args[0].to_output_string())))
            .with_signature(FunctionSignature::new("Symbol").param("name", ValueType::String)),
    );

    registry.register(ClosureFunction::new("Dict", |args| {
        let mut entries: Vec<(String, Value)> = Vec::new();
        for arg in args {
            for (key, value) in dict_entries(arg)? {
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
            }
        }
        Ok(Value::Mapping(entries))
    }));

    registry.register(
        ClosureFunction::new("pairs", |args| indexed(&args[0]))
            .with_signature(FunctionSignature::new("pairs").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("keys", |args| {
            Ok(Value::Sequence(
                indexed_entries(&args[0])?.into_iter().map(|(k, _)| k).collect(),
            ))
        })
        .with_signature(FunctionSignature::new("keys").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("values", |args| {
            Ok(Value::Sequence(
                indexed_entries(&args[0])?.into_iter().map(|(_, v)| v).collect(),
            ))
        })
        .with_signature(FunctionSignature::new("values").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("first", |args| {
            iterate(&args[0])?.into_iter().next().ok_or_else(empty_collection)
        })
        .with_signature(FunctionSignature::new("first").param("x", ValueType::Any)),
    );

    registry.register(
        ClosureFunction::new("last", |args| {
            iterate(&args[0])?.into_iter().next_back().ok_or_else(empty_collection)
        })
        .with_signature(FunctionSignature::new("last").param("x", ValueType::Any)),
    );
}

fn length(value: &Value) -> Result<usize, RenderError> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Sequence(items) => Ok(items.len()),
        Value::Mapping(entries) => Ok(entries.len()),
        other => Err(RenderError::type_error("a string, sequence or mapping", other.type_name())),
    }
}

/// Items joined with `delim`, except the final two which use `last` when given.
fn join(items: &[Value], delim: &str, last: Option<&str>) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            match last {
                Some(last) if i + 1 == items.len() => out.push_str(last),
                _ => out.push_str(delim),
            }
        }
        out.push_str(&item.to_output_string());
    }
    out
}

fn empty_collection() -> RenderError {
    RenderError::host("collection must be non-empty")
}

/// Keys and values of a mapping, or 1-based indices and items of a sequence.
fn indexed_entries(value: &Value) -> Result<Vec<(Value, Value)>, RenderError> {
    match value {
        Value::Mapping(entries) => Ok(entries
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect()),
        Value::Sequence(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Number((i + 1) as f64), v.clone()))
            .collect()),
        other => Err(RenderError::type_error("a mapping or sequence", other.type_name())),
    }
}

fn indexed(value: &Value) -> Result<Value, RenderError> {
    Ok(Value::Sequence(
        indexed_entries(value)?
            .into_iter()
            .map(|(k, v)| Value::Sequence(vec![k, v]))
            .collect(),
    ))
}

fn dict_entries(value: Value) -> Result<Vec<(String, Value)>, RenderError> {
    match value {
        Value::Mapping(entries) => Ok(entries),
        Value::Sequence(mut items)
            if items.len() == 2 && !matches!(items[0], Value::Sequence(_) | Value::Mapping(_)) =>
        {
            let value = items.pop().unwrap_or(Value::Nothing);
            let key = items.pop().unwrap_or(Value::Nothing);
            Ok(vec![(key.to_output_string(), value)])
        }
        Value::Sequence(items) => {
            let mut entries = Vec::new();
            for item in items {
                entries.extend(dict_entries(item)?);
            }
            Ok(entries)
        }
        other => Err(RenderError::type_error("pairs", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderErrorKind;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
        Registry::with_builtins().call(name, args)
    }

    fn seq(items: Vec<Value>) -> Value {
        Value::Sequence(items)
    }

    #[test]
    fn test_join() {
        let xs = seq(vec!["a".into(), 1.into()]);
        assert_eq!(call("join", vec![xs.clone(), ", ".into()]).unwrap(), Value::from("a, 1"));
        assert_eq!(call("join", vec![xs]).unwrap(), Value::from("a1"));
    }

    #[test]
    fn test_join_last_delimiter() {
        let xs = seq(vec!["butter".into(), "cheese".into(), "eggs".into()]);
        assert_eq!(
            call("join", vec![xs, ", ".into(), ", and ".into()]).unwrap(),
            Value::from("butter, cheese, and eggs")
        );
        let two = seq(vec!["a".into(), "b".into()]);
        assert_eq!(call("join", vec![two, ", ".into(), " or ".into()]).unwrap(), Value::from("a or b"));
        let one = seq(vec!["a".into()]);
        assert_eq!(call("join", vec![one, ", ".into(), " or ".into()]).unwrap(), Value::from("a"));
    }

    #[test]
    fn test_length_and_isempty() {
        assert_eq!(call("length", vec!["héllo".into()]).unwrap(), Value::Number(5.0));
        assert_eq!(call("isempty", vec![seq(vec![])]).unwrap(), Value::Bool(true));
        let err = call("length", vec![1.into()]).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
    }

    #[test]
    fn test_case_and_string() {
        assert_eq!(call("uppercase", vec!["abc".into()]).unwrap(), Value::from("ABC"));
        assert_eq!(call("lowercase", vec!["ABC".into()]).unwrap(), Value::from("abc"));
        assert_eq!(
            call("string", vec!["n=".into(), 3.into(), true.into()]).unwrap(),
            Value::from("n=3true")
        );
    }

    #[test]
    fn test_dict_later_keys_win() {
        let a = Value::Mapping(vec![("a".into(), 1.into())]);
        let b = Value::Mapping(vec![("a".into(), 2.into()), ("b".into(), 3.into())]);
        assert_eq!(
            call("Dict", vec![a, b]).unwrap(),
            Value::Mapping(vec![("a".into(), 2.into()), ("b".into(), 3.into())])
        );
    }

    #[test]
    fn test_dict_from_key_value_sequences() {
        let pair = seq(vec!["k".into(), "v".into()]);
        assert_eq!(
            call("Dict", vec![pair]).unwrap(),
            Value::Mapping(vec![("k".into(), "v".into())])
        );
    }

    #[test]
    fn test_mapping_views() {
        let m = Value::Mapping(vec![("x".into(), 1.into()), ("y".into(), 2.into())]);
        assert_eq!(call("keys", vec![m.clone()]).unwrap(), seq(vec!["x".into(), "y".into()]));
        assert_eq!(call("values", vec![m.clone()]).unwrap(), seq(vec![1.into(), 2.into()]));
        assert_eq!(
            call("pairs", vec![m]).unwrap(),
            seq(vec![seq(vec!["x".into(), 1.into()]), seq(vec!["y".into(), 2.into()])])
        );
        assert_eq!(
            call("keys", vec![seq(vec!["a".into(), "b".into()])]).unwrap(),
            seq(vec![1.into(), 2.into()])
        );
    }

    #[test]
    fn test_first_last() {
        let xs = seq(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(call("first", vec![xs.clone()]).unwrap(), Value::Number(1.0));
        assert_eq!(call("last", vec![xs]).unwrap(), Value::Number(3.0));
        assert_eq!(call("first", vec!["abc".into()]).unwrap(), Value::from("a"));
        assert!(call("last", vec![seq(vec![])]).is_err());
    }

    #[test]
    fn test_symbol_and_collect() {
        assert_eq!(call("Symbol", vec!["xml:lang".into()]).unwrap(), Value::from("xml:lang"));
        assert_eq!(
            call("collect", vec!["ab".into()]).unwrap(),
            seq(vec!["a".into(), "b".into()])
        );
    }
}
