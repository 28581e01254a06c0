//! Attribute resolver.
//!
//! Turns a tag's `#id`/`.class` shorthand plus the host's evaluated
//! attribute mapping into the ordered list of attributes written into the
//! opening tag.
//!
//! Rules, in the order they are applied:
//!
//! - Keys have `_` rewritten to `-`; nested mappings flatten with `-`
//!   (`data=(author_id=1)` becomes `data-author-id="1"`).
//! - Shorthand `id` and `class` come first, in order of first appearance,
//!   followed by expression attributes in source order.
//! - `class` collects shorthand classes then expression classes, without
//!   duplicates, joined with a space.
//! - A scalar expression `id` replaces the shorthand id; a sequence `id`
//!   is appended to it. Parts are joined with `-`.
//! - `true` renders as `name="name"`; `false` and `nothing` omit the
//!   attribute; other sequences are joined with a space.
//! - Producing the same name twice is an attribute conflict.

use std::collections::HashSet;
use std::fmt::Write;

use crate::ast::directive::Shorthand;
use crate::ast::value::Value;
use crate::error::RenderError;
use crate::render::escape::escape_html;

/// One attribute ready to be written, value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAttribute {
    pub name: String,
    pub value: String,
}

impl RenderedAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

enum Slot {
    Id,
    Class,
    Plain(String, String),
}

#[derive(Default)]
struct Resolution {
    slots: Vec<Slot>,
    ids: Vec<String>,
    classes: Vec<String>,
}

impl Resolution {
    fn from_shorthand(shorthand: &[Shorthand]) -> Self {
        let mut resolution = Self::default();
        for item in shorthand {
            match item {
                Shorthand::Id(id) => {
                    resolution.reserve_id();
                    resolution.ids = vec![id.clone()];
                }
                Shorthand::Class(class) => {
                    resolution.reserve_class();
                    resolution.classes.push(class.clone());
                }
            }
        }
        resolution
    }

    fn reserve_id(&mut self) {
        if !self.slots.iter().any(|s| matches!(s, Slot::Id)) {
            self.slots.push(Slot::Id);
        }
    }

    fn reserve_class(&mut self) {
        if !self.slots.iter().any(|s| matches!(s, Slot::Class)) {
            self.slots.push(Slot::Class);
        }
    }

    fn finish(self) -> Vec<RenderedAttribute> {
        let Resolution {
            slots,
            ids,
            classes,
        } = self;
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Id => {
                    let parts: Vec<_> = ids.iter().filter(|p| !p.is_empty()).map(String::as_str).collect();
                    if !parts.is_empty() {
                        out.push(RenderedAttribute::new("id", parts.join("-")));
                    }
                }
                Slot::Class => {
                    let mut unique: Vec<&str> = Vec::new();
                    for class in classes.iter().filter(|c| !c.is_empty()) {
                        if !unique.contains(&class.as_str()) {
                            unique.push(class);
                        }
                    }
                    if !unique.is_empty() {
                        out.push(RenderedAttribute::new("class", unique.join(" ")));
                    }
                }
                Slot::Plain(name, value) => out.push(RenderedAttribute { name, value }),
            }
        }
        out
    }
}

/// Attributes for a tag whose attributes are all shorthand.
pub fn resolve_shorthand(shorthand: &[Shorthand]) -> Vec<RenderedAttribute> {
    Resolution::from_shorthand(shorthand).finish()
}

/// Merge shorthand with an evaluated attribute mapping.
pub fn resolve(
    shorthand: &[Shorthand],
    attributes: &Value,
) -> Result<Vec<RenderedAttribute>, RenderError> {
    let entries = match attributes {
        Value::Mapping(entries) => entries.as_slice(),
        Value::Nothing => &[],
        other => return Err(RenderError::type_error("an attribute mapping", other.type_name())),
    };

    let mut flat = Vec::new();
    flatten("", entries, &mut flat);

    let mut resolution = Resolution::from_shorthand(shorthand);
    let mut seen = HashSet::new();
    for (name, value) in flat {
        if !seen.insert(name.clone()) {
            return Err(RenderError::attribute_conflict(&name));
        }
        match name.as_str() {
            "id" => {
                resolution.reserve_id();
                match value {
                    Value::Sequence(items) => resolution.ids.extend(items.iter().filter_map(value_text)),
                    scalar => {
                        if let Some(id) = value_text(scalar) {
                            resolution.ids = vec![id];
                        }
                    }
                }
            }
            "class" => {
                resolution.reserve_class();
                match value {
                    Value::Sequence(items) => {
                        resolution.classes.extend(items.iter().filter_map(value_text))
                    }
                    scalar => resolution.classes.extend(value_text(scalar)),
                }
            }
            _ => {
                let text = match value {
                    Value::Bool(true) => Some(name.clone()),
                    Value::Sequence(items) => Some(
                        items
                            .iter()
                            .filter_map(value_text)
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                    other => value_text(other),
                };
                if let Some(text) = text {
                    resolution.slots.push(Slot::Plain(name, text));
                }
            }
        }
    }

    Ok(resolution.finish())
}

fn flatten<'v>(prefix: &str, entries: &'v [(String, Value)], out: &mut Vec<(String, &'v Value)>) {
    for (key, value) in entries {
        let key = key.replace('_', "-");
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}-{key}")
        };
        match value {
            Value::Mapping(inner) => flatten(&name, inner, out),
            _ => out.push((name, value)),
        }
    }
}

/// Text of a single value, or `None` when it omits the attribute.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(false) | Value::Nothing => None,
        other => Some(other.to_output_string()),
    }
}

/// Format attributes as they appear inside an opening tag, each preceded by
/// a space: ` class="nav" href="/"`.
pub fn format_attributes(attributes: &[RenderedAttribute]) -> String {
    let mut out = String::new();
    for attr in attributes {
        let _ = write!(out, " {}=\"{}\"", attr.name, escape_html(&attr.value));
    }
    out
}
