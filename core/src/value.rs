//! # Value Model
//!
//! A typed view of a dynamically-typed configuration value, plus rendering back
//! to HCL expression source.

use hcl::Number;
use hcl_edit::Ident;
use indexmap::IndexMap;
use std::fmt::Write;

/// A configuration value as seen by the merge engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// `null`.
    #[default]
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Integer or floating point number.
    Number(Number),
    /// A string literal (already unescaped).
    String(String),
    /// An ordered sequence (HCL tuple or list).
    List(Vec<Value>),
    /// A key-ordered object. Lookup is by key, order is kept for re-serialization.
    Object(IndexMap<String, Value>),
    /// An expression that could not be evaluated, kept as its source text.
    Unevaluated(String),
}

impl Value {
    /// Returns true for `Value::Object`.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Returns true for `Value::List`.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Returns true when the value could not be materialized.
    pub fn is_unevaluated(&self) -> bool {
        matches!(self, Value::Unevaluated(_))
    }

    /// Returns the string slice if this is a `Value::String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Unevaluated(_) => "expression",
        }
    }

    /// Renders the value as HCL expression source.
    ///
    /// `indent` is the indentation of the line the expression starts on;
    /// continuation lines of multi-line objects and lists are aligned to it.
    ///
    /// # Examples
    /// ```
    /// use kungfu_core::Value;
    /// use indexmap::IndexMap;
    ///
    /// let mut tags = IndexMap::new();
    /// tags.insert("Name".to_string(), Value::from("web"));
    /// assert_eq!(
    ///     Value::Object(tags).render("  "),
    ///     "{\n    Name = \"web\"\n  }"
    /// );
    /// ```
    pub fn render(&self, indent: &str) -> String {
        let mut out = String::new();
        render_into(self, indent, &mut out);
        out
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Object(_))
    }
}

impl From<hcl::Value> for Value {
    fn from(value: hcl::Value) -> Self {
        match value {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => Value::Bool(b),
            hcl::Value::Number(n) => Value::Number(n),
            hcl::Value::String(s) => Value::String(s),
            hcl::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            hcl::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

const INDENT_STEP: &str = "  ";

fn render_into(value: &Value, indent: &str, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => quote_into(s, out),
        Value::Unevaluated(raw) => out.push_str(raw),
        Value::List(items) if items.is_empty() => out.push_str("[]"),
        Value::List(items) if items.iter().all(Value::is_scalar) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(item, indent, out);
            }
            out.push(']');
        }
        Value::List(items) => {
            let inner = format!("{}{}", indent, INDENT_STEP);
            out.push_str("[\n");
            for item in items {
                out.push_str(&inner);
                render_into(item, &inner, out);
                out.push_str(",\n");
            }
            out.push_str(indent);
            out.push(']');
        }
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            let inner = format!("{}{}", indent, INDENT_STEP);
            out.push_str("{\n");
            for (key, item) in map {
                out.push_str(&inner);
                if Ident::try_new(key.as_str()).is_ok() {
                    out.push_str(key);
                } else {
                    quote_into(key, out);
                }
                out.push_str(" = ");
                render_into(item, &inner, out);
                out.push('\n');
            }
            out.push_str(indent);
            out.push('}');
        }
    }
}

/// Writes `s` as a quoted HCL string literal, escaping template sequences.
fn quote_into(s: &str, out: &mut String) {
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
}
