use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::functions::Function;

/// Runtime value seen by template expressions.
///
/// Data coming from the caller arrives as `serde_json::Value` and is converted
/// once per evaluation. Numbers are `f64` so `NaN` and `Infinity` survive
/// arithmetic the way they do in a browser.
#[derive(Clone)]
pub enum Val {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Val>>),
    Object(Rc<BTreeMap<String, Val>>),
    Function(Arc<dyn Function>),
    /// Builtin grouping such as `Math` or `JSON`; members are looked up by
    /// qualified name in the function registry.
    Namespace(&'static str),
}

impl Val {
    pub fn str(s: impl AsRef<str>) -> Self {
        Val::Str(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Val>) -> Self {
        Val::Array(Rc::new(items))
    }

    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Val::str(s),
            Value::Array(a) => Val::array(a.iter().map(Val::from_json).collect()),
            Value::Object(m) => Val::Object(Rc::new(
                m.iter().map(|(k, v)| (k.clone(), Val::from_json(v))).collect(),
            )),
        }
    }

    /// JSON form, following `JSON.stringify`: `None` for values JSON cannot
    /// represent at the top level, non-finite numbers become `null`.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Val::Undefined | Val::Function(_) | Val::Namespace(_) => None,
            Val::Null => Some(Value::Null),
            Val::Bool(b) => Some(Value::Bool(*b)),
            Val::Num(n) => Some(number_to_json(*n)),
            Val::Str(s) => Some(Value::String(s.to_string())),
            Val::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|v| v.to_json().unwrap_or(Value::Null))
                    .collect(),
            )),
            Val::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map.iter() {
                    if let Some(json) = v.to_json() {
                        out.insert(k.clone(), json);
                    }
                }
                Some(Value::Object(out))
            }
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Val::Undefined => "undefined",
            Val::Null | Val::Array(_) | Val::Object(_) | Val::Namespace(_) => "object",
            Val::Bool(_) => "boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::Function(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Val::Undefined | Val::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined | Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Val::Undefined => f64::NAN,
            Val::Null => 0.0,
            Val::Bool(b) => f64::from(u8::from(*b)),
            Val::Num(n) => *n,
            Val::Str(s) => string_to_number(s),
            Val::Array(_) => string_to_number(&self.to_string()),
            _ => f64::NAN,
        }
    }

    /// Primitive used by `+` and comparisons: arrays and objects collapse to
    /// their string form.
    pub fn to_primitive(&self) -> Val {
        match self {
            Val::Array(_) | Val::Object(_) | Val::Function(_) | Val::Namespace(_) => {
                Val::str(self.to_string())
            }
            other => other.clone(),
        }
    }

    /// Whether `+` with this operand concatenates: strings, and everything
    /// whose primitive form is a string.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Val::Str(_) | Val::Array(_) | Val::Object(_) | Val::Function(_) | Val::Namespace(_)
        )
    }

    /// `===`
    pub fn strict_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Undefined, Val::Undefined) | (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Array(a), Val::Array(b)) => Rc::ptr_eq(a, b),
            (Val::Object(a), Val::Object(b)) => Rc::ptr_eq(a, b),
            (Val::Function(a), Val::Function(b)) => a.name() == b.name(),
            (Val::Namespace(a), Val::Namespace(b)) => a == b,
            _ => false,
        }
    }

    /// `==`
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Val::Num(_), Val::Str(_))
            | (Val::Str(_), Val::Num(_))
            | (Val::Bool(_), _)
            | (_, Val::Bool(_)) => self.to_number() == other.to_number(),
            (Val::Array(_) | Val::Object(_), Val::Str(_) | Val::Num(_))
            | (Val::Str(_) | Val::Num(_), Val::Array(_) | Val::Object(_)) => {
                self.to_primitive().loose_eq(&other.to_primitive())
            }
            _ => self.strict_eq(other),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. `None` when either side is `NaN`.
    pub fn compare(&self, other: &Val) -> Option<Ordering> {
        match (self.to_primitive(), other.to_primitive()) {
            (Val::Str(a), Val::Str(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_number().partial_cmp(&b.to_number()),
        }
    }
}

impl fmt::Display for Val {
    /// JavaScript `String(value)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Undefined => f.write_str("undefined"),
            Val::Null => f.write_str("null"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Num(n) => f.write_str(&format_number(*n)),
            Val::Str(s) => f.write_str(s),
            Val::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Val::Object(_) => f.write_str("[object Object]"),
            Val::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
            Val::Namespace(name) => write!(f, "[object {name}]"),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => write!(f, "{s:?}"),
            Val::Function(func) => write!(f, "[Function: {}]", func.name()),
            other => match other.to_json() {
                Some(json) => write!(f, "{json}"),
                None => write!(f, "{other}"),
            },
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::str(s)
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::str(s)
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

/// Number formatting compatible with `Number.prototype.toString()` for the
/// values templates realistically produce.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.abs() >= 1e21 || n.abs() < 1e-6 {
        // `1e+21`, `1.5e-7`: exponent form with an explicit sign.
        let exp = format!("{n:e}");
        match exp.split_once('e') {
            Some((mantissa, e)) if !e.starts_with('-') => format!("{mantissa}e+{e}"),
            _ => exp,
        }
    } else {
        // Shortest round-trip digits, never an exponent; integral values
        // print without a fraction.
        format!("{n}")
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// `Number(string)`: whitespace-trimmed, empty is zero, anything else that is
/// not a complete numeric literal is `NaN`.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}
