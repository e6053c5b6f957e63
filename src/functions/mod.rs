use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::errors::{EvalError, Result};
use crate::value::Val;

/// A function callable from template expressions.
///
/// Names containing a dot (`Math.floor`) are members of a namespace; the
/// namespace itself becomes a binding in every evaluation context.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> RangeInclusive<usize>;
    fn call(&self, args: &[Val]) -> Result<Val>;
}

/// Check `args` against the declared arity, then call.
pub fn invoke(f: &dyn Function, args: &[Val]) -> Result<Val> {
    let arity = f.arity();
    if !arity.contains(&args.len()) {
        let expected = if arity.start() == arity.end() {
            arity.start().to_string()
        } else if *arity.end() == usize::MAX {
            format!("at least {}", arity.start())
        } else {
            format!("{} to {}", arity.start(), arity.end())
        };
        return Err(EvalError::Type(format!(
            "{} expects {expected} argument(s), got {}",
            f.name(),
            args.len()
        )));
    }
    f.call(args)
}

/// Function backed by a plain `fn` pointer.
pub struct NativeFunction {
    name: &'static str,
    arity: RangeInclusive<usize>,
    f: fn(&[Val]) -> Result<Val>,
}

impl NativeFunction {
    pub const fn new(name: &'static str, arity: RangeInclusive<usize>, f: fn(&[Val]) -> Result<Val>) -> Self {
        Self { name, arity, f }
    }
}

impl Function for NativeFunction {
    fn name(&self) -> &'static str {
        self.name
    }

    fn arity(&self) -> RangeInclusive<usize> {
        self.arity.clone()
    }

    fn call(&self, args: &[Val]) -> Result<Val> {
        (self.f)(args)
    }
}

/// Thread-safe function registry.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for f in builtins::all() {
            registry.register(f);
        }
        registry
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let map = Arc::make_mut(&mut self.inner);
        map.insert(f.name(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }

    /// Top-level functions (names without a namespace).
    pub fn globals(&self) -> impl Iterator<Item = (&'static str, Arc<dyn Function>)> + '_ {
        self.inner
            .iter()
            .filter(|(name, _)| !name.contains('.'))
            .map(|(name, f)| (*name, f.clone()))
    }

    /// Distinct namespace prefixes, e.g. `Math` for `Math.floor`.
    pub fn namespaces(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self
            .inner
            .keys()
            .filter_map(|name| name.split_once('.').map(|(ns, _)| ns))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Member of a namespace: a constant (`Math.PI`) or a function.
    pub fn member(&self, namespace: &str, name: &str) -> Val {
        if let Some(c) = builtins::constant(namespace, name) {
            return c;
        }
        self.get(&format!("{namespace}.{name}"))
            .map(Val::Function)
            .unwrap_or(Val::Undefined)
    }
}

pub mod builtins {
    use chrono::{DateTime, NaiveDate, Utc};

    use super::*;

    const ANY: usize = usize::MAX;

    pub(super) fn all() -> Vec<NativeFunction> {
        vec![
            NativeFunction::new("escape", 1..=1, escape_html),
            NativeFunction::new("encodeURIComponent", 1..=1, encode_uri_component),
            NativeFunction::new("decodeURIComponent", 1..=1, decode_uri_component),
            NativeFunction::new("parseInt", 1..=2, parse_int),
            NativeFunction::new("parseFloat", 1..=1, parse_float),
            NativeFunction::new("isNaN", 1..=1, |a| Ok(Val::Bool(a[0].to_number().is_nan()))),
            NativeFunction::new("String", 0..=1, |a| Ok(Val::str(arg(a, 0).to_string()))),
            NativeFunction::new("Number", 0..=1, |a| {
                Ok(Val::Num(a.first().map(Val::to_number).unwrap_or(0.0)))
            }),
            NativeFunction::new("Boolean", 0..=1, |a| Ok(Val::Bool(arg(a, 0).truthy()))),
            NativeFunction::new("Math.floor", 1..=1, |a| math1(a, f64::floor)),
            NativeFunction::new("Math.ceil", 1..=1, |a| math1(a, f64::ceil)),
            NativeFunction::new("Math.round", 1..=1, |a| math1(a, |x| (x + 0.5).floor())),
            NativeFunction::new("Math.trunc", 1..=1, |a| math1(a, f64::trunc)),
            NativeFunction::new("Math.abs", 1..=1, |a| math1(a, f64::abs)),
            NativeFunction::new("Math.sqrt", 1..=1, |a| math1(a, f64::sqrt)),
            NativeFunction::new("Math.sign", 1..=1, |a| {
                math1(a, |x| if x == 0.0 || x.is_nan() { x } else { x.signum() })
            }),
            NativeFunction::new("Math.pow", 2..=2, |a| Ok(Val::Num(a[0].to_number().powf(a[1].to_number())))),
            NativeFunction::new("Math.min", 0..=ANY, |a| Ok(Val::Num(fold_numbers(a, f64::INFINITY, f64::min)))),
            NativeFunction::new("Math.max", 0..=ANY, |a| Ok(Val::Num(fold_numbers(a, f64::NEG_INFINITY, f64::max)))),
            NativeFunction::new("Date.now", 0..=0, |_| Ok(Val::Num(Utc::now().timestamp_millis() as f64))),
            NativeFunction::new("Date.parse", 1..=1, date_parse),
            NativeFunction::new("JSON.stringify", 1..=3, json_stringify),
            NativeFunction::new("JSON.parse", 1..=1, json_parse),
            NativeFunction::new("Object.keys", 1..=1, |a| object_entries(a, |k, _| Val::str(k))),
            NativeFunction::new("Object.values", 1..=1, |a| object_entries(a, |_, v| v.clone())),
            NativeFunction::new("Object.entries", 1..=1, |a| {
                object_entries(a, |k, v| Val::array(vec![Val::str(k), v.clone()]))
            }),
            NativeFunction::new("Array.isArray", 1..=1, |a| Ok(Val::Bool(matches!(a[0], Val::Array(_))))),
        ]
    }

    pub(super) fn constant(namespace: &str, name: &str) -> Option<Val> {
        let n = match (namespace, name) {
            ("Math", "PI") => std::f64::consts::PI,
            ("Math", "E") => std::f64::consts::E,
            ("Math", "LN2") => std::f64::consts::LN_2,
            ("Math", "LN10") => std::f64::consts::LN_10,
            ("Math", "SQRT2") => std::f64::consts::SQRT_2,
            _ => return None,
        };
        Some(Val::Num(n))
    }

    fn arg(args: &[Val], i: usize) -> Val {
        args.get(i).cloned().unwrap_or(Val::Undefined)
    }

    fn math1(args: &[Val], f: impl Fn(f64) -> f64) -> Result<Val> {
        Ok(Val::Num(f(args[0].to_number())))
    }

    fn fold_numbers(args: &[Val], init: f64, f: fn(f64, f64) -> f64) -> f64 {
        args.iter().map(Val::to_number).fold(init, |acc, x| {
            if acc.is_nan() || x.is_nan() {
                f64::NAN
            } else {
                f(acc, x)
            }
        })
    }

    /// HTML-entity-encode `& < > " '`. Nullish input renders as nothing.
    pub fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                other => out.push(other),
            }
        }
        out
    }

    fn escape_html(args: &[Val]) -> Result<Val> {
        if args[0].is_nullish() {
            return Ok(Val::str(""));
        }
        Ok(Val::str(escape(&args[0].to_string())))
    }

    fn encode_uri_component(args: &[Val]) -> Result<Val> {
        Ok(Val::str(urlencoding::encode(&args[0].to_string())))
    }

    fn decode_uri_component(args: &[Val]) -> Result<Val> {
        urlencoding::decode(&args[0].to_string())
            .map(Val::str)
            .map_err(|_| EvalError::Type("URI malformed".into()))
    }

    fn parse_int(args: &[Val]) -> Result<Val> {
        let text = args[0].to_string();
        let mut s = text.trim_start();
        let negative = s.starts_with('-');
        if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
            s = rest;
        }
        let mut radix = match args.get(1).map(Val::to_number) {
            Some(r) if r.is_finite() && r != 0.0 => r.trunc() as u32,
            _ => 10,
        };
        if !(2..=36).contains(&radix) {
            return Ok(Val::Num(f64::NAN));
        }
        if radix == 16 || args.get(1).is_none() {
            if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                s = rest;
                radix = 16;
            }
        }
        let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
        if digits.is_empty() {
            return Ok(Val::Num(f64::NAN));
        }
        let value = digits
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d));
        Ok(Val::Num(if negative { -value } else { value }))
    }

    fn parse_float(args: &[Val]) -> Result<Val> {
        let text = args[0].to_string();
        let s = text.trim_start();
        let unsigned = s.trim_start_matches(['+', '-']);
        if unsigned.starts_with("Infinity") {
            let neg = s.starts_with('-');
            return Ok(Val::Num(if neg { f64::NEG_INFINITY } else { f64::INFINITY }));
        }
        // Longest prefix that parses as a float.
        let end = s
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .filter(|&i| {
                let prefix = &s[..i];
                !prefix.ends_with(['e', 'E', '+', '-'])
                    && prefix.parse::<f64>().is_ok()
                    && !prefix.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
            })
            .last();
        Ok(Val::Num(
            end.and_then(|i| s[..i].parse().ok()).unwrap_or(f64::NAN),
        ))
    }

    fn date_parse(args: &[Val]) -> Result<Val> {
        let s = args[0].to_string();
        let s = s.trim();
        let millis = DateTime::parse_from_rfc3339(s)
            .map(|d| d.timestamp_millis())
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc().timestamp_millis())
            });
        Ok(Val::Num(millis.map(|m| m as f64).unwrap_or(f64::NAN)))
    }

    fn json_stringify(args: &[Val]) -> Result<Val> {
        let Some(json) = args[0].to_json() else {
            return Ok(Val::Undefined);
        };
        let indent = args.get(2).map(Val::to_number).filter(|n| *n >= 1.0);
        let text = if indent.is_some() {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        }
        .map_err(|e| EvalError::Type(e.to_string()))?;
        Ok(Val::str(text))
    }

    fn json_parse(args: &[Val]) -> Result<Val> {
        let text = args[0].to_string();
        serde_json::from_str::<serde_json::Value>(&text)
            .map(|v| Val::from_json(&v))
            .map_err(|e| EvalError::Parse(format!("JSON.parse: {e}")))
    }

    fn object_entries(args: &[Val], f: impl Fn(&str, &Val) -> Val) -> Result<Val> {
        match &args[0] {
            Val::Object(map) => Ok(Val::array(map.iter().map(|(k, v)| f(k, v)).collect())),
            Val::Array(items) => Ok(Val::array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| f(&i.to_string(), v))
                    .collect(),
            )),
            Val::Str(s) => Ok(Val::array(
                s.chars()
                    .enumerate()
                    .map(|(i, c)| f(&i.to_string(), &Val::str(c.to_string())))
                    .collect(),
            )),
            v if v.is_nullish() => Err(EvalError::Type(
                "Cannot convert undefined or null to object".into(),
            )),
            _ => Ok(Val::array(Vec::new())),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Val]) -> Val {
        let registry = Registry::with_builtins();
        let f = registry.get(name).unwrap();
        invoke(f.as_ref(), args).unwrap()
    }

    #[test]
    fn escape_encodes_all_five_characters() {
        assert_eq!(
            builtins::escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn parse_int_reads_prefixes() {
        assert_eq!(call("parseInt", &[Val::str("42px")]).to_string(), "42");
        assert_eq!(call("parseInt", &[Val::str("  -7")]).to_string(), "-7");
        assert_eq!(call("parseInt", &[Val::str("0x1A")]).to_string(), "26");
        assert_eq!(call("parseInt", &[Val::str("ff"), Val::Num(16.0)]).to_string(), "255");
        assert_eq!(call("parseInt", &[Val::str("abc")]).to_string(), "NaN");
    }

    #[test]
    fn parse_float_reads_prefixes() {
        assert_eq!(call("parseFloat", &[Val::str("3.25rem")]).to_string(), "3.25");
        assert_eq!(call("parseFloat", &[Val::str("1e3")]).to_string(), "1000");
        assert_eq!(call("parseFloat", &[Val::str("x1")]).to_string(), "NaN");
    }

    #[test]
    fn uri_component_round_trip() {
        let encoded = call("encodeURIComponent", &[Val::str("a b&c")]);
        assert_eq!(encoded.to_string(), "a%20b%26c");
        assert_eq!(call("decodeURIComponent", &[encoded]).to_string(), "a b&c");
    }

    #[test]
    fn math_min_max() {
        assert_eq!(call("Math.max", &[Val::Num(1.0), Val::str("5"), Val::Num(3.0)]).to_string(), "5");
        assert_eq!(call("Math.min", &[]).to_string(), "Infinity");
        assert_eq!(call("Math.round", &[Val::Num(2.5)]).to_string(), "3");
    }

    #[test]
    fn date_parse_accepts_rfc3339_and_plain_dates() {
        assert_eq!(call("Date.parse", &[Val::str("1970-01-02")]).to_string(), "86400000");
        assert_eq!(
            call("Date.parse", &[Val::str("1970-01-01T00:00:01Z")]).to_string(),
            "1000"
        );
        assert_eq!(call("Date.parse", &[Val::str("soon")]).to_string(), "NaN");
    }

    #[test]
    fn arity_is_enforced() {
        let registry = Registry::with_builtins();
        let f = registry.get("escape").unwrap();
        let err = invoke(f.as_ref(), &[]).unwrap_err();
        assert_eq!(err, EvalError::Type("escape expects 1 argument(s), got 0".into()));
    }

    #[test]
    fn namespaces_and_constants() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.namespaces(), vec!["Array", "Date", "JSON", "Math", "Object"]);
        assert_eq!(registry.member("Math", "PI").to_string(), std::f64::consts::PI.to_string());
        assert!(matches!(registry.member("Math", "floor"), Val::Function(_)));
        assert!(matches!(registry.member("Math", "nope"), Val::Undefined));
    }

    #[test]
    fn registering_replaces_by_name() {
        let mut registry = Registry::with_builtins();
        registry.register(NativeFunction::new("shout", 1..=1, |a| {
            Ok(Val::str(a[0].to_string().to_uppercase()))
        }));
        assert_eq!(call_in(&registry, "shout", &[Val::str("hi")]).to_string(), "HI");
    }

    fn call_in(registry: &Registry, name: &str, args: &[Val]) -> Val {
        invoke(registry.get(name).unwrap().as_ref(), args).unwrap()
    }
}
