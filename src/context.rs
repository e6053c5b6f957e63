use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::functions::{Function, Registry};

/// Name under which the environment snapshot is exposed.
pub const ENV_BINDING: &str = "env";

/// Keys never admitted into an evaluation context.
pub const DENIED_KEYS: &[&str] = &[
    "eval",
    "Function",
    "constructor",
    "prototype",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "globalThis",
    "global",
    "process",
    "require",
    "module",
    "exports",
    "import",
];

/// Keys callers are expected to pass; admitted whatever non-function value
/// they carry.
pub const ALLOWED_KEYS: &[&str] = &[
    ENV_BINDING,
    "files",
    "fileList",
    "config",
    "request",
    "req",
    "query",
    "params",
    "headers",
    "session",
    "arc",
    "tests",
];

/// Host object kinds admitted for any key.
pub const ALLOWED_OBJECT_KINDS: &[&str] = &["Date", "Number", "String", "Boolean"];

pub type NativeCallback = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A value supplied by the caller for one context key.
#[derive(Clone)]
pub enum ContextValue {
    /// Primitive, plain mapping or sequence.
    Data(Value),
    Date(DateTime<Utc>),
    /// Host object of a named kind (`Map`, `Buffer`, a boxed `Number`...).
    Object { kind: String, value: Value },
    /// Host callback. Never reaches an expression.
    Function(NativeCallback),
}

impl ContextValue {
    pub fn object(kind: impl Into<String>, value: Value) -> Self {
        ContextValue::Object {
            kind: kind.into(),
            value,
        }
    }

    pub fn function(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        ContextValue::Function(Arc::new(f))
    }

    fn kind(&self) -> &str {
        match self {
            ContextValue::Data(_) => "data",
            ContextValue::Date(_) => "Date",
            ContextValue::Object { kind, .. } => kind,
            ContextValue::Function(_) => "function",
        }
    }

    /// Data form seen by expressions; `None` for functions.
    fn to_data(&self) -> Option<Value> {
        match self {
            ContextValue::Data(v) | ContextValue::Object { value: v, .. } => Some(v.clone()),
            ContextValue::Date(d) => Some(Value::String(
                d.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            ContextValue::Function(_) => None,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Data(v) => f.debug_tuple("Data").field(v).finish(),
            ContextValue::Date(d) => f.debug_tuple("Date").field(d).finish(),
            ContextValue::Object { kind, value } => f
                .debug_struct("Object")
                .field("kind", kind)
                .field("value", value)
                .finish(),
            ContextValue::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<Value> for ContextValue {
    fn from(v: Value) -> Self {
        ContextValue::Data(v)
    }
}

impl From<DateTime<Utc>> for ContextValue {
    fn from(d: DateTime<Utc>) -> Self {
        ContextValue::Date(d)
    }
}

macro_rules! data_from {
    ($($t:ty),*) => {
        $(impl From<$t> for ContextValue {
            fn from(v: $t) -> Self {
                ContextValue::Data(Value::from(v))
            }
        })*
    };
}

data_from!(&str, String, bool, i64, u64, f64);

/// Bindings supplied by a caller for one `load_template` call.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    entries: BTreeMap<String, ContextValue>,
    bypass_cache: bool,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Top-level members of a JSON object; anything else yields an empty
    /// context.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into(),
            _ => Self::default(),
        }
    }

    /// Skip the template cache for this call even in production mode. For
    /// callers whose output depends on values and not only on key shape.
    pub fn uncached(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn is_cacheable(&self) -> bool {
        !self.bypass_cache
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Map<String, Value>> for TemplateContext {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().map(|(k, v)| (k, ContextValue::Data(v))).collect(),
            bypass_cache: false,
        }
    }
}

/// What an expression name is bound to.
#[derive(Clone)]
pub enum Binding {
    Data(Value),
    Function(Arc<dyn Function>),
    Namespace(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    DeniedKey,
    ShadowsBuiltin,
    Function,
    UnsafeObject(String),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::DeniedKey => f.write_str("key is deny-listed"),
            ExclusionReason::ShadowsBuiltin => f.write_str("key shadows a builtin"),
            ExclusionReason::Function => f.write_str("functions are not allowed"),
            ExclusionReason::UnsafeObject(kind) => {
                write!(f, "object kind `{kind}` is not allowed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub key: String,
    pub reason: ExclusionReason,
}

/// The names visible to one evaluation: builtins, the environment snapshot
/// and the caller bindings that passed the safety checks.
#[derive(Clone, Default)]
pub struct SafeContext {
    bindings: BTreeMap<String, Binding>,
    excluded: Vec<Exclusion>,
}

impl SafeContext {
    pub fn build(caller: &TemplateContext, env: &BTreeMap<String, String>, registry: &Registry) -> Self {
        let mut ctx = SafeContext::default();
        for (name, f) in registry.globals() {
            ctx.bindings.insert(name.to_string(), Binding::Function(f));
        }
        for ns in registry.namespaces() {
            ctx.bindings.insert(ns.to_string(), Binding::Namespace(ns));
        }
        let env: Map<String, Value> = env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        ctx.bindings
            .insert(ENV_BINDING.to_string(), Binding::Data(Value::Object(env)));

        for (key, value) in caller.iter() {
            match check(key, value, &ctx.bindings) {
                Ok(data) => {
                    ctx.bindings.insert(key.to_string(), Binding::Data(data));
                }
                Err(reason) => {
                    warn!(key, kind = value.kind(), %reason, "excluding context value");
                    ctx.excluded.push(Exclusion {
                        key: key.to_string(),
                        reason,
                    });
                }
            }
        }
        ctx
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Caller keys dropped while building, ordered by key.
    pub fn excluded(&self) -> &[Exclusion] {
        &self.excluded
    }
}

fn check(
    key: &str,
    value: &ContextValue,
    bindings: &BTreeMap<String, Binding>,
) -> Result<Value, ExclusionReason> {
    if DENIED_KEYS.contains(&key) {
        return Err(ExclusionReason::DeniedKey);
    }
    if matches!(
        bindings.get(key),
        Some(Binding::Function(_) | Binding::Namespace(_))
    ) {
        return Err(ExclusionReason::ShadowsBuiltin);
    }
    let data = value.to_data().ok_or(ExclusionReason::Function)?;
    if ALLOWED_KEYS.contains(&key) {
        return Ok(data);
    }
    match value {
        ContextValue::Object { kind, .. } if !ALLOWED_OBJECT_KINDS.contains(&kind.as_str()) => {
            Err(ExclusionReason::UnsafeObject(kind.clone()))
        }
        _ => Ok(data),
    }
}
