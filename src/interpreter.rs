use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::rc::Rc;
use std::sync::Arc;

use crate::context::{Binding, SafeContext};
use crate::errors::{EvalError, Result};
use crate::expression::{BinaryOp, Expr, LogicalOp, Part, Property, Template, UnaryOp, MAX_NESTING};
use crate::functions::{invoke, Function, Registry};
use crate::value::{format_number, Val};

/// Upper bound, in bytes, on any string an expression builds.
pub const MAX_STRING_LEN: usize = 1 << 24;

/// Evaluation recursion limit. Parsed templates stay well below it; it
/// guards hand-built trees passed to [`evaluate`].
pub const MAX_EVAL_DEPTH: usize = 2 * MAX_NESTING;

/// Render a parsed template against `ctx`. Only names bound in `ctx` (and
/// arrow-function parameters) are visible.
pub fn render(template: &Template, ctx: &SafeContext, registry: &Registry) -> Result<String> {
    let scope = Scope::root(ctx);
    Interpreter::new(registry).render_parts(&template.parts, &scope)
}

/// Evaluate a single parsed expression against `ctx`.
pub fn evaluate(expr: &Expr, ctx: &SafeContext, registry: &Registry) -> Result<Val> {
    let scope = Scope::root(ctx);
    Interpreter::new(registry).eval(expr, &scope)
}

struct Scope<'p> {
    vars: HashMap<String, Val>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn root(ctx: &SafeContext) -> Scope<'static> {
        let vars = ctx
            .iter()
            .map(|(name, binding)| {
                let val = match binding {
                    Binding::Data(v) => Val::from_json(v),
                    Binding::Function(f) => Val::Function(f.clone()),
                    Binding::Namespace(ns) => Val::Namespace(*ns),
                };
                (name.to_string(), val)
            })
            .collect();
        Scope { vars, parent: None }
    }

    fn lookup(&self, name: &str) -> Option<Val> {
        match self.vars.get(name) {
            Some(v) => Some(v.clone()),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }
}

enum Callback<'e> {
    Arrow { params: &'e [String], body: &'e Expr },
    Native(Arc<dyn Function>),
}

struct Interpreter<'r> {
    registry: &'r Registry,
    depth: Cell<usize>,
}

impl<'r> Interpreter<'r> {
    fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            depth: Cell::new(0),
        }
    }

    fn render_parts(&self, parts: &[Part], scope: &Scope) -> Result<String> {
        let mut out = CappedString::default();
        for part in parts {
            let written = match part {
                Part::Text(t) => out.write_str(t),
                Part::Expr(e) => write!(out, "{}", self.eval(e, scope)?),
            };
            written.map_err(|_| string_too_long())?;
        }
        Ok(out.0)
    }

    fn nested<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let depth = self.depth.get() + 1;
        if depth > MAX_EVAL_DEPTH {
            return Err(EvalError::Range("Maximum call stack size exceeded".into()));
        }
        self.depth.set(depth);
        let out = f();
        self.depth.set(depth - 1);
        out
    }

    fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Val> {
        self.nested(|| self.eval_node(expr, scope))
    }

    fn eval_node(&self, expr: &Expr, scope: &Scope) -> Result<Val> {
        match expr {
            Expr::Undefined => Ok(Val::Undefined),
            Expr::Null => Ok(Val::Null),
            Expr::Bool(b) => Ok(Val::Bool(*b)),
            Expr::Num(n) => Ok(Val::Num(*n)),
            Expr::Str(s) => Ok(Val::str(s)),
            Expr::Template(parts) => Ok(Val::str(self.render_parts(parts, scope)?)),
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| EvalError::Reference(name.clone())),
            Expr::Array(items) => Ok(Val::array(
                items
                    .iter()
                    .map(|e| self.eval(e, scope))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (k, e) in entries {
                    map.insert(k.clone(), self.eval(e, scope)?);
                }
                Ok(Val::Object(Rc::new(map)))
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or(Val::Undefined))
            }
            Expr::Arrow { .. } => Err(EvalError::Type(
                "arrow functions are only supported as callback arguments".into(),
            )),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, scope),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                binary(*op, &l, &r)
            }
            Expr::Logical { op, lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(rhs, scope)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
        }
    }

    /// Member and call chains. `None` means an optional link (`?.`) met a
    /// nullish value and the rest of the chain is skipped.
    fn eval_chain(&self, expr: &Expr, scope: &Scope) -> Result<Option<Val>> {
        self.nested(|| self.eval_chain_link(expr, scope))
    }

    fn eval_chain_link(&self, expr: &Expr, scope: &Scope) -> Result<Option<Val>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(obj) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && obj.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(property, scope)?;
                self.get_member(&obj, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, scope),
            other => self.eval_node(other, scope).map(Some),
        }
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr], optional: bool, scope: &Scope) -> Result<Option<Val>> {
        if let Expr::Member {
            object,
            property,
            optional: member_optional,
        } = callee
        {
            let Some(receiver) = self.eval_chain(object, scope)? else {
                return Ok(None);
            };
            if *member_optional && receiver.is_nullish() {
                return Ok(None);
            }
            let name = self.property_key(property, scope)?;
            if let Val::Namespace(ns) = receiver {
                let member = self.registry.member(ns, &name);
                if optional && member.is_nullish() {
                    return Ok(None);
                }
                return self.call_value(&member, callee, args, scope).map(Some);
            }
            if let Val::Object(map) = &receiver {
                if let Some(f @ Val::Function(_)) = map.get(&name) {
                    return self.call_value(f, callee, args, scope).map(Some);
                }
            }
            return self.call_method(&receiver, &name, args, callee, scope).map(Some);
        }

        let Some(f) = self.eval_chain(callee, scope)? else {
            return Ok(None);
        };
        if optional && f.is_nullish() {
            return Ok(None);
        }
        self.call_value(&f, callee, args, scope).map(Some)
    }

    fn call_value(&self, f: &Val, callee: &Expr, args: &[Expr], scope: &Scope) -> Result<Val> {
        let Val::Function(f) = f else {
            return Err(not_a_function(callee));
        };
        let args = self.eval_args(args, scope)?;
        invoke(f.as_ref(), &args)
    }

    fn eval_args(&self, args: &[Expr], scope: &Scope) -> Result<Vec<Val>> {
        args.iter().map(|a| self.eval(a, scope)).collect()
    }

    fn property_key(&self, property: &Property, scope: &Scope) -> Result<String> {
        Ok(match property {
            Property::Named(name) => name.clone(),
            Property::Computed(e) => match self.eval(e, scope)? {
                Val::Num(n) => format_number(n),
                other => other.to_string(),
            },
        })
    }

    fn get_member(&self, obj: &Val, key: &str) -> Result<Val> {
        Ok(match obj {
            Val::Undefined | Val::Null => {
                return Err(EvalError::Type(format!(
                    "Cannot read properties of {obj} (reading '{key}')"
                )));
            }
            Val::Str(s) => match key {
                "length" => Val::Num(s.chars().count() as f64),
                _ => index(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Val::str(c.to_string()))
                    .unwrap_or(Val::Undefined),
            },
            Val::Array(items) => match key {
                "length" => Val::Num(items.len() as f64),
                _ => index(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Val::Undefined),
            },
            Val::Object(map) => map.get(key).cloned().unwrap_or(Val::Undefined),
            Val::Namespace(ns) => self.registry.member(ns, key),
            Val::Function(f) if key == "name" => Val::str(f.name()),
            _ => Val::Undefined,
        })
    }

    fn eval_unary(&self, op: UnaryOp, operand: &Expr, scope: &Scope) -> Result<Val> {
        Ok(match op {
            UnaryOp::TypeOf => match operand {
                Expr::Ident(name) if scope.lookup(name).is_none() => Val::str("undefined"),
                _ => Val::str(self.eval(operand, scope)?.type_of()),
            },
            UnaryOp::Not => Val::Bool(!self.eval(operand, scope)?.truthy()),
            UnaryOp::Neg => Val::Num(-bounded_primitive(&self.eval(operand, scope)?)?.to_number()),
            UnaryOp::Plus => Val::Num(bounded_primitive(&self.eval(operand, scope)?)?.to_number()),
        })
    }

    fn callback<'e>(&self, arg: Option<&'e Expr>, scope: &Scope, method: &str) -> Result<Callback<'e>> {
        match arg {
            Some(Expr::Arrow { params, body }) => Ok(Callback::Arrow { params, body }),
            Some(other) => match self.eval(other, scope)? {
                Val::Function(f) => Ok(Callback::Native(f)),
                v => Err(EvalError::Type(format!("{v} is not a function ({method} callback)"))),
            },
            None => Err(EvalError::Type(format!("undefined is not a function ({method} callback)"))),
        }
    }

    fn call_callback(&self, cb: &Callback, args: &[Val], scope: &Scope) -> Result<Val> {
        match cb {
            Callback::Arrow { params, body } => {
                let vars = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (p.clone(), args.get(i).cloned().unwrap_or(Val::Undefined)))
                    .collect();
                let child = Scope {
                    vars,
                    parent: Some(scope),
                };
                self.eval(body, &child)
            }
            // Natives take only the element; `items.map(escape)` must not
            // trip the arity check on the index argument.
            Callback::Native(f) => invoke(f.as_ref(), &args[..args.len().min(1)]),
        }
    }

    fn call_method(&self, recv: &Val, name: &str, args: &[Expr], callee: &Expr, scope: &Scope) -> Result<Val> {
        if recv.is_nullish() {
            return Err(EvalError::Type(format!(
                "Cannot read properties of {recv} (reading '{name}')"
            )));
        }
        if let Val::Array(items) = recv {
            if let Some(result) = self.array_method(items, name, args, scope)? {
                return Ok(result);
            }
        }
        let argv = self.eval_args(args, scope)?;
        let result = match recv {
            Val::Str(s) => string_method(s, name, &argv)?,
            Val::Num(n) => number_method(*n, name, &argv)?,
            _ => None,
        };
        match result {
            Some(v) => Ok(v),
            None if name == "toString" => Ok(Val::str(recv.to_string())),
            None => Err(not_a_function(callee)),
        }
    }

    /// Array methods; `None` when `name` is not one.
    fn array_method(&self, items: &Rc<Vec<Val>>, name: &str, args: &[Expr], scope: &Scope) -> Result<Option<Val>> {
        let with_callback = |f: &dyn Fn(&Callback) -> Result<Val>| -> Result<Option<Val>> {
            let cb = self.callback(args.first(), scope, name)?;
            f(&cb).map(Some)
        };
        let call = |cb: &Callback, i: usize, item: &Val| {
            self.call_callback(cb, &[item.clone(), Val::Num(i as f64), Val::Array(items.clone())], scope)
        };
        match name {
            "map" => with_callback(&|cb| {
                let out = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| call(cb, i, item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Val::array(out))
            }),
            "filter" => with_callback(&|cb| {
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if call(cb, i, item)?.truthy() {
                        out.push(item.clone());
                    }
                }
                Ok(Val::array(out))
            }),
            "find" => with_callback(&|cb| {
                for (i, item) in items.iter().enumerate() {
                    if call(cb, i, item)?.truthy() {
                        return Ok(item.clone());
                    }
                }
                Ok(Val::Undefined)
            }),
            "findIndex" => with_callback(&|cb| {
                for (i, item) in items.iter().enumerate() {
                    if call(cb, i, item)?.truthy() {
                        return Ok(Val::Num(i as f64));
                    }
                }
                Ok(Val::Num(-1.0))
            }),
            "some" => with_callback(&|cb| {
                for (i, item) in items.iter().enumerate() {
                    if call(cb, i, item)?.truthy() {
                        return Ok(Val::Bool(true));
                    }
                }
                Ok(Val::Bool(false))
            }),
            "every" => with_callback(&|cb| {
                for (i, item) in items.iter().enumerate() {
                    if !call(cb, i, item)?.truthy() {
                        return Ok(Val::Bool(false));
                    }
                }
                Ok(Val::Bool(true))
            }),
            _ => {
                let argv = self.eval_args(args, scope)?;
                plain_array_method(items, name, &argv)
            }
        }
    }
}

fn plain_array_method(items: &Rc<Vec<Val>>, name: &str, argv: &[Val]) -> Result<Option<Val>> {
    let arg = |i: usize| argv.get(i).cloned().unwrap_or(Val::Undefined);
    Ok(Some(match name {
        "join" => {
            let sep = match arg(0) {
                Val::Undefined => ",".to_string(),
                v => stringify(&v)?,
            };
            let mut out = CappedString::default();
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(&sep).map_err(|_| string_too_long())?;
                }
                if !v.is_nullish() {
                    write!(out, "{v}").map_err(|_| string_too_long())?;
                }
            }
            Val::str(out.0)
        }
        "includes" => {
            let needle = arg(0);
            Val::Bool(items.iter().any(|v| same_value_zero(v, &needle)))
        }
        "indexOf" => {
            let needle = arg(0);
            let pos = items.iter().position(|v| v.strict_eq(&needle));
            Val::Num(pos.map(|p| p as f64).unwrap_or(-1.0))
        }
        "slice" => {
            let (start, end) = slice_bounds(items.len(), &arg(0), &arg(1));
            Val::array(items[start..end].to_vec())
        }
        "concat" => {
            let mut out = items.as_ref().clone();
            for a in argv {
                match a {
                    Val::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Val::array(out)
        }
        "reverse" => Val::array(items.iter().rev().cloned().collect()),
        "at" => {
            let len = items.len() as i64;
            let mut i = arg(0).to_number().trunc() as i64;
            if i < 0 {
                i += len;
            }
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Val::Undefined)
        }
        _ => return Ok(None),
    }))
}

fn string_method(s: &str, name: &str, argv: &[Val]) -> Result<Option<Val>> {
    let arg = |i: usize| argv.get(i).cloned().unwrap_or(Val::Undefined);
    let arg_str = |i: usize| arg(i).to_string();
    let chars = || s.chars().collect::<Vec<_>>();
    Ok(Some(match name {
        "toUpperCase" => Val::str(capped(s.to_uppercase())?),
        "toLowerCase" => Val::str(capped(s.to_lowercase())?),
        "trim" => Val::str(s.trim()),
        "trimStart" => Val::str(s.trim_start()),
        "trimEnd" => Val::str(s.trim_end()),
        "includes" => Val::Bool(s.contains(&arg_str(0))),
        "startsWith" => Val::Bool(s.starts_with(&arg_str(0))),
        "endsWith" => Val::Bool(s.ends_with(&arg_str(0))),
        "indexOf" => {
            let needle = arg_str(0);
            Val::Num(
                s.find(&needle)
                    .map(|b| s[..b].chars().count() as f64)
                    .unwrap_or(-1.0),
            )
        }
        "charAt" => {
            let i = arg(0).to_number();
            let i = if i.is_nan() { 0.0 } else { i.trunc() };
            let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
            Val::str(c.map(String::from).unwrap_or_default())
        }
        "slice" | "substring" => {
            let chars = chars();
            let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
            Val::str(chars[start..end].iter().collect::<String>())
        }
        "split" => {
            let parts: Vec<Val> = match arg(0) {
                Val::Undefined => vec![Val::str(s)],
                sep => {
                    let sep = sep.to_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Val::str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Val::str).collect()
                    }
                }
            };
            match arg(1) {
                Val::Undefined => Val::array(parts),
                limit => {
                    // ToUint32: negative limits wrap around to "no limit".
                    let n = limit.to_number();
                    let limit = if n.is_finite() { n.trunc().rem_euclid(4_294_967_296.0) as usize } else { 0 };
                    Val::array(parts.into_iter().take(limit).collect())
                }
            }
        }
        "replace" => {
            let (from, to) = (arg_str(0), arg_str(1));
            if s.contains(&from) {
                check_len(s.len() - from.len() + to.len())?;
            }
            Val::str(s.replacen(&from, &to, 1))
        }
        "replaceAll" => {
            let (from, to) = (arg_str(0), arg_str(1));
            if from.is_empty() {
                return Err(EvalError::Type("replaceAll with an empty pattern is not supported".into()));
            }
            let hits = s.matches(from.as_str()).count();
            check_len((s.len() - hits * from.len()).saturating_add(hits.saturating_mul(to.len())))?;
            Val::str(s.replace(&from, &to))
        }
        "repeat" => {
            let n = arg(0).to_number();
            if n < 0.0 || n.is_infinite() {
                return Err(EvalError::Range(format!("Invalid count value: {}", format_number(n))));
            }
            let n = if n.is_nan() { 0 } else { n as usize };
            check_len(s.len().saturating_mul(n))?;
            Val::str(s.repeat(n))
        }
        "padStart" | "padEnd" => {
            let target = arg(0).to_number();
            let target = if target.is_nan() { 0 } else { target as usize };
            check_len(target)?;
            let fill = match arg(1) {
                Val::Undefined => " ".to_string(),
                v => v.to_string(),
            };
            let len = s.chars().count();
            if target <= len || fill.is_empty() {
                Val::str(s)
            } else {
                let pad: String = fill.chars().cycle().take(target - len).collect();
                let padded = if name == "padStart" {
                    format!("{pad}{s}")
                } else {
                    format!("{s}{pad}")
                };
                Val::str(capped(padded)?)
            }
        }
        "concat" => {
            let mut out = CappedString::default();
            out.write_str(s).map_err(|_| string_too_long())?;
            for v in argv {
                write!(out, "{v}").map_err(|_| string_too_long())?;
            }
            Val::str(out.0)
        }
        "at" => {
            let chars = chars();
            let mut i = arg(0).to_number().trunc() as i64;
            if i < 0 {
                i += chars.len() as i64;
            }
            usize::try_from(i)
                .ok()
                .and_then(|i| chars.get(i))
                .map(|c| Val::str(c.to_string()))
                .unwrap_or(Val::Undefined)
        }
        _ => return Ok(None),
    }))
}

fn number_method(n: f64, name: &str, argv: &[Val]) -> Result<Option<Val>> {
    Ok(Some(match name {
        "toFixed" => {
            let digits = argv.first().map(Val::to_number).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Range("toFixed() digits argument must be between 0 and 100".into()));
            }
            if !n.is_finite() {
                Val::str(format_number(n))
            } else {
                Val::str(format!("{:.*}", digits as usize, n))
            }
        }
        "toString" => Val::str(format_number(n)),
        _ => return Ok(None),
    }))
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_STRING_LEN {
        return Err(string_too_long());
    }
    Ok(())
}

fn capped(s: String) -> Result<String> {
    check_len(s.len())?;
    Ok(s)
}

fn string_too_long() -> EvalError {
    EvalError::Range("Invalid string length".into())
}

/// String buffer that refuses to grow past [`MAX_STRING_LEN`], so oversized
/// results fail before they are allocated.
#[derive(Default)]
struct CappedString(String);

impl Write for CappedString {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if self.0.len() + s.len() > MAX_STRING_LEN {
            return Err(std::fmt::Error);
        }
        self.0.push_str(s);
        Ok(())
    }
}

/// `String(v)` under the length cap.
fn stringify(v: &Val) -> Result<String> {
    let mut out = CappedString::default();
    write!(out, "{v}").map_err(|_| string_too_long())?;
    Ok(out.0)
}

/// Clamp JavaScript `slice(start, end)` arguments to `0..=len`.
fn slice_bounds(len: usize, start: &Val, end: &Val) -> (usize, usize) {
    let norm = |v: &Val, default: usize| -> usize {
        if matches!(v, Val::Undefined) {
            return default;
        }
        let n = v.to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            n.min(len as f64) as usize
        }
    };
    let start = norm(start, 0);
    let end = norm(end, len);
    (start, end.max(start))
}

fn index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn same_value_zero(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Num(x), Val::Num(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_eq(b),
    }
}

fn not_a_function(callee: &Expr) -> EvalError {
    EvalError::Type(format!("{} is not a function", callee.describe()))
}

/// Arrays stringify when coerced; do it under the length cap.
fn bounded_primitive(v: &Val) -> Result<Val> {
    match v {
        Val::Array(_) => stringify(v).map(Val::str),
        other => Ok(other.clone()),
    }
}

fn binary(op: BinaryOp, l: &Val, r: &Val) -> Result<Val> {
    use std::cmp::Ordering::*;
    let object_like = |v: &Val| matches!(v, Val::Array(_) | Val::Object(_));
    let by_identity = matches!(op, BinaryOp::StrictEq | BinaryOp::StrictNe)
        || (matches!(op, BinaryOp::Eq | BinaryOp::Ne) && object_like(l) && object_like(r));
    let (l, r) = if by_identity {
        (l.clone(), r.clone())
    } else {
        (bounded_primitive(l)?, bounded_primitive(r)?)
    };
    let (l, r) = (&l, &r);
    Ok(match op {
        BinaryOp::Add if l.is_string_like() || r.is_string_like() => {
            let mut out = CappedString::default();
            write!(out, "{l}{r}").map_err(|_| string_too_long())?;
            Val::str(out.0)
        }
        BinaryOp::Add => Val::Num(l.to_number() + r.to_number()),
        BinaryOp::Sub => Val::Num(l.to_number() - r.to_number()),
        BinaryOp::Mul => Val::Num(l.to_number() * r.to_number()),
        BinaryOp::Div => Val::Num(l.to_number() / r.to_number()),
        BinaryOp::Rem => Val::Num(l.to_number() % r.to_number()),
        BinaryOp::Lt => Val::Bool(l.compare(r) == Some(Less)),
        BinaryOp::Lte => Val::Bool(matches!(l.compare(r), Some(Less | Equal))),
        BinaryOp::Gt => Val::Bool(l.compare(r) == Some(Greater)),
        BinaryOp::Gte => Val::Bool(matches!(l.compare(r), Some(Greater | Equal))),
        BinaryOp::Eq => Val::Bool(l.loose_eq(r)),
        BinaryOp::Ne => Val::Bool(!l.loose_eq(r)),
        BinaryOp::StrictEq => Val::Bool(l.strict_eq(r)),
        BinaryOp::StrictNe => Val::Bool(!l.strict_eq(r)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextValue, TemplateContext};
    use crate::expression::{parse_expr, parse_template};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> SafeContext {
        SafeContext::build(
            &TemplateContext::from_json(value),
            &Default::default(),
            &Registry::with_builtins(),
        )
    }

    fn run(markup: &str, data: serde_json::Value) -> Result<String> {
        let template = parse_template(markup)?;
        render(&template, &ctx(data), &Registry::with_builtins())
    }

    fn ok(markup: &str, data: serde_json::Value) -> String {
        run(markup, data).unwrap()
    }

    #[test]
    fn substitutes_names_and_members() {
        let data = json!({"user": {"name": "Ada", "tags": ["a", "b"]}});
        assert_eq!(ok("<p>${user.name} ${user.tags[1]} ${user.tags.length}</p>", data), "<p>Ada b 2</p>");
    }

    #[test]
    fn undefined_name_is_a_reference_error() {
        let err = run("${missing}", json!({})).unwrap_err();
        assert_eq!(err, EvalError::Reference("missing".into()));
        assert_eq!(err.to_string(), "ReferenceError: missing is not defined");
    }

    #[test]
    fn conditional_rendering() {
        assert_eq!(ok("${show ? 'A' : 'B'}", json!({"show": true})), "A");
        assert_eq!(ok("${show ? 'A' : 'B'}", json!({"show": false})), "B");
    }

    #[test]
    fn maps_sequences_to_markup() {
        let out = ok(
            "<ul>${items.map((item, i) => `<li data-i=\"${i}\">${escape(item)}</li>`).join('')}</ul>",
            json!({"items": ["a", "<b>"]}),
        );
        assert_eq!(out, r#"<ul><li data-i="0">a</li><li data-i="1">&lt;b&gt;</li></ul>"#);
    }

    #[test]
    fn arrow_bodies_see_enclosing_names() {
        let out = ok(
            "${rows.filter(r => r.score >= min).map(r => r.name).join(', ')}",
            json!({"rows": [{"name": "a", "score": 3}, {"name": "b", "score": 9}], "min": 5}),
        );
        assert_eq!(out, "b");
    }

    #[test]
    fn native_functions_work_as_callbacks() {
        assert_eq!(ok("${xs.map(escape).join('')}", json!({"xs": ["<", ">"]})), "&lt;&gt;");
        assert_eq!(ok("${xs.filter(Boolean).length}", json!({"xs": [0, 1, "", "x"]})), "2");
    }

    #[test]
    fn stringification_follows_javascript() {
        assert_eq!(ok("${obj}|${list}|${n}|${nothing}", json!({"obj": {"a": 1}, "list": [1, 2], "n": null, "nothing": null})), "[object Object]|1,2|null|null");
        assert_eq!(ok("${1 + 2}|${'1' + 2}|${7 / 2}|${0 / 0}", json!({})), "3|12|3.5|NaN");
        assert_eq!(ok("${undefined}", json!({})), "undefined");
    }

    #[test]
    fn optional_chaining_short_circuits_the_chain() {
        assert_eq!(ok("${user?.profile.name ?? 'anon'}", json!({"user": null})), "anon");
        let err = run("${user.profile.name}", json!({"user": {}})).unwrap_err();
        assert_eq!(
            err,
            EvalError::Type("Cannot read properties of undefined (reading 'name')".into())
        );
    }

    #[test]
    fn namespaces_and_json() {
        assert_eq!(ok("${Math.max(1, n)}|${Math.floor(Math.PI)}", json!({"n": 4})), "4|3");
        assert_eq!(ok("${JSON.stringify(data)}", json!({"data": {"b": [1, true]}})), r#"{"b":[1,true]}"#);
        assert_eq!(ok("${JSON.parse('[1,2]').length}", json!({})), "2");
        assert_eq!(ok("${Object.keys(o).join()}", json!({"o": {"x": 1, "y": 2}})), "x,y");
    }

    #[test]
    fn string_and_number_methods() {
        let out = ok(
            "${s.trim().toUpperCase()}|${s.includes('b')}|${s.split(',').length}|${n.toFixed(2)}|${'ab'.padStart(4, '-')}",
            json!({"s": " a,b ", "n": 3.14159}),
        );
        assert_eq!(out, "A,B|true|2|3.14|--ab");
    }

    #[test]
    fn negative_positions_follow_javascript() {
        let out = ok(
            "${s.split(',', -1).length}|${s.split(',', 1)}|[${s.charAt(-1)}]|${s.charAt(2)}|[${s.charAt(9)}]",
            json!({"s": "a,b,c"}),
        );
        assert_eq!(out, "3|a|[]|b|[]");
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let err = run("${user.name()}", json!({"user": {"name": "x"}})).unwrap_err();
        assert_eq!(err, EvalError::Type("user.name is not a function".into()));
        let err = run("${title()}", json!({"title": "x"})).unwrap_err();
        assert_eq!(err, EvalError::Type("title is not a function".into()));
    }

    #[test]
    fn repeat_is_bounded() {
        let err = run("${'x'.repeat(1e12)}", json!({})).unwrap_err();
        assert!(matches!(err, EvalError::Range(_)));
    }

    #[test]
    fn every_string_builder_is_bounded() {
        let half = "'x'.repeat(9000000)";
        let cases = [
            format!("${{{half}.replaceAll('x', 'yy')}}"),
            "${'x'.repeat(16777216).replace('x', 'yy')}".to_string(),
            format!("${{[{half}, {half}].join('')}}"),
            format!("${{{half}.concat({half})}}"),
            format!("${{{half} + {half}}}"),
            format!("${{`${{{half}}}${{{half}}}`}}"),
            format!("${{[{half}, {half}] == 'x'}}"),
            format!("${{{half}}}${{{half}}}"),
        ];
        for markup in &cases {
            let err = run(markup, json!({})).unwrap_err();
            assert_eq!(err, EvalError::Range("Invalid string length".into()), "{markup}");
        }
        assert_eq!(ok("${'ab'.replaceAll('a', 'xy')}|${['a', 'b'].join('-')}|${'a' + 1}", json!({})), "xyb|a-b|a1");
    }

    #[test]
    fn evaluation_depth_is_bounded() {
        let mut expr = Expr::Bool(true);
        for _ in 0..(MAX_EVAL_DEPTH * 4) {
            expr = Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(expr),
            };
        }
        let err = evaluate(&expr, &ctx(json!({})), &Registry::with_builtins()).unwrap_err();
        assert_eq!(err, EvalError::Range("Maximum call stack size exceeded".into()));
    }

    #[test]
    fn typeof_tolerates_undeclared_names() {
        assert_eq!(ok("${typeof nope}|${typeof 1}|${typeof escape}", json!({})), "undefined|number|function");
    }

    #[test]
    fn no_ambient_names_are_reachable() {
        for name in ["process", "require", "globalThis", "window", "fetch"] {
            let err = run(&format!("${{{name}}}"), json!({})).unwrap_err();
            assert_eq!(err, EvalError::Reference(name.to_string()));
        }
    }

    #[test]
    fn evaluate_returns_values() {
        let safe = SafeContext::build(
            &TemplateContext::new().with("n", ContextValue::from(2i64)),
            &Default::default(),
            &Registry::with_builtins(),
        );
        let v = evaluate(&parse_expr("[n, n * 2]").unwrap(), &safe, &Registry::with_builtins()).unwrap();
        assert_eq!(v.to_json(), Some(json!([2, 4])));
    }
}
