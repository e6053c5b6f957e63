pub mod cache;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod elements;
pub mod engine;
pub mod errors;
pub mod expression;
pub mod functions;
pub mod interpreter;
mod parser;
pub mod value;

use std::collections::BTreeMap;

use serde_json::Value;

pub use cache::CacheStats;
pub use config::{EngineConfig, Mode};
pub use context::{ContextValue, SafeContext, TemplateContext};
pub use elements::{discover_custom_elements, CustomElement};
pub use engine::TemplateEngine;
pub use errors::{EvalError, Result, TemplateError, TemplateResult};
pub use functions::{Function, NativeFunction, Registry};
pub use value::Val;

/// Evaluates single expressions or in-memory markup against a caller
/// context, without touching the filesystem or resolving custom elements.
pub struct Evaluator {
    registry: Registry,
    env: BTreeMap<String, String>,
}

impl Evaluator {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            env: BTreeMap::new(),
        }
    }

    /// Snapshot exposed to expressions as `env`.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Evaluate one expression (the text between `${` and `}`). `undefined`
    /// and functions come back as `null`.
    pub fn eval(&self, expr: &str, ctx: &TemplateContext) -> Result<Value> {
        let ast = expression::parse_expr(expr)?;
        let safe = SafeContext::build(ctx, &self.env, &self.registry);
        let value = interpreter::evaluate(&ast, &safe, &self.registry)?;
        Ok(value.to_json().unwrap_or(Value::Null))
    }

    /// Interpolate every `${...}` in `markup`.
    pub fn render(&self, markup: &str, ctx: &TemplateContext) -> Result<String> {
        let template = expression::parse_template(markup)?;
        let safe = SafeContext::build(ctx, &self.env, &self.registry);
        interpreter::render(&template, &safe, &self.registry)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Registry::with_builtins())
    }
}

/// Convenience: evaluate with the builtin registry.
pub fn eval(expr: &str, ctx: &TemplateContext) -> Result<Value> {
    Evaluator::default().eval(expr, ctx)
}

/// Convenience: interpolate markup with the builtin registry.
pub fn render(markup: &str, ctx: &TemplateContext) -> Result<String> {
    Evaluator::default().render(markup, ctx)
}
