use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while parsing or evaluating a single expression.
///
/// Messages follow the wording of the equivalent JavaScript errors so a
/// diagnostic reads the same as it would in a browser console.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("SyntaxError: {0}")]
    Parse(String),

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),
}

/// Failures raised by the template loader.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {identity}")]
    NotFound { identity: String },

    #[error("template path escapes the template root: {identity}")]
    PathEscape { identity: String },

    #[error("component cycle detected: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("component nesting exceeds {max_depth} levels at {identity}")]
    DepthExceeded { identity: String, max_depth: usize },

    #[error("error evaluating template {identity}: {source}")]
    Evaluation {
        identity: String,
        #[source]
        source: EvalError,
        template: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    /// Errors detected before a template is read. These always propagate out
    /// of the loader call that hit them.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TemplateError::NotFound { .. }
                | TemplateError::PathEscape { .. }
                | TemplateError::CycleDetected { .. }
                | TemplateError::DepthExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;
