use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable selecting the evaluation mode.
pub const MODE_ENV_VAR: &str = "FRAGMENT_ENV";

/// Directory under the template root holding custom-element fragments.
pub const COMPONENTS_DIR: &str = "components";

pub const DEFAULT_MAX_DEPTH: usize = 20;

pub const DEFAULT_FRAGMENT_CONCURRENCY: usize = 4;

/// Process-wide evaluation mode.
///
/// Development renders failures inline and never caches. Production caches
/// evaluated output and propagates failures. Any other mode propagates
/// failures without caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
    Test,
}

impl Mode {
    pub fn from_env() -> Self {
        std::env::var(MODE_ENV_VAR)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    pub fn renders_diagnostics(self) -> bool {
        self == Mode::Development
    }

    pub fn caches(self) -> bool {
        self == Mode::Production
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            "test" | "testing" => Ok(Mode::Test),
            other => Err(format!("unknown mode `{other}`")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::Test => "test",
        })
    }
}

/// Settings for one [`TemplateEngine`](crate::TemplateEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory every template identity resolves against.
    pub root: PathBuf,
    pub mode: Mode,
    /// Maximum custom-element nesting below the requested template.
    pub max_depth: usize,
    /// Fragment loads in flight at once for one template.
    pub fragment_concurrency: usize,
    /// Snapshot exposed to expressions as `env`.
    pub env: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Defaults with an empty environment snapshot, in development mode.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: Mode::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            fragment_concurrency: DEFAULT_FRAGMENT_CONCURRENCY,
            env: BTreeMap::new(),
        }
    }

    /// Mode from [`MODE_ENV_VAR`] and a snapshot of the process environment.
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::from_env(),
            env: std::env::vars().collect(),
            ..Self::new(root)
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_fragment_concurrency(mut self, n: usize) -> Self {
        self.fragment_concurrency = n.max(1);
        self
    }

    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_mode_aliases() {
        assert_eq!("prod".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!(" Development ".parse::<Mode>().unwrap(), Mode::Development);
        assert_eq!("testing".parse::<Mode>().unwrap(), Mode::Test);
        assert!("staging".parse::<Mode>().is_err());
    }

    #[test]
    fn only_production_caches() {
        assert!(Mode::Production.caches());
        assert!(!Mode::Development.caches());
        assert!(!Mode::Test.caches());
        assert!(Mode::Development.renders_diagnostics());
        assert!(!Mode::Test.renders_diagnostics());
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let cfg = EngineConfig::new("/tmp").with_fragment_concurrency(0);
        assert_eq!(cfg.fragment_concurrency, 1);
    }
}
