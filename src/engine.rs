use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStats, TemplateCache};
use crate::config::EngineConfig;
use crate::context::{SafeContext, TemplateContext};
use crate::diagnostics::render_diagnostic;
use crate::elements::{discover_custom_elements, CustomElement, FragmentSlots};
use crate::errors::{EvalError, TemplateError, TemplateResult};
use crate::expression::parse_template;
use crate::functions::Registry;
use crate::interpreter;

/// One template on the current resolution path.
#[derive(Debug, Clone)]
struct Frame {
    identity: String,
    path: PathBuf,
}

/// Loads templates from a fixed root, resolves custom elements, evaluates
/// `${...}` expressions and caches the result in production mode.
///
/// Construct one per process and share it by reference; every evaluation is
/// independent and the cache is the only shared state.
pub struct TemplateEngine {
    config: EngineConfig,
    registry: Registry,
    cache: TemplateCache,
}

impl TemplateEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Registry::with_builtins(),
            cache: TemplateCache::new(),
        }
    }

    /// Replace the builtin function registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate the template at `identity` (relative to the template root).
    pub async fn load_template(&self, identity: &str, ctx: &TemplateContext) -> TemplateResult<String> {
        self.load(identity, ctx, Vec::new()).await
    }

    /// Run in-memory markup through custom-element resolution and
    /// evaluation. `identity` only labels diagnostics. Never cached.
    pub async fn render_str(&self, identity: &str, markup: &str, ctx: &TemplateContext) -> TemplateResult<String> {
        self.process(identity, markup, ctx, &[]).await
    }

    pub fn clear_template_cache(&self) {
        self.cache.clear();
        debug!("template cache cleared");
    }

    pub fn template_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn load<'a>(
        &'a self,
        identity: &'a str,
        ctx: &'a TemplateContext,
        mut chain: Vec<Frame>,
    ) -> BoxFuture<'a, TemplateResult<String>> {
        async move {
            let path = self.resolve_path(identity).await?;
            self.guard(identity, &path, &chain)?;

            let cache_key = (self.config.mode.caches() && ctx.is_cacheable())
                .then(|| CacheKey::new(&path, ctx));
            if let Some(hit) = cache_key.as_ref().and_then(|key| self.cache.get(key)) {
                debug!(identity, "template cache hit");
                return Ok(hit);
            }

            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| TemplateError::Io {
                    path: path.clone(),
                    source,
                })?;
            chain.push(Frame {
                identity: identity.to_string(),
                path,
            });
            let markup = self.process(identity, &raw, ctx, &chain).await?;

            if let Some(key) = cache_key {
                self.cache.insert(key, markup.clone());
            }
            Ok(markup)
        }
        .boxed()
    }

    /// Expand `raw`, applying the mode's failure policy.
    async fn process(
        &self,
        identity: &str,
        raw: &str,
        ctx: &TemplateContext,
        chain: &[Frame],
    ) -> TemplateResult<String> {
        match self.expand(identity, raw, ctx, chain).await {
            Ok(markup) => Ok(markup),
            Err(err) if self.config.mode.renders_diagnostics() => {
                warn!(identity, error = %err, "rendering template diagnostic");
                let message = match &err {
                    TemplateError::Evaluation { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                Ok(render_diagnostic(identity, &message, raw))
            }
            Err(err) => Err(err),
        }
    }

    async fn expand(
        &self,
        identity: &str,
        raw: &str,
        ctx: &TemplateContext,
        chain: &[Frame],
    ) -> TemplateResult<String> {
        let (host, slots) = self.resolve_custom_elements(raw, ctx, chain).await?;
        let evaluation_error = |source: EvalError| TemplateError::Evaluation {
            identity: identity.to_string(),
            source,
            template: raw.to_string(),
        };
        let template = parse_template(&host).map_err(evaluation_error)?;
        let safe = SafeContext::build(ctx, &self.config.env, &self.registry);
        let output = interpreter::render(&template, &safe, &self.registry).map_err(evaluation_error)?;
        Ok(slots.splice(output))
    }

    /// Load the fragment for every custom element in `raw` and swap the
    /// elements for slots. Elements without a fragment stay untouched.
    async fn resolve_custom_elements(
        &self,
        raw: &str,
        ctx: &TemplateContext,
        chain: &[Frame],
    ) -> TemplateResult<(String, FragmentSlots)> {
        let elements = discover_custom_elements(raw);
        let mut slots = FragmentSlots::new();
        if elements.is_empty() {
            return Ok((raw.to_string(), slots));
        }

        let loaded: Vec<(CustomElement, Option<String>)> = stream::iter(elements)
            .map(move |el| async move {
                let markup = self.load_fragment(&el, ctx, chain).await?;
                Ok::<_, TemplateError>((el, markup))
            })
            .buffered(self.config.fragment_concurrency.max(1))
            .try_collect()
            .await?;

        let mut host = raw.to_string();
        for (el, markup) in loaded {
            if let Some(markup) = markup {
                host = slots.substitute(&host, &el.tag_name, markup);
            }
        }
        Ok((host, slots))
    }

    async fn load_fragment(
        &self,
        el: &CustomElement,
        ctx: &TemplateContext,
        chain: &[Frame],
    ) -> TemplateResult<Option<String>> {
        let identity = el.fragment_identity();
        if self.fragment_path(&el.tag_name, &identity).await?.is_none() {
            info!(tag = %el.tag_name, "no fragment for custom element, leaving it in place");
            return Ok(None);
        }
        self.load(&identity, ctx, chain.to_vec()).await.map(Some)
    }

    /// Fragment file for `tag`, memoized per tag in production mode.
    async fn fragment_path(&self, tag: &str, identity: &str) -> TemplateResult<Option<PathBuf>> {
        let caches = self.config.mode.caches();
        if caches {
            if let Some(known) = self.cache.fragment_path(tag) {
                return Ok(known);
            }
        }
        let path = match self.resolve_path(identity).await {
            Ok(path) => Some(path),
            Err(TemplateError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        if caches {
            self.cache.insert_fragment_path(tag, path.clone());
        }
        Ok(path)
    }

    /// Map `identity` to a file under the template root. Rejects absolute
    /// paths, `..` segments and anything whose canonical form (symlinks
    /// followed) leaves the root.
    async fn resolve_path(&self, identity: &str) -> TemplateResult<PathBuf> {
        let relative = Path::new(identity);
        let lexically_contained = !identity.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !lexically_contained {
            return Err(TemplateError::PathEscape {
                identity: identity.to_string(),
            });
        }

        let root = tokio::fs::canonicalize(&self.config.root)
            .await
            .map_err(|source| TemplateError::Io {
                path: self.config.root.clone(),
                source,
            })?;
        let candidate = root.join(relative);
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::NotFound {
                    identity: identity.to_string(),
                });
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    path: candidate,
                    source,
                });
            }
        };
        if !resolved.starts_with(&root) {
            return Err(TemplateError::PathEscape {
                identity: identity.to_string(),
            });
        }
        let is_file = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(TemplateError::NotFound {
                identity: identity.to_string(),
            });
        }
        Ok(resolved)
    }

    fn guard(&self, identity: &str, path: &Path, chain: &[Frame]) -> TemplateResult<()> {
        if let Some(start) = chain.iter().position(|f| f.path == path) {
            let mut names: Vec<String> = chain[start..].iter().map(|f| f.identity.clone()).collect();
            names.push(identity.to_string());
            return Err(TemplateError::CycleDetected { chain: names });
        }
        if chain.len() > self.config.max_depth {
            return Err(TemplateError::DepthExceeded {
                identity: identity.to_string(),
                max_depth: self.config.max_depth,
            });
        }
        Ok(())
    }
}
