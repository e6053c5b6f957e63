use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;

use crate::context::TemplateContext;

/// Cache key: resolved template path plus the *set* of caller context keys.
/// Values are deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    shape: Vec<String>,
}

impl CacheKey {
    pub fn new(path: &Path, ctx: &TemplateContext) -> Self {
        // TemplateContext iterates keys in sorted order.
        Self {
            path: path.to_path_buf(),
            shape: ctx.keys().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub templates: usize,
    #[serde(rename = "customElements")]
    pub custom_elements: usize,
}

/// Evaluated-output cache owned by one engine.
///
/// Writes are idempotent: two evaluations racing on the same key store equal
/// markup, so population needs no coordination beyond the map lock.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: RwLock<HashMap<CacheKey, String>>,
    /// Tag name -> fragment path, or `None` when no fragment file exists.
    custom_elements: RwLock<HashMap<String, Option<PathBuf>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.templates.read().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, markup: String) {
        self.templates.write().insert(key, markup);
    }

    pub fn fragment_path(&self, tag: &str) -> Option<Option<PathBuf>> {
        self.custom_elements.read().get(tag).cloned()
    }

    pub fn insert_fragment_path(&self, tag: &str, path: Option<PathBuf>) {
        self.custom_elements.write().insert(tag.to_string(), path);
    }

    pub fn clear(&self) {
        self.templates.write().clear();
        self.custom_elements.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            templates: self.templates.read().len(),
            custom_elements: self.custom_elements.read().len(),
        }
    }
}
