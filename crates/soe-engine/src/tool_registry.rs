//! Runtime tool registry — the single source of truth for registered tools.
//!
//! Cheaply cloneable (inner state is `Arc`-wrapped): multiple clones share
//! the same underlying registry, so a tool registered through one handle is
//! immediately visible through all others. Built-in `soe_*` tools are not
//! stored here; the engine resolves them before consulting the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::ToolSpec;

/// Thread-safe registry of tool specs with runtime mutability.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<BTreeMap<String, ToolSpec>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&self, name: impl Into<String>, spec: ToolSpec) {
        self.inner.write().insert(name.into(), spec);
    }

    /// Remove a tool by name. Returns `true` if the tool existed.
    pub fn remove(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    /// Look up a single tool by name.
    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.inner.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Snapshot of all entries, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, ToolSpec)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}
