//! Registry and evaluation context
//!
//! A [`Registry`] is the set of named values supplied at setup time. On
//! `initialize` it is turned into an [`EvaluationContext`], which query
//! expressions read on every poll. Context variables may be changed while
//! the source is running; registry entries may not.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Named values available to query expressions
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Value>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named value
    pub fn register(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a named value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(name.into(), value.into())
    }

    /// Look up a named value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Registry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// State query expressions are evaluated against.
///
/// Lookups check the mutable variables first and fall back to the registry.
#[derive(Debug, Default)]
pub struct EvaluationContext {
    registry: Registry,
    variables: RwLock<HashMap<String, Value>>,
}

impl EvaluationContext {
    /// Build a context from a registry snapshot
    pub fn from_registry(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            variables: RwLock::new(HashMap::new()),
        }
    }

    /// The registry this context was built from
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Set a variable, returning the previous value
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.variables.write().insert(name.into(), value.into())
    }

    /// Remove a variable
    pub fn remove_variable(&self, name: &str) -> Option<Value> {
        self.variables.write().remove(name)
    }

    /// Current value of a variable, ignoring the registry
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    /// Resolve a name against variables, then registry entries
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.variable(name)
            .or_else(|| self.registry.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_prefers_variables() {
        let registry = Registry::new()
            .register("table", "person")
            .register("limit", 10);
        let ctx = EvaluationContext::from_registry(&registry);

        assert_eq!(ctx.lookup("table"), Some(json!("person")));
        ctx.set_variable("table", "archive");
        assert_eq!(ctx.lookup("table"), Some(json!("archive")));
        assert_eq!(ctx.registry().get("table"), Some(&json!("person")));

        ctx.remove_variable("table");
        assert_eq!(ctx.lookup("table"), Some(json!("person")));
        assert_eq!(ctx.lookup("missing"), None);
    }

    #[test]
    fn test_registry_from_iter() {
        let registry: Registry = [("a", json!(1)), ("b", json!("x"))].into_iter().collect();
        assert_eq!(registry.len(), 2);
        let mut names: Vec<_> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
    }
}
