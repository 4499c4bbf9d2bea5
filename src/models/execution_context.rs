use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{BatchError, BatchResult};

/// Serializable key/value state persisted with a job or step execution so that a
/// restarted execution can resume where the previous one left off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> BatchResult<()> {
        let value = serde_json::to_value(value)?;
        self.put_value(key, value);
        Ok(())
    }

    pub fn put_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.entries.get(&key) != Some(&value) {
            self.dirty = true;
        }
        self.entries.insert(key, value);
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put_value(key, Value::from(value));
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put_value(key, Value::from(value.into()));
    }

    /// Typed read. A present key holding an incompatible value is an error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> BatchResult<Option<T>> {
        match self.entries.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                BatchError::Validation(format!("execution context key '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> i64 {
        self.get_long(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty_flag(&mut self) {
        self.dirty = false;
    }

    /// View that prefixes every key with `namespace.`
    pub fn namespaced<'a>(&'a mut self, namespace: &'a str) -> NamespacedContext<'a> {
        NamespacedContext {
            context: self,
            namespace,
        }
    }
}

/// Key-prefixing view over an [`ExecutionContext`], used by item streams and steps
/// that share one context.
pub struct NamespacedContext<'a> {
    context: &'a mut ExecutionContext,
    namespace: &'a str,
}

impl NamespacedContext<'_> {
    pub fn key(&self, key: &str) -> String {
        namespaced_key(self.namespace, key)
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: T) -> BatchResult<()> {
        let key = self.key(key);
        self.context.put(key, value)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> BatchResult<Option<T>> {
        self.context.get(&self.key(key))
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.context.get_long(&self.key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.context.contains_key(&self.key(key))
    }
}

pub fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{namespace}.{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_round_trip() {
        let mut ctx = ExecutionContext::new();
        ctx.put("offset", 42_u64).unwrap();
        ctx.put_string("file", "input.csv");

        assert_eq!(ctx.get::<u64>("offset").unwrap(), Some(42));
        assert_eq!(ctx.get_string("file"), Some("input.csv"));
        assert_eq!(ctx.get::<u64>("missing").unwrap(), None);
        assert!(ctx.get::<u64>("file").is_err());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut ctx = ExecutionContext::new();
        assert!(!ctx.is_dirty());
        ctx.put_long("count", 1);
        assert!(ctx.is_dirty());
        ctx.clear_dirty_flag();
        ctx.put_long("count", 1);
        assert!(!ctx.is_dirty());
        ctx.remove("count");
        assert!(ctx.is_dirty());
    }

    #[test]
    fn test_namespaced_keys_do_not_collide() {
        let mut ctx = ExecutionContext::new();
        ctx.namespaced("stepA").put("read.count", 3).unwrap();
        ctx.namespaced("stepB").put("read.count", 7).unwrap();

        assert_eq!(ctx.get_long("stepA.read.count"), Some(3));
        assert_eq!(ctx.namespaced("stepB").get_long("read.count"), Some(7));
        assert_eq!(ctx.len(), 2);
    }
}
