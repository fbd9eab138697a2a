//! A key/value bag for handlers of the same request to talk to each other.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

/// Request scoped properties.
///
/// Values are stored behind an `Arc`, so cloning the bag (for example to hand it to an operation
/// running on another task) is cheap and does not copy the values themselves.
#[derive(Clone, Default)]
pub struct Properties {
    inner: HashMap<Cow<'static, str>, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self { inner: HashMap::new() }
    }

    /// Inserts a value, returns true if a previous value under the same key was replaced.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> bool
    where
        K: Into<Cow<'static, str>>,
        V: Any + Send + Sync,
    {
        self.inner.insert(key.into(), Arc::new(value)).is_some()
    }

    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.inner.get(key).and_then(|value| value.downcast_ref::<V>())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(AsRef::as_ref)
    }
}

impl Debug for Properties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}
