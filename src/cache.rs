//! Read-through cache for materialized query results.
//!
//! Keyed by query name and injected explicitly, so there is no hidden
//! process-wide state. A key is fetched once and never re-queried;
//! invalidation is a deliberate external call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::Result;

/// A read-through cache over fallible producers.
///
/// No eviction: query names are few and a cached record set must not
/// silently vanish mid-run.
#[derive(Debug, Default)]
pub struct QueryCache<V> {
    entries: HashMap<String, V>,
}

impl<V> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Return the cached value for `key`, or run `producer`, store its
    /// result and return it. A producer error caches nothing.
    pub fn get_or_fetch<F>(&mut self, key: &str, producer: F) -> Result<&V>
    where
        F: FnOnce() -> Result<V>,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(producer()?)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop one cached query result.
    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
