//! Opaque run options and their identity-keyed serialization cache.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::codec;
use crate::error::PoolError;

/// Caller-supplied configuration for a work unit.
///
/// The contents are opaque to the pool — a schema-less JSON map passed
/// through to the worker. Each value carries a [`Uuid`] minted at
/// construction that serves as its identity for cache purposes. `Clone`
/// mints a fresh id: a clone is a distinct object and is serialized
/// independently.
#[derive(Debug)]
pub struct RunOptions {
    id: Uuid,
    values: Map<String, Value>,
}

impl RunOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::from_map(Map::new())
    }

    /// Options wrapping an existing JSON map.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            values,
        }
    }

    /// Fluent insert, for building options inline.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The identity key used by [`OptionsCache`].
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RunOptions {
    fn clone(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            values: self.values.clone(),
        }
    }
}

/// Snapshot of cache occupancy and traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Memoizes the serialized form of [`RunOptions`], keyed by identity.
///
/// Equality is by identity, not structural equality: two options values with
/// identical contents but distinct ids occupy two separate entries. This is a
/// deliberate simplicity trade-off — the cache never inspects contents. The
/// cache stores only `(id, string)` pairings, so it can never keep an options
/// value alive.
#[derive(Debug, Default)]
pub struct OptionsCache {
    entries: HashMap<Uuid, String>,
    hits: u64,
    misses: u64,
}

impl OptionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `options`, invoking the serializer at most once per identity
    /// for the lifetime of the cache. Serialization failures are not cached.
    pub fn serialize(&mut self, options: &RunOptions) -> Result<String, PoolError> {
        if let Some(serialized) = self.entries.get(&options.id()) {
            self.hits += 1;
            return Ok(serialized.clone());
        }
        let serialized = codec::serialize_options(options.values())?;
        self.misses += 1;
        self.entries.insert(options.id(), serialized.clone());
        Ok(serialized)
    }

    /// Discard all entries. Subsequent `serialize` calls behave as if called
    /// for the first time. Traffic counters are left intact.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
