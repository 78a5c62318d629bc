use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{MapperError, Result, Value};

/// `<cache>` declaration of one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub namespace: String,
    /// Implementation name; `None` selects the built-in perpetual cache.
    pub implementation: Option<String>,
    pub eviction: String,
    pub flush_interval: Option<u64>,
    pub size: Option<usize>,
    pub read_write: bool,
    pub blocking: bool,
    pub properties: Vec<(String, String)>,
}

impl CacheConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            implementation: None,
            eviction: "LRU".to_string(),
            flush_interval: None,
            size: None,
            read_write: true,
            blocking: false,
            properties: Vec::new(),
        }
    }
}

/// Key of one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(":");
        Self(joined)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Second-level cache storage shared by the statements of a namespace.
pub trait Cache: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn put(&self, key: CacheKey, rows: Vec<Value>);
    fn get(&self, key: &CacheKey) -> Option<Vec<Value>>;
    fn remove(&self, key: &CacheKey) -> Option<Vec<Value>>;
    fn clear(&self);
    fn size(&self) -> usize;
}

/// Creates cache instances from their declarations.
pub trait CacheFactory: Send + Sync {
    fn create(&self, config: &CacheConfig) -> Result<Arc<dyn Cache>>;
}

/// Unbounded map cache. Eviction settings are accepted but not applied.
#[derive(Debug)]
pub struct PerpetualCache {
    id: String,
    entries: RwLock<HashMap<CacheKey, Vec<Value>>>,
}

impl PerpetualCache {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Cache for PerpetualCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn put(&self, key: CacheKey, rows: Vec<Value>) {
        self.entries.write().insert(key, rows);
    }

    fn get(&self, key: &CacheKey) -> Option<Vec<Value>> {
        self.entries.read().get(key).cloned()
    }

    fn remove(&self, key: &CacheKey) -> Option<Vec<Value>> {
        self.entries.write().remove(key)
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn size(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCacheFactory;

impl CacheFactory for DefaultCacheFactory {
    fn create(&self, config: &CacheConfig) -> Result<Arc<dyn Cache>> {
        match config.implementation.as_deref() {
            None | Some("PERPETUAL" | "perpetual") => Ok(Arc::new(PerpetualCache::new(&config.namespace))),
            Some(other) => Err(MapperError::InvalidAttribute {
                attribute: "type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}
