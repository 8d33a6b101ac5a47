//! [CacheHandler] over an external key-value store such as Redis or Memcached.
//!
//! The cache is generic over the [KeyValueStore] contract so it doesn't tie the crate to one store's client library.
//! The record is stored as a JSON string under a configurable key.

use log::debug;

use super::{CacheError, CacheHandler, DEFAULT_CACHE_KEY};
use crate::token::CacheRecord;

/// A fallible string key-value store.
pub trait KeyValueStore: Send + Sync {
    type Error: std::error::Error;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// A name for the store instance, e.g. its connection URL. Used to tell stores apart when serializing token
    /// acquisition in-process.
    fn name(&self) -> Option<String> {
        None
    }
}

#[derive(Debug)]
pub struct KeyValueCache<S> {
    store: S,
    key: String,
}

impl<S> KeyValueCache<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        Self::with_key(store, DEFAULT_CACHE_KEY)
    }

    pub fn with_key<K>(store: S, key: K) -> Self
    where
        K: Into<String>,
    {
        Self { store, key: key.into() }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CacheHandler for KeyValueCache<S>
where
    S: KeyValueStore,
{
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        let value = self
            .store
            .get(&self.key)
            .map_err(|err| CacheError::Backend(format!("failed to read key {}: {}", self.key, err)))?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => {
                debug!("No token in key-value store under {}", self.key);
                Ok(None)
            }
        }
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let value = serde_json::to_string(record)?;

        self.store
            .set(&self.key, &value)
            .map_err(|err| CacheError::Backend(format!("failed to write key {}: {}", self.key, err)))
    }

    fn lock_key(&self) -> Option<String> {
        self.store.name().map(|name| format!("kv:{}/{}", name, self.key))
    }
}
