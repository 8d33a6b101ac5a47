//! [CacheHandler] over a web framework's per-user session.
//!
//! Web frameworks each have their own session type, so the cache is generic over the small [SessionStore] contract.
//! Implement it for your framework's session handle (usually a thin wrapper) and create a [SessionCache] per request:
//!
//! ```
//! # use std::collections::HashMap;
//! # use parking_lot::Mutex;
//! # use spotiauth::cache::{SessionCache, SessionStore};
//! struct Session(Mutex<HashMap<String, serde_json::Value>>);
//!
//! impl SessionStore for Session {
//!     fn get(&self, key: &str) -> Option<serde_json::Value> {
//!         self.0.lock().get(key).cloned()
//!     }
//!
//!     fn insert(&self, key: &str, value: serde_json::Value) {
//!         self.0.lock().insert(key.to_owned(), value);
//!     }
//! }
//!
//! let cache = SessionCache::new(Session(Mutex::new(HashMap::new())));
//! ```

use log::debug;

use super::{CacheError, CacheHandler, DEFAULT_CACHE_KEY};
use crate::token::CacheRecord;

/// A web framework session: a string-keyed map of JSON values scoped to one user.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    fn insert(&self, key: &str, value: serde_json::Value);
}

/// Stores the record as a JSON value in a [SessionStore] under the `token_info` key.
#[derive(Debug)]
pub struct SessionCache<S> {
    session: S,
    key: String,
}

impl<S> SessionCache<S>
where
    S: SessionStore,
{
    pub fn new(session: S) -> Self {
        Self::with_key(session, DEFAULT_CACHE_KEY)
    }

    pub fn with_key<K>(session: S, key: K) -> Self
    where
        K: Into<String>,
    {
        Self {
            session,
            key: key.into(),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S> CacheHandler for SessionCache<S>
where
    S: SessionStore,
{
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        match self.session.get(&self.key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => {
                debug!("No token in session under {}", self.key);
                Ok(None)
            }
        }
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        self.session.insert(&self.key, serde_json::to_value(record)?);
        Ok(())
    }
}
