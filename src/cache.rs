//! Pluggable persistence for a single [CacheRecord](crate::token::CacheRecord).
//!
//! Every backend implements [CacheHandler]. Backends report failures as [CacheError]; the
//! [TokenAuthority](crate::auth::TokenAuthority) logs them and treats a failed read as a cache miss and a failed write
//! as a token that simply isn't persisted, so a broken cache looks the same as never having authenticated.

pub mod file;
pub mod key_value;
pub mod memory;
pub mod session;

pub use self::{
    file::FileCache,
    key_value::{KeyValueCache, KeyValueStore},
    memory::MemoryCache,
    session::{SessionCache, SessionStore},
};

use thiserror::Error;

use crate::token::CacheRecord;

/// The key web-session and key-value backends store the record under by default.
pub const DEFAULT_CACHE_KEY: &str = "token_info";

/// Storage backend contract for a single token record.
pub trait CacheHandler: Send + Sync {
    /// Reads the stored record. A missing record is `Ok(None)`.
    fn get(&self) -> Result<Option<CacheRecord>, CacheError>;

    /// Replaces the stored record.
    fn save(&self, record: &CacheRecord) -> Result<(), CacheError>;

    /// Identifies the storage location shared by every handler pointing at it, e.g. a file path. Token authorities in
    /// the same process whose caches return the same key serialize their token acquisition. `None` means the handler
    /// isn't shared with other authorities.
    fn lock_key(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Failed to (de)serialize cache record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache backend failure: {0}")]
    Backend(String),
}

impl<C> CacheHandler for Box<C>
where
    C: CacheHandler + ?Sized,
{
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        (**self).get()
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        (**self).save(record)
    }

    fn lock_key(&self) -> Option<String> {
        (**self).lock_key()
    }
}

impl<C> CacheHandler for std::sync::Arc<C>
where
    C: CacheHandler + ?Sized,
{
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        (**self).get()
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        (**self).save(record)
    }

    fn lock_key(&self) -> Option<String> {
        (**self).lock_key()
    }
}
