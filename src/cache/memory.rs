//! In-process [CacheHandler].

use std::sync::Arc;

use parking_lot::RwLock;

use super::{CacheError, CacheHandler};
use crate::token::CacheRecord;

/// Keeps the record in memory. Clones share the same slot, so one cache can back several clients.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache(Arc<RwLock<Option<CacheRecord>>>);

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache pre-seeded with a record.
    pub fn with_record(record: CacheRecord) -> Self {
        Self(Arc::new(RwLock::new(Some(record))))
    }

    pub fn clear(&self) {
        self.0.write().take();
    }
}

impl CacheHandler for MemoryCache {
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        Ok(self.0.read().clone())
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        *self.0.write() = Some(record.clone());
        Ok(())
    }

    fn lock_key(&self) -> Option<String> {
        Some(format!("memory:{:p}", Arc::as_ptr(&self.0)))
    }
}
