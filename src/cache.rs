//! Result cache: fingerprint-keyed, TTL-bounded replay of finished results.
//!
//! The cache is strictly advisory. Disabled mode answers every lookup with a
//! miss and swallows every store, so correctness never depends on an entry
//! being present. Entries carry their own TTL because grid and tile results
//! age differently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};

use crate::exec::QueryResult;
use crate::limits::Pagination;
use crate::params::BoundParam;

/// A finished execution as the pipeline caches it: the result plus the
/// windowed total when the request was paginated.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub result: QueryResult,
    pub total_rows: Option<i64>,
}

/// Request fingerprint: SHA-256 over the normalized statement, the bound
/// parameters in sorted name order, the caller identity, the target
/// database, and the pagination window. Fields are NUL-separated and
/// parameter values are type-tagged, so crafted values cannot collide
/// across fields.
pub fn fingerprint(
    statement: &str,
    params: &[BoundParam],
    identity: &str,
    database: &str,
    pagination: Option<&Pagination>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.as_bytes());
    hasher.update([0u8]);
    let mut sorted: Vec<&BoundParam> = params.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for param in sorted {
        hasher.update(param.name.as_bytes());
        hasher.update([b'=']);
        hasher.update(param.value.canonical().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(database.as_bytes());
    hasher.update([0u8]);
    if let Some(page) = pagination {
        hasher.update(page.page.to_le_bytes());
        hasher.update(page.page_size.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
struct CachedEntry {
    value: Arc<CachedResult>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

pub struct ResultCache {
    inner: Option<Cache<String, CachedEntry>>,
}

impl ResultCache {
    pub fn new(enabled: bool, capacity: u64) -> Self {
        let inner = enabled.then(|| {
            Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build()
        });
        ResultCache { inner }
    }

    pub fn disabled() -> Self {
        ResultCache { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResult>> {
        self.inner.as_ref()?.get(key).map(|entry| entry.value)
    }

    /// Store a finished result. Later writes for the same key supersede
    /// earlier ones.
    pub fn put(&self, key: String, value: Arc<CachedResult>, ttl: Duration) {
        if let Some(cache) = &self.inner {
            cache.insert(key, CachedEntry { value, ttl });
        }
    }

    pub fn flush_all(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }

    pub fn entry_count(&self) -> u64 {
        match &self.inner {
            Some(cache) => {
                cache.run_pending_tasks();
                cache.entry_count()
            }
            None => 0,
        }
    }
}
