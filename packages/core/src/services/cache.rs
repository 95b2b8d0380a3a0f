//! Look-aside Object Cache
//!
//! Read path checks the cache before the store; mutators write through after
//! commit. Two key schemes: `obj:{id}` holds the serialized object and
//! `code:{tenant}:{type}:{code}` holds the object id.
//!
//! # Contract
//!
//! The cache is advisory. A miss is never an error, and every cache failure
//! is logged at warn level and swallowed by the caller - the store stays the
//! source of truth. A value may be stale only between a commit and the
//! mutator's subsequent invalidate, which is why mutators invalidate *after*
//! commit, never before.
//!
//! # Cache Invalidation
//!
//! [`MemoryCache`] keeps a per-type tag index so `invalidate_by_type` drops
//! that type's entries without scanning the whole key space.

use crate::models::ObjectRecord;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default entry TTL (1 hour)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Cache key for an object row
pub fn object_key(id: Uuid) -> String {
    format!("obj:{}", id)
}

/// Cache key for the code -> id mapping
pub fn code_key(tenant_id: Uuid, type_code: &str, code: &str) -> String {
    format!("code:{}:{}:{}", tenant_id, type_code, code)
}

/// Look-aside cache seam.
///
/// Implementations must be `Send + Sync`; only mutators write.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Fetch a cached object by id
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ObjectRecord>, CacheError>;

    /// Resolve a business key to an object id
    async fn get_id_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<Option<Uuid>, CacheError>;

    /// Write both the object key and the code key
    async fn put(&self, record: &ObjectRecord) -> Result<(), CacheError>;

    /// Drop the object key and its code key
    async fn invalidate(&self, id: Uuid) -> Result<(), CacheError>;

    /// Resolve the code key to an id, then drop both keys
    async fn invalidate_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<(), CacheError>;

    /// Best-effort bulk drop of every entry of one type
    async fn invalidate_by_type(&self, type_code: &str) -> Result<(), CacheError>;
}

struct CachedObject {
    record: ObjectRecord,
    code_key: String,
    inserted: Instant,
}

struct CodeEntry {
    id: Uuid,
    inserted: Instant,
}

struct CacheState {
    objects: HashMap<String, CachedObject>,
    codes: HashMap<String, CodeEntry>,
    /// type_code -> object keys, so invalidate_by_type avoids a full scan
    type_tags: HashMap<String, HashSet<String>>,
}

/// In-process cache with TTL expiry and a type tag index
pub struct MemoryCache {
    state: Arc<RwLock<CacheState>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Cache with custom TTL (primarily for testing)
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState {
                objects: HashMap::new(),
                codes: HashMap::new(),
                type_tags: HashMap::new(),
            })),
            ttl,
        }
    }

    fn expired(&self, inserted: Instant) -> bool {
        inserted.elapsed() >= self.ttl
    }

    fn remove_object(state: &mut CacheState, object_key: &str) {
        if let Some(entry) = state.objects.remove(object_key) {
            // The code key may already point at a newer object that re-used
            // this code; only unlink it when it still refers to this row
            if state
                .codes
                .get(&entry.code_key)
                .map(|c| c.id == entry.record.id)
                .unwrap_or(false)
            {
                state.codes.remove(&entry.code_key);
            }
            if let Some(tags) = state.type_tags.get_mut(&entry.record.type_code) {
                tags.remove(object_key);
                if tags.is_empty() {
                    state.type_tags.remove(&entry.record.type_code);
                }
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectCache for MemoryCache {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ObjectRecord>, CacheError> {
        let key = object_key(id);
        {
            let state = self.state.read().await;
            match state.objects.get(&key) {
                Some(entry) if !self.expired(entry.inserted) => {
                    return Ok(Some(entry.record.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry: drop it under the write lock
        let mut state = self.state.write().await;
        Self::remove_object(&mut state, &key);
        Ok(None)
    }

    async fn get_id_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<Option<Uuid>, CacheError> {
        let key = code_key(tenant_id, type_code, code);
        let state = self.state.read().await;
        match state.codes.get(&key) {
            Some(entry) if !self.expired(entry.inserted) => Ok(Some(entry.id)),
            _ => Ok(None),
        }
    }

    async fn put(&self, record: &ObjectRecord) -> Result<(), CacheError> {
        let obj_key = object_key(record.id);
        let code_key = code_key(record.tenant_id, &record.type_code, &record.code);
        let now = Instant::now();

        let mut state = self.state.write().await;
        // Re-pointing a code key (code reuse after soft delete) must not leave
        // the old object entry reachable by type tag only
        Self::remove_object(&mut state, &obj_key);

        state.codes.insert(
            code_key.clone(),
            CodeEntry {
                id: record.id,
                inserted: now,
            },
        );
        state
            .type_tags
            .entry(record.type_code.clone())
            .or_default()
            .insert(obj_key.clone());
        state.objects.insert(
            obj_key,
            CachedObject {
                record: record.clone(),
                code_key,
                inserted: now,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, id: Uuid) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        Self::remove_object(&mut state, &object_key(id));
        Ok(())
    }

    async fn invalidate_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<(), CacheError> {
        let key = code_key(tenant_id, type_code, code);
        let mut state = self.state.write().await;
        if let Some(entry) = state.codes.remove(&key) {
            Self::remove_object(&mut state, &object_key(entry.id));
        }
        Ok(())
    }

    async fn invalidate_by_type(&self, type_code: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if let Some(keys) = state.type_tags.remove(type_code) {
            for key in keys {
                if let Some(entry) = state.objects.remove(&key) {
                    state.codes.remove(&entry.code_key);
                }
            }
        }
        Ok(())
    }
}
