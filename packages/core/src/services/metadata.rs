//! Metadata Descriptor Service
//!
//! Type descriptors live in an external metadata authority; this service
//! caches them in the store's metadata table and hands the mutator a valid
//! descriptor when one is available. A cached row is used while
//! `!stale && now < synced_at + ttl_minutes`, otherwise the authority is
//! asked again. Every use bumps the row's usage accounting.
//!
//! Descriptor availability is best-effort by design: when the authority is
//! down and the cache row is unusable, create-time enrichment is skipped
//! rather than failing the mutation.

use crate::db::ObjectStore;
use crate::models::MetadataEntry;
use crate::services::error::KernelError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata authority unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown type code: {0}")]
    UnknownType(String),
}

/// External source of type descriptors
#[async_trait]
pub trait MetadataAuthority: Send + Sync {
    async fn fetch_descriptor(&self, type_code: &str) -> Result<Value, MetadataError>;
}

/// Fixed in-memory authority for tests and local runs
pub struct StaticAuthority {
    descriptors: HashMap<String, Value>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    pub fn with(mut self, type_code: impl Into<String>, descriptor: Value) -> Self {
        self.descriptors.insert(type_code.into(), descriptor);
        self
    }
}

impl Default for StaticAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataAuthority for StaticAuthority {
    async fn fetch_descriptor(&self, type_code: &str) -> Result<Value, MetadataError> {
        self.descriptors
            .get(type_code)
            .cloned()
            .ok_or_else(|| MetadataError::UnknownType(type_code.to_string()))
    }
}

/// Store-backed descriptor cache over a [`MetadataAuthority`]
pub struct MetadataService {
    store: Arc<dyn ObjectStore>,
    authority: Arc<dyn MetadataAuthority>,
    ttl_minutes: i64,
}

impl MetadataService {
    pub fn new(store: Arc<dyn ObjectStore>, authority: Arc<dyn MetadataAuthority>) -> Self {
        Self {
            store,
            authority,
            ttl_minutes: crate::models::DEFAULT_TTL_MINUTES,
        }
    }

    pub fn with_ttl_minutes(mut self, ttl_minutes: i64) -> Self {
        self.ttl_minutes = ttl_minutes;
        self
    }

    /// Usable descriptor for a type, or `None` when neither the cache row
    /// nor the authority can provide one. Never fails the caller.
    pub async fn descriptor_for(&self, type_code: &str) -> Option<MetadataEntry> {
        let now = Utc::now();

        let cached = match self.store.get_metadata(type_code).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(type_code, error = %e, "Metadata cache read failed");
                None
            }
        };

        if let Some(entry) = cached {
            if entry.is_valid_for_use(now) {
                self.touch(type_code).await;
                return Some(entry);
            }
        }

        match self.sync(type_code).await {
            Ok(entry) => {
                self.touch(type_code).await;
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(type_code, error = %e, "Descriptor sync failed, skipping enrichment");
                None
            }
        }
    }

    /// Force a re-sync from the authority
    pub async fn refresh(&self, type_code: &str) -> Result<MetadataEntry, KernelError> {
        self.sync(type_code)
            .await
            .map_err(|e| KernelError::StoreUnavailable(e.to_string()))
    }

    /// Flag the cached row so the next read re-syncs
    pub async fn mark_stale(&self, type_code: &str) -> Result<(), KernelError> {
        self.store.mark_metadata_stale(type_code).await?;
        Ok(())
    }

    async fn sync(&self, type_code: &str) -> Result<MetadataEntry, MetadataError> {
        let descriptor = self.authority.fetch_descriptor(type_code).await?;
        let mut entry = MetadataEntry::synced(type_code, descriptor);
        entry.ttl_minutes = self.ttl_minutes;

        if let Err(e) = self.store.upsert_metadata(entry.clone()).await {
            // The fetched descriptor is still usable this once
            tracing::warn!(type_code, error = %e, "Metadata cache write failed");
        }
        Ok(entry)
    }

    async fn touch(&self, type_code: &str) {
        if let Err(e) = self.store.touch_metadata(type_code, Utc::now()).await {
            tracing::warn!(type_code, error = %e, "Metadata usage accounting failed");
        }
    }
}
