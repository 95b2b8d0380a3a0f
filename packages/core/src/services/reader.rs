//! Object Reader - the cache-first read path
//!
//! Point lookups (`get`, `get_by_code`) consult the cache before the store
//! and repopulate it on a miss. Listings, searches, and counts go straight
//! to the store - pagination defeats per-row caching. Version history reads
//! verify tenant ownership of the object first, then serve from the history
//! table (which retains rows for soft-deleted objects).
//!
//! Cache failures anywhere in this module are logged at warn and treated as
//! misses; readers never surface a cache error.

use crate::db::ObjectStore;
use crate::models::{
    ObjectRecord, ObjectStatus, ObjectVersion, Page, PageRequest,
};
use crate::services::cache::ObjectCache;
use crate::services::error::KernelError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Stateless read-path service
#[derive(Clone)]
pub struct ObjectReader {
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn ObjectCache>,
}

impl ObjectReader {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<dyn ObjectCache>) -> Self {
        Self { store, cache }
    }

    /// Cache-first point lookup.
    ///
    /// Tenant mismatch and deleted rows are both `NotFound` - the kernel
    /// never reveals whether a foreign tenant's id exists.
    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<ObjectRecord, KernelError> {
        if let Some(record) = self.cache_get(id).await {
            if record.tenant_id == tenant_id && record.is_live() {
                return Ok(record);
            }
        }

        match self.store.get_object(tenant_id, id).await? {
            Some(record) => {
                self.cache_put(&record).await;
                Ok(record)
            }
            None => Err(KernelError::not_found("object", id)),
        }
    }

    /// Business-key lookup via the `code:` cache key, falling through to the
    /// store on a miss at either level.
    pub async fn get_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<ObjectRecord, KernelError> {
        let cached_id = match self.cache.get_id_by_code(tenant_id, type_code, code).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Cache code lookup failed, treating as miss");
                None
            }
        };

        if let Some(id) = cached_id {
            if let Some(record) = self.cache_get(id).await {
                if record.tenant_id == tenant_id
                    && record.type_code == type_code
                    && record.code == code
                    && record.is_live()
                {
                    return Ok(record);
                }
            }
        }

        match self
            .store
            .get_object_by_code(tenant_id, type_code, code)
            .await?
        {
            Some(record) => {
                self.cache_put(&record).await;
                Ok(record)
            }
            None => Err(KernelError::not_found(
                "object",
                format!("{}:{}", type_code, code),
            )),
        }
    }

    /// Live objects of a type, optionally narrowed to one status
    pub async fn list_by_type(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: Option<ObjectStatus>,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, KernelError> {
        Ok(self
            .store
            .list_by_type(tenant_id, type_code, status, page)
            .await?)
    }

    /// Objects of a type in one status; ARCHIVED rows are reachable here
    pub async fn list_by_status(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: ObjectStatus,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, KernelError> {
        Ok(self
            .store
            .list_by_type(tenant_id, type_code, Some(status), page)
            .await?)
    }

    /// Case-insensitive substring search over names
    pub async fn search_by_name(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, KernelError> {
        Ok(self
            .store
            .search_by_name(tenant_id, type_code, term, page)
            .await?)
    }

    /// Top-level attribute containment query.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or non-identifier key, or a value that
    /// is not a string, number, or boolean.
    pub async fn find_by_attribute(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        key: &str,
        value: &Value,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, KernelError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(KernelError::invalid_argument(format!(
                "attribute key '{}' is not a plain identifier",
                key
            )));
        }
        if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            return Err(KernelError::invalid_argument(
                "attribute value must be a string, number, or boolean",
            ));
        }

        Ok(self
            .store
            .query_by_attribute(tenant_id, type_code, key, value, page)
            .await?)
    }

    /// Fetch many live objects at once; an empty id list never touches the store
    pub async fn bulk_get(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<ObjectRecord>, KernelError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.bulk_get(tenant_id, ids).await?)
    }

    pub async fn count_by_type(
        &self,
        tenant_id: Uuid,
        type_code: &str,
    ) -> Result<u64, KernelError> {
        Ok(self.store.count_by_type(tenant_id, type_code).await?)
    }

    pub async fn count_by_status(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: ObjectStatus,
    ) -> Result<u64, KernelError> {
        Ok(self
            .store
            .count_by_status(tenant_id, type_code, status)
            .await?)
    }

    /// Version history, newest first. Works for soft-deleted objects too.
    pub async fn history(
        &self,
        tenant_id: Uuid,
        object_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<ObjectVersion>, KernelError> {
        self.require_owned(tenant_id, object_id).await?;
        Ok(self.store.list_versions(object_id, page).await?)
    }

    /// One specific version row.
    ///
    /// A number beyond the object's current version is `NotFound`.
    pub async fn get_version(
        &self,
        tenant_id: Uuid,
        object_id: Uuid,
        version_number: i64,
    ) -> Result<ObjectVersion, KernelError> {
        self.require_owned(tenant_id, object_id).await?;
        self.store
            .get_version(object_id, version_number)
            .await?
            .ok_or_else(|| {
                KernelError::not_found("version", format!("{}@{}", object_id, version_number))
            })
    }

    /// Time-travel: the latest version whose `created_at <= at`
    pub async fn find_version_at(
        &self,
        tenant_id: Uuid,
        object_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ObjectVersion, KernelError> {
        self.require_owned(tenant_id, object_id).await?;
        self.store
            .find_version_at(object_id, at)
            .await?
            .ok_or_else(|| {
                KernelError::not_found("version", format!("{}@{}", object_id, at.to_rfc3339()))
            })
    }

    /// History reads include deleted objects, but never foreign tenants
    async fn require_owned(&self, tenant_id: Uuid, object_id: Uuid) -> Result<(), KernelError> {
        self.store
            .get_object_any_state(tenant_id, object_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| KernelError::not_found("object", object_id))
    }

    async fn cache_get(&self, id: Uuid) -> Option<ObjectRecord> {
        match self.cache.get_by_id(id).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(object_id = %id, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cache_put(&self, record: &ObjectRecord) {
        if let Err(e) = self.cache.put(record).await {
            tracing::warn!(object_id = %record.id, error = %e, "Cache put failed, proceeding");
        }
    }
}
