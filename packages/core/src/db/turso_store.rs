//! TursoStore - ObjectStore implementation for the libsql backend
//!
//! This module implements the [`ObjectStore`] trait over libsql, handling the
//! SQL, the `libsql::Row` -> model conversions, and the transactional
//! mutation unit.
//!
//! # Design
//!
//! - One connection per operation via `DatabaseService::connect_with_timeout`,
//!   so a dropped future never leaves a transaction open on a shared handle
//! - Explicit `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK` around every
//!   multi-statement write; commit is the final await of the unit
//! - Timestamps are stored as RFC 3339 text with millisecond resolution,
//!   which also makes `created_at` ordering lexicographic
//! - Unique-constraint failures on the objects business key are mapped to
//!   [`DatabaseError::DuplicateCode`]; the optimistic version guard maps a
//!   zero-row update to [`DatabaseError::VersionConflict`]

use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::db::store::{MutationUnit, ObjectStore, ObjectWrite, OutboxStats};
use crate::models::{
    Cardinality, ChangeType, MetadataEntry, ObjectRecord, ObjectRelationship, ObjectStatus,
    ObjectVersion, OutboxEntry, OutboxStatus, Page, PageRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::Row;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// libsql-backed store
pub struct TursoStore {
    db: Arc<DatabaseService>,
}

const OBJECT_COLUMNS: &str = "id, tenant_id, type_code, code, name, data, status, version, \
     deleted, deleted_at, deleted_by, created_at, created_by, modified_at, modified_by, metadata";

const VERSION_COLUMNS: &str = "id, object_id, version_number, change_type, previous_data, \
     current_data, diff, changed_by, ip, user_agent, change_reason, created_at";

const RELATIONSHIP_COLUMNS: &str = "id, source_id, target_id, rel_type, cardinality, \
     bidirectional, inverse_type, strength, display_order, metadata, active, created_at, \
     created_by, modified_at, modified_by";

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, payload, status, \
     retry_count, max_retries, error_message, published_at, topic, \"partition\", \"offset\", \
     next_retry_at, idempotency_key, created_at";

const METADATA_COLUMNS: &str =
    "id, type_code, descriptor, synced_at, stale, ttl_minutes, usage_count, last_accessed_at";

impl TursoStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    fn objects(&self) -> String {
        self.db.table("objects")
    }

    fn versions(&self) -> String {
        self.db.table("object_versions")
    }

    fn relationships(&self) -> String {
        self.db.table("object_relationships")
    }

    fn outbox(&self) -> String {
        self.db.table("outbox")
    }

    fn metadata(&self) -> String {
        self.db.table("metadata_cache")
    }

    /// RFC 3339 with millisecond resolution - the canonical stored form
    fn ts(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
        match dt {
            Some(dt) => libsql::Value::Text(Self::ts(dt)),
            None => libsql::Value::Null,
        }
    }

    fn opt_text(s: &Option<String>) -> libsql::Value {
        match s {
            Some(s) => libsql::Value::Text(s.clone()),
            None => libsql::Value::Null,
        }
    }

    fn opt_json(v: &Option<Value>) -> Result<libsql::Value, DatabaseError> {
        match v {
            Some(v) => Ok(libsql::Value::Text(serde_json::to_string(v)?)),
            None => Ok(libsql::Value::Null),
        }
    }

    /// Parse stored timestamps - RFC 3339 normally, plain SQLite format for
    /// rows written by external tooling
    fn parse_timestamp(s: &str, column: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }
        Err(DatabaseError::row_decode(
            column,
            format!("unparseable timestamp '{}'", s),
        ))
    }

    fn parse_opt_timestamp(
        s: Option<String>,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        match s {
            Some(s) => Ok(Some(Self::parse_timestamp(&s, column)?)),
            None => Ok(None),
        }
    }

    fn parse_uuid(s: &str, column: &str) -> Result<Uuid, DatabaseError> {
        Uuid::parse_str(s).map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn get_text(row: &Row, idx: i32, column: &str) -> Result<String, DatabaseError> {
        row.get(idx)
            .map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn get_opt_text(row: &Row, idx: i32, column: &str) -> Result<Option<String>, DatabaseError> {
        row.get(idx)
            .map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn get_i64(row: &Row, idx: i32, column: &str) -> Result<i64, DatabaseError> {
        row.get(idx)
            .map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn get_opt_i64(row: &Row, idx: i32, column: &str) -> Result<Option<i64>, DatabaseError> {
        row.get(idx)
            .map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn get_f64(row: &Row, idx: i32, column: &str) -> Result<f64, DatabaseError> {
        row.get(idx)
            .map_err(|e| DatabaseError::row_decode(column, e.to_string()))
    }

    fn row_to_object(row: &Row) -> Result<ObjectRecord, DatabaseError> {
        let id = Self::parse_uuid(&Self::get_text(row, 0, "id")?, "id")?;
        let tenant_id = Self::parse_uuid(&Self::get_text(row, 1, "tenant_id")?, "tenant_id")?;
        let type_code = Self::get_text(row, 2, "type_code")?;
        let code = Self::get_text(row, 3, "code")?;
        let name = Self::get_text(row, 4, "name")?;
        let data: Value = serde_json::from_str(&Self::get_text(row, 5, "data")?)?;
        let status_text = Self::get_text(row, 6, "status")?;
        let status = ObjectStatus::parse(&status_text)
            .map_err(|e| DatabaseError::row_decode("status", e.to_string()))?;
        let version = Self::get_i64(row, 7, "version")?;
        let deleted = Self::get_i64(row, 8, "deleted")? != 0;
        let deleted_at =
            Self::parse_opt_timestamp(Self::get_opt_text(row, 9, "deleted_at")?, "deleted_at")?;
        let deleted_by = Self::get_opt_text(row, 10, "deleted_by")?;
        let created_at =
            Self::parse_timestamp(&Self::get_text(row, 11, "created_at")?, "created_at")?;
        let created_by = Self::get_text(row, 12, "created_by")?;
        let modified_at =
            Self::parse_timestamp(&Self::get_text(row, 13, "modified_at")?, "modified_at")?;
        let modified_by = Self::get_text(row, 14, "modified_by")?;
        let metadata: Value = serde_json::from_str(&Self::get_text(row, 15, "metadata")?)?;

        Ok(ObjectRecord {
            id,
            tenant_id,
            type_code,
            code,
            name,
            data,
            status,
            version,
            deleted,
            deleted_at,
            deleted_by,
            created_at,
            created_by,
            modified_at,
            modified_by,
            metadata,
        })
    }

    fn row_to_version(row: &Row) -> Result<ObjectVersion, DatabaseError> {
        let id = Self::parse_uuid(&Self::get_text(row, 0, "id")?, "id")?;
        let object_id = Self::parse_uuid(&Self::get_text(row, 1, "object_id")?, "object_id")?;
        let version_number = Self::get_i64(row, 2, "version_number")?;
        let change_text = Self::get_text(row, 3, "change_type")?;
        let change_type = ChangeType::parse(&change_text).ok_or_else(|| {
            DatabaseError::row_decode("change_type", format!("unknown '{}'", change_text))
        })?;
        let previous_data = Self::get_opt_text(row, 4, "previous_data")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;
        let current_data = Self::get_opt_text(row, 5, "current_data")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;
        let diff = Self::get_opt_text(row, 6, "diff")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        Ok(ObjectVersion {
            id,
            object_id,
            version_number,
            change_type,
            previous_data,
            current_data,
            diff,
            changed_by: Self::get_text(row, 7, "changed_by")?,
            ip: Self::get_opt_text(row, 8, "ip")?,
            user_agent: Self::get_opt_text(row, 9, "user_agent")?,
            change_reason: Self::get_opt_text(row, 10, "change_reason")?,
            created_at: Self::parse_timestamp(
                &Self::get_text(row, 11, "created_at")?,
                "created_at",
            )?,
        })
    }

    fn row_to_relationship(row: &Row) -> Result<ObjectRelationship, DatabaseError> {
        let cardinality_text = Self::get_text(row, 4, "cardinality")?;
        let cardinality = Cardinality::parse(&cardinality_text)
            .map_err(|e| DatabaseError::row_decode("cardinality", e.to_string()))?;

        Ok(ObjectRelationship {
            id: Self::parse_uuid(&Self::get_text(row, 0, "id")?, "id")?,
            source_id: Self::parse_uuid(&Self::get_text(row, 1, "source_id")?, "source_id")?,
            target_id: Self::parse_uuid(&Self::get_text(row, 2, "target_id")?, "target_id")?,
            rel_type: Self::get_text(row, 3, "rel_type")?,
            cardinality,
            bidirectional: Self::get_i64(row, 5, "bidirectional")? != 0,
            inverse_type: Self::get_opt_text(row, 6, "inverse_type")?,
            strength: Self::get_f64(row, 7, "strength")?,
            display_order: Self::get_i64(row, 8, "display_order")?,
            metadata: serde_json::from_str(&Self::get_text(row, 9, "metadata")?)?,
            active: Self::get_i64(row, 10, "active")? != 0,
            created_at: Self::parse_timestamp(
                &Self::get_text(row, 11, "created_at")?,
                "created_at",
            )?,
            created_by: Self::get_text(row, 12, "created_by")?,
            modified_at: Self::parse_timestamp(
                &Self::get_text(row, 13, "modified_at")?,
                "modified_at",
            )?,
            modified_by: Self::get_text(row, 14, "modified_by")?,
        })
    }

    fn row_to_outbox(row: &Row) -> Result<OutboxEntry, DatabaseError> {
        let status_text = Self::get_text(row, 5, "status")?;
        let status = OutboxStatus::parse(&status_text).ok_or_else(|| {
            DatabaseError::row_decode("status", format!("unknown '{}'", status_text))
        })?;

        Ok(OutboxEntry {
            id: Self::parse_uuid(&Self::get_text(row, 0, "id")?, "id")?,
            aggregate_id: Self::parse_uuid(
                &Self::get_text(row, 1, "aggregate_id")?,
                "aggregate_id",
            )?,
            aggregate_type: Self::get_text(row, 2, "aggregate_type")?,
            event_type: Self::get_text(row, 3, "event_type")?,
            payload: serde_json::from_str(&Self::get_text(row, 4, "payload")?)?,
            status,
            retry_count: Self::get_i64(row, 6, "retry_count")?,
            max_retries: Self::get_i64(row, 7, "max_retries")?,
            error_message: Self::get_opt_text(row, 8, "error_message")?,
            published_at: Self::parse_opt_timestamp(
                Self::get_opt_text(row, 9, "published_at")?,
                "published_at",
            )?,
            topic: Self::get_text(row, 10, "topic")?,
            partition: Self::get_opt_i64(row, 11, "partition")?,
            offset: Self::get_opt_i64(row, 12, "offset")?,
            next_retry_at: Self::parse_opt_timestamp(
                Self::get_opt_text(row, 13, "next_retry_at")?,
                "next_retry_at",
            )?,
            idempotency_key: Self::get_text(row, 14, "idempotency_key")?,
            created_at: Self::parse_timestamp(
                &Self::get_text(row, 15, "created_at")?,
                "created_at",
            )?,
        })
    }

    fn row_to_metadata(row: &Row) -> Result<MetadataEntry, DatabaseError> {
        Ok(MetadataEntry {
            id: Self::parse_uuid(&Self::get_text(row, 0, "id")?, "id")?,
            type_code: Self::get_text(row, 1, "type_code")?,
            descriptor: serde_json::from_str(&Self::get_text(row, 2, "descriptor")?)?,
            synced_at: Self::parse_timestamp(&Self::get_text(row, 3, "synced_at")?, "synced_at")?,
            stale: Self::get_i64(row, 4, "stale")? != 0,
            ttl_minutes: Self::get_i64(row, 5, "ttl_minutes")?,
            usage_count: Self::get_i64(row, 6, "usage_count")?,
            last_accessed_at: Self::parse_opt_timestamp(
                Self::get_opt_text(row, 7, "last_accessed_at")?,
                "last_accessed_at",
            )?,
        })
    }

    async fn query_objects(
        &self,
        conn: &libsql::Connection,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<Vec<ObjectRecord>, DatabaseError> {
        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            records.push(Self::row_to_object(&row)?);
        }
        Ok(records)
    }

    async fn query_count(
        &self,
        conn: &libsql::Connection,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<u64, DatabaseError> {
        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
            .ok_or_else(|| DatabaseError::sql_execution("count query returned no row"))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::row_decode("count", e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    /// JSON path + comparison parameter for the attribute containment query
    fn attribute_predicate(
        key: &str,
        value: &Value,
    ) -> Result<(String, libsql::Value), DatabaseError> {
        let path = format!("$.\"{}\"", key);
        let param = match value {
            Value::String(s) => libsql::Value::Text(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    libsql::Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    libsql::Value::Real(f)
                } else {
                    return Err(DatabaseError::Integrity(
                        "unsupported numeric attribute value".to_string(),
                    ));
                }
            }
            // JSON1 surfaces booleans as 1/0
            Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
            other => {
                return Err(DatabaseError::Integrity(format!(
                    "attribute queries support string, number, and bool values, got {}",
                    other
                )))
            }
        };
        Ok((path, param))
    }

    async fn insert_object_row(
        &self,
        conn: &libsql::Connection,
        record: &ObjectRecord,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.objects(),
            OBJECT_COLUMNS
        );
        let params = vec![
            libsql::Value::Text(record.id.to_string()),
            libsql::Value::Text(record.tenant_id.to_string()),
            libsql::Value::Text(record.type_code.clone()),
            libsql::Value::Text(record.code.clone()),
            libsql::Value::Text(record.name.clone()),
            libsql::Value::Text(serde_json::to_string(&record.data)?),
            libsql::Value::Text(record.status.as_str().to_string()),
            libsql::Value::Integer(record.version),
            libsql::Value::Integer(i64::from(record.deleted)),
            Self::opt_ts(record.deleted_at),
            Self::opt_text(&record.deleted_by),
            libsql::Value::Text(Self::ts(record.created_at)),
            libsql::Value::Text(record.created_by.clone()),
            libsql::Value::Text(Self::ts(record.modified_at)),
            libsql::Value::Text(record.modified_by.clone()),
            libsql::Value::Text(serde_json::to_string(&record.metadata)?),
        ];

        conn.execute(&sql, params).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("UNIQUE constraint failed") {
                DatabaseError::DuplicateCode {
                    type_code: record.type_code.clone(),
                    code: record.code.clone(),
                }
            } else if text.contains("constraint failed") {
                DatabaseError::Integrity(text)
            } else {
                DatabaseError::sql_execution(format!("insert object: {}", text))
            }
        })?;
        Ok(())
    }

    /// Optimistic overwrite; zero affected rows means the guard lost the race
    async fn update_object_row(
        &self,
        conn: &libsql::Connection,
        record: &ObjectRecord,
        expected_version: i64,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "UPDATE {} SET code = ?, name = ?, data = ?, status = ?, version = ?, deleted = ?, \
             deleted_at = ?, deleted_by = ?, modified_at = ?, modified_by = ?, metadata = ? \
             WHERE id = ? AND version = ?",
            self.objects()
        );
        let params = vec![
            libsql::Value::Text(record.code.clone()),
            libsql::Value::Text(record.name.clone()),
            libsql::Value::Text(serde_json::to_string(&record.data)?),
            libsql::Value::Text(record.status.as_str().to_string()),
            libsql::Value::Integer(record.version),
            libsql::Value::Integer(i64::from(record.deleted)),
            Self::opt_ts(record.deleted_at),
            Self::opt_text(&record.deleted_by),
            libsql::Value::Text(Self::ts(record.modified_at)),
            libsql::Value::Text(record.modified_by.clone()),
            libsql::Value::Text(serde_json::to_string(&record.metadata)?),
            libsql::Value::Text(record.id.to_string()),
            libsql::Value::Integer(expected_version),
        ];

        let affected = conn.execute(&sql, params).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("UNIQUE constraint failed") {
                DatabaseError::DuplicateCode {
                    type_code: record.type_code.clone(),
                    code: record.code.clone(),
                }
            } else {
                DatabaseError::sql_execution(format!("update object: {}", text))
            }
        })?;

        if affected == 0 {
            return Err(DatabaseError::VersionConflict {
                object_id: record.id,
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn insert_version_row(
        &self,
        conn: &libsql::Connection,
        version: &ObjectVersion,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.versions(),
            VERSION_COLUMNS
        );
        let params = vec![
            libsql::Value::Text(version.id.to_string()),
            libsql::Value::Text(version.object_id.to_string()),
            libsql::Value::Integer(version.version_number),
            libsql::Value::Text(version.change_type.as_str().to_string()),
            Self::opt_json(&version.previous_data)?,
            Self::opt_json(&version.current_data)?,
            Self::opt_json(&version.diff)?,
            libsql::Value::Text(version.changed_by.clone()),
            Self::opt_text(&version.ip),
            Self::opt_text(&version.user_agent),
            Self::opt_text(&version.change_reason),
            libsql::Value::Text(Self::ts(version.created_at)),
        ];

        conn.execute(&sql, params).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("constraint failed") {
                DatabaseError::Integrity(format!("version append: {}", text))
            } else {
                DatabaseError::sql_execution(format!("insert version: {}", text))
            }
        })?;
        Ok(())
    }

    async fn insert_outbox_row(
        &self,
        conn: &libsql::Connection,
        entry: &OutboxEntry,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.outbox(),
            OUTBOX_COLUMNS
        );
        let params = vec![
            libsql::Value::Text(entry.id.to_string()),
            libsql::Value::Text(entry.aggregate_id.to_string()),
            libsql::Value::Text(entry.aggregate_type.clone()),
            libsql::Value::Text(entry.event_type.clone()),
            libsql::Value::Text(serde_json::to_string(&entry.payload)?),
            libsql::Value::Text(entry.status.as_str().to_string()),
            libsql::Value::Integer(entry.retry_count),
            libsql::Value::Integer(entry.max_retries),
            Self::opt_text(&entry.error_message),
            Self::opt_ts(entry.published_at),
            libsql::Value::Text(entry.topic.clone()),
            match entry.partition {
                Some(p) => libsql::Value::Integer(p),
                None => libsql::Value::Null,
            },
            match entry.offset {
                Some(o) => libsql::Value::Integer(o),
                None => libsql::Value::Null,
            },
            Self::opt_ts(entry.next_retry_at),
            libsql::Value::Text(entry.idempotency_key.clone()),
            libsql::Value::Text(Self::ts(entry.created_at)),
        ];

        conn.execute(&sql, params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("insert outbox: {}", e)))?;
        Ok(())
    }

    async fn insert_relationship_row(
        &self,
        conn: &libsql::Connection,
        rel: &ObjectRelationship,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.relationships(),
            RELATIONSHIP_COLUMNS
        );
        let params = vec![
            libsql::Value::Text(rel.id.to_string()),
            libsql::Value::Text(rel.source_id.to_string()),
            libsql::Value::Text(rel.target_id.to_string()),
            libsql::Value::Text(rel.rel_type.clone()),
            libsql::Value::Text(rel.cardinality.as_str().to_string()),
            libsql::Value::Integer(i64::from(rel.bidirectional)),
            Self::opt_text(&rel.inverse_type),
            libsql::Value::Real(rel.strength),
            libsql::Value::Integer(rel.display_order),
            libsql::Value::Text(serde_json::to_string(&rel.metadata)?),
            libsql::Value::Integer(i64::from(rel.active)),
            libsql::Value::Text(Self::ts(rel.created_at)),
            libsql::Value::Text(rel.created_by.clone()),
            libsql::Value::Text(Self::ts(rel.modified_at)),
            libsql::Value::Text(rel.modified_by.clone()),
        ];

        conn.execute(&sql, params).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("UNIQUE constraint failed") {
                DatabaseError::DuplicateRelationship {
                    source_id: rel.source_id,
                    target_id: rel.target_id,
                    rel_type: rel.rel_type.clone(),
                }
            } else if text.contains("FOREIGN KEY constraint failed") {
                DatabaseError::Integrity("relationship endpoint does not exist".to_string())
            } else {
                DatabaseError::sql_execution(format!("insert relationship: {}", text))
            }
        })?;
        Ok(())
    }

    async fn begin(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        // IMMEDIATE takes the write lock up front; a deferred transaction
        // that upgrades mid-way can fail with SQLITE_BUSY that the busy
        // timeout cannot wait out.
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("begin: {}", e)))?;
        Ok(())
    }

    async fn commit(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        conn.execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("commit: {}", e)))?;
        Ok(())
    }

    async fn rollback(conn: &libsql::Connection) {
        let _ = conn.execute("ROLLBACK", ()).await;
    }

    async fn query_outbox_batch(
        &self,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            entries.push(Self::row_to_outbox(&row)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for TursoStore {
    async fn get_object(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ObjectRecord>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND tenant_id = ? AND deleted = 0",
            OBJECT_COLUMNS,
            self.objects()
        );
        let records = self
            .query_objects(
                &conn,
                &sql,
                vec![
                    libsql::Value::Text(id.to_string()),
                    libsql::Value::Text(tenant_id.to_string()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_object_any_state(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ObjectRecord>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND tenant_id = ?",
            OBJECT_COLUMNS,
            self.objects()
        );
        let records = self
            .query_objects(
                &conn,
                &sql,
                vec![
                    libsql::Value::Text(id.to_string()),
                    libsql::Value::Text(tenant_id.to_string()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_object_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<Option<ObjectRecord>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} \
             WHERE tenant_id = ? AND type_code = ? AND code = ? AND deleted = 0",
            OBJECT_COLUMNS,
            self.objects()
        );
        let records = self
            .query_objects(
                &conn,
                &sql,
                vec![
                    libsql::Value::Text(tenant_id.to_string()),
                    libsql::Value::Text(type_code.to_string()),
                    libsql::Value::Text(code.to_string()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn list_by_type(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: Option<ObjectStatus>,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError> {
        let page = page.clamped();
        let conn = self.db.connect_with_timeout().await?;

        let mut predicate = "tenant_id = ? AND type_code = ? AND deleted = 0".to_string();
        let mut params = vec![
            libsql::Value::Text(tenant_id.to_string()),
            libsql::Value::Text(type_code.to_string()),
        ];
        if let Some(status) = status {
            predicate.push_str(" AND status = ?");
            params.push(libsql::Value::Text(status.as_str().to_string()));
        }

        let total = self
            .query_count(
                &conn,
                &format!("SELECT COUNT(*) FROM {} WHERE {}", self.objects(), predicate),
                params.clone(),
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            OBJECT_COLUMNS,
            self.objects(),
            predicate
        );
        params.push(libsql::Value::Integer(page.limit()));
        params.push(libsql::Value::Integer(page.offset()));
        let items = self.query_objects(&conn, &sql, params).await?;

        Ok(Page::new(items, total, page))
    }

    async fn search_by_name(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError> {
        let page = page.clamped();
        let conn = self.db.connect_with_timeout().await?;
        let pattern = format!("%{}%", term);

        let predicate = "tenant_id = ? AND type_code = ? AND deleted = 0 AND name LIKE ?";
        let params = vec![
            libsql::Value::Text(tenant_id.to_string()),
            libsql::Value::Text(type_code.to_string()),
            libsql::Value::Text(pattern),
        ];

        let total = self
            .query_count(
                &conn,
                &format!("SELECT COUNT(*) FROM {} WHERE {}", self.objects(), predicate),
                params.clone(),
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY name, id LIMIT ? OFFSET ?",
            OBJECT_COLUMNS,
            self.objects(),
            predicate
        );
        let mut params = params;
        params.push(libsql::Value::Integer(page.limit()));
        params.push(libsql::Value::Integer(page.offset()));
        let items = self.query_objects(&conn, &sql, params).await?;

        Ok(Page::new(items, total, page))
    }

    async fn query_by_attribute(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        key: &str,
        value: &Value,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError> {
        let page = page.clamped();
        let conn = self.db.connect_with_timeout().await?;
        let (path, param) = Self::attribute_predicate(key, value)?;

        let predicate =
            "tenant_id = ? AND type_code = ? AND deleted = 0 AND json_extract(data, ?) = ?";
        let params = vec![
            libsql::Value::Text(tenant_id.to_string()),
            libsql::Value::Text(type_code.to_string()),
            libsql::Value::Text(path),
            param,
        ];

        let total = self
            .query_count(
                &conn,
                &format!("SELECT COUNT(*) FROM {} WHERE {}", self.objects(), predicate),
                params.clone(),
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            OBJECT_COLUMNS,
            self.objects(),
            predicate
        );
        let mut params = params;
        params.push(libsql::Value::Integer(page.limit()));
        params.push(libsql::Value::Integer(page.offset()));
        let items = self.query_objects(&conn, &sql, params).await?;

        Ok(Page::new(items, total, page))
    }

    async fn bulk_get(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<ObjectRecord>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.db.connect_with_timeout().await?;

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} \
             WHERE tenant_id = ? AND deleted = 0 AND id IN ({}) ORDER BY created_at DESC, id",
            OBJECT_COLUMNS,
            self.objects(),
            placeholders
        );

        let mut params = vec![libsql::Value::Text(tenant_id.to_string())];
        params.extend(ids.iter().map(|id| libsql::Value::Text(id.to_string())));

        self.query_objects(&conn, &sql, params).await
    }

    async fn count_by_type(
        &self,
        tenant_id: Uuid,
        type_code: &str,
    ) -> Result<u64, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        self.query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM {} WHERE tenant_id = ? AND type_code = ? AND deleted = 0",
                self.objects()
            ),
            vec![
                libsql::Value::Text(tenant_id.to_string()),
                libsql::Value::Text(type_code.to_string()),
            ],
        )
        .await
    }

    async fn count_by_status(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: ObjectStatus,
    ) -> Result<u64, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        self.query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM {} \
                 WHERE tenant_id = ? AND type_code = ? AND status = ? AND deleted = 0",
                self.objects()
            ),
            vec![
                libsql::Value::Text(tenant_id.to_string()),
                libsql::Value::Text(type_code.to_string()),
                libsql::Value::Text(status.as_str().to_string()),
            ],
        )
        .await
    }

    async fn apply_mutation(&self, unit: MutationUnit) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin(&conn).await?;

        let object_id = unit.version.object_id;

        let write_result = match &unit.write {
            ObjectWrite::Insert(record) => self.insert_object_row(&conn, record).await,
            ObjectWrite::Update {
                record,
                expected_version,
            } => {
                self.update_object_row(&conn, record, *expected_version)
                    .await
            }
        };
        if let Err(e) = write_result {
            Self::rollback(&conn).await;
            return Err(e);
        }

        if let Err(e) = self.insert_version_row(&conn, &unit.version).await {
            Self::rollback(&conn).await;
            return Err(e);
        }

        if let Err(e) = self.insert_outbox_row(&conn, &unit.outbox).await {
            Self::rollback(&conn).await;
            return Err(e);
        }

        if unit.retire_edges {
            let sql = format!(
                "UPDATE {} SET active = 0, modified_at = ?, modified_by = ? \
                 WHERE (source_id = ? OR target_id = ?) AND active = 1",
                self.relationships()
            );
            let result = conn
                .execute(
                    &sql,
                    vec![
                        libsql::Value::Text(Self::ts(Utc::now())),
                        libsql::Value::Text(unit.version.changed_by.clone()),
                        libsql::Value::Text(object_id.to_string()),
                        libsql::Value::Text(object_id.to_string()),
                    ],
                )
                .await;
            if let Err(e) = result {
                Self::rollback(&conn).await;
                return Err(DatabaseError::sql_execution(format!("retire edges: {}", e)));
            }
        }

        self.commit(&conn).await
    }

    async fn list_versions(
        &self,
        object_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<ObjectVersion>, DatabaseError> {
        let page = page.clamped();
        let conn = self.db.connect_with_timeout().await?;

        let total = self
            .query_count(
                &conn,
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE object_id = ?",
                    self.versions()
                ),
                vec![libsql::Value::Text(object_id.to_string())],
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM {} WHERE object_id = ? \
             ORDER BY version_number DESC LIMIT ? OFFSET ?",
            VERSION_COLUMNS,
            self.versions()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![
                libsql::Value::Text(object_id.to_string()),
                libsql::Value::Integer(page.limit()),
                libsql::Value::Integer(page.offset()),
            ])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            items.push(Self::row_to_version(&row)?);
        }

        Ok(Page::new(items, total, page))
    }

    async fn get_version(
        &self,
        object_id: Uuid,
        version_number: i64,
    ) -> Result<Option<ObjectVersion>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE object_id = ? AND version_number = ?",
            VERSION_COLUMNS,
            self.versions()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![
                libsql::Value::Text(object_id.to_string()),
                libsql::Value::Integer(version_number),
            ])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_version(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_version_at(
        &self,
        object_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ObjectVersion>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE object_id = ? AND created_at <= ? \
             ORDER BY created_at DESC, version_number DESC LIMIT 1",
            VERSION_COLUMNS,
            self.versions()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![
                libsql::Value::Text(object_id.to_string()),
                libsql::Value::Text(Self::ts(at)),
            ])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_version(&row)?)),
            None => Ok(None),
        }
    }

    async fn apply_relationship(
        &self,
        relationship: ObjectRelationship,
        outbox: OutboxEntry,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin(&conn).await?;

        if let Err(e) = self.insert_relationship_row(&conn, &relationship).await {
            Self::rollback(&conn).await;
            return Err(e);
        }
        if let Err(e) = self.insert_outbox_row(&conn, &outbox).await {
            Self::rollback(&conn).await;
            return Err(e);
        }

        self.commit(&conn).await
    }

    async fn retire_relationship(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        rel_type: &str,
        modified_by: &str,
        outbox: OutboxEntry,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        self.begin(&conn).await?;

        let sql = format!(
            "UPDATE {} SET active = 0, modified_at = ?, modified_by = ? \
             WHERE source_id = ? AND target_id = ? AND rel_type = ? AND active = 1",
            self.relationships()
        );
        let affected = match conn
            .execute(
                &sql,
                vec![
                    libsql::Value::Text(Self::ts(Utc::now())),
                    libsql::Value::Text(modified_by.to_string()),
                    libsql::Value::Text(source_id.to_string()),
                    libsql::Value::Text(target_id.to_string()),
                    libsql::Value::Text(rel_type.to_string()),
                ],
            )
            .await
        {
            Ok(n) => n,
            Err(e) => {
                Self::rollback(&conn).await;
                return Err(DatabaseError::sql_execution(format!(
                    "retire relationship: {}",
                    e
                )));
            }
        };

        if affected == 0 {
            Self::rollback(&conn).await;
            return Err(DatabaseError::not_found(
                "relationship",
                format!("{} -[{}]-> {}", source_id, rel_type, target_id),
            ));
        }

        if let Err(e) = self.insert_outbox_row(&conn, &outbox).await {
            Self::rollback(&conn).await;
            return Err(e);
        }

        self.commit(&conn).await
    }

    async fn get_relationship(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        rel_type: &str,
    ) -> Result<Option<ObjectRelationship>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} \
             WHERE source_id = ? AND target_id = ? AND rel_type = ? AND active = 1",
            RELATIONSHIP_COLUMNS,
            self.relationships()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![
                libsql::Value::Text(source_id.to_string()),
                libsql::Value::Text(target_id.to_string()),
                libsql::Value::Text(rel_type.to_string()),
            ])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_relationship(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_relationships_from(
        &self,
        source_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE source_id = ? AND active = 1 \
             ORDER BY display_order, created_at",
            RELATIONSHIP_COLUMNS,
            self.relationships()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![libsql::Value::Text(source_id.to_string())])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            edges.push(Self::row_to_relationship(&row)?);
        }
        Ok(edges)
    }

    async fn list_relationships_to(
        &self,
        target_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE target_id = ? AND active = 1 \
             ORDER BY display_order, created_at",
            RELATIONSHIP_COLUMNS,
            self.relationships()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![libsql::Value::Text(target_id.to_string())])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            edges.push(Self::row_to_relationship(&row)?);
        }
        Ok(edges)
    }

    async fn fetch_pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, DatabaseError> {
        // The NOT EXISTS clause keeps per-aggregate creation order: a row is
        // only eligible while no older unresolved row exists for the same
        // aggregate. Exhausted dead letters do not block their successors.
        let outbox = self.outbox();
        let sql = format!(
            "SELECT {cols} FROM {o} o \
             WHERE o.status = 'PENDING' \
               AND NOT EXISTS ( \
                 SELECT 1 FROM {o} p \
                 WHERE p.aggregate_id = o.aggregate_id \
                   AND p.status != 'PUBLISHED' \
                   AND NOT (p.status = 'FAILED' AND p.retry_count >= p.max_retries) \
                   AND (p.created_at < o.created_at \
                        OR (p.created_at = o.created_at AND p.rowid < o.rowid))) \
             ORDER BY o.created_at ASC, o.rowid ASC LIMIT ?",
            cols = OUTBOX_COLUMNS,
            o = outbox
        );
        self.query_outbox_batch(&sql, vec![libsql::Value::Integer(limit)])
            .await
    }

    async fn fetch_retry_outbox(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let outbox = self.outbox();
        let sql = format!(
            "SELECT {cols} FROM {o} o \
             WHERE o.status = 'FAILED' \
               AND o.retry_count < o.max_retries \
               AND (o.next_retry_at IS NULL OR o.next_retry_at <= ?) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM {o} p \
                 WHERE p.aggregate_id = o.aggregate_id \
                   AND p.status != 'PUBLISHED' \
                   AND NOT (p.status = 'FAILED' AND p.retry_count >= p.max_retries) \
                   AND (p.created_at < o.created_at \
                        OR (p.created_at = o.created_at AND p.rowid < o.rowid))) \
             ORDER BY o.created_at ASC, o.rowid ASC LIMIT ?",
            cols = OUTBOX_COLUMNS,
            o = outbox
        );
        self.query_outbox_batch(
            &sql,
            vec![
                libsql::Value::Text(Self::ts(now)),
                libsql::Value::Integer(limit),
            ],
        )
        .await
    }

    async fn mark_outbox_published(
        &self,
        id: Uuid,
        partition: i64,
        offset: i64,
        published_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "UPDATE {} SET status = 'PUBLISHED', \"partition\" = ?, \"offset\" = ?, \
             published_at = ?, error_message = NULL, next_retry_at = NULL \
             WHERE id = ? AND status IN ('PENDING', 'FAILED')",
            self.outbox()
        );
        let affected = conn
            .execute(
                &sql,
                vec![
                    libsql::Value::Integer(partition),
                    libsql::Value::Integer(offset),
                    libsql::Value::Text(Self::ts(published_at)),
                    libsql::Value::Text(id.to_string()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("mark published: {}", e)))?;
        Ok(affected > 0)
    }

    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "UPDATE {} SET status = 'FAILED', retry_count = retry_count + 1, \
             error_message = ?, next_retry_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'FAILED')",
            self.outbox()
        );
        let affected = conn
            .execute(
                &sql,
                vec![
                    libsql::Value::Text(error.to_string()),
                    Self::opt_ts(next_retry_at),
                    libsql::Value::Text(id.to_string()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("mark failed: {}", e)))?;
        Ok(affected > 0)
    }

    async fn sweep_published_outbox(&self, before: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "DELETE FROM {} WHERE status = 'PUBLISHED' AND published_at < ?",
            self.outbox()
        );
        let affected = conn
            .execute(&sql, vec![libsql::Value::Text(Self::ts(before))])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("sweep published: {}", e)))?;
        Ok(affected)
    }

    async fn outbox_stats(&self) -> Result<OutboxStats, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT status, COUNT(*), \
             SUM(CASE WHEN status = 'FAILED' AND retry_count >= max_retries THEN 1 ELSE 0 END) \
             FROM {} GROUP BY status",
            self.outbox()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        let mut stats = OutboxStats::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let status = Self::get_text(&row, 0, "status")?;
            let count = Self::get_i64(&row, 1, "count")?.max(0) as u64;
            let dead = Self::get_opt_i64(&row, 2, "dead_letter")?
                .unwrap_or(0)
                .max(0) as u64;
            match status.as_str() {
                "PENDING" => stats.pending = count,
                "PUBLISHED" => stats.published = count,
                "FAILED" => {
                    stats.failed = count;
                    stats.dead_letter = dead;
                }
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn get_outbox_entry(&self, id: Uuid) -> Result<Option<OutboxEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            OUTBOX_COLUMNS,
            self.outbox()
        );
        let entries = self
            .query_outbox_batch(&sql, vec![libsql::Value::Text(id.to_string())])
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn list_outbox_for_aggregate(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<OutboxEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE aggregate_id = ? ORDER BY created_at ASC, rowid ASC",
            OUTBOX_COLUMNS,
            self.outbox()
        );
        self.query_outbox_batch(&sql, vec![libsql::Value::Text(aggregate_id.to_string())])
            .await
    }

    async fn get_metadata(&self, type_code: &str) -> Result<Option<MetadataEntry>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM {} WHERE type_code = ?",
            METADATA_COLUMNS,
            self.metadata()
        );
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("prepare: {}", e)))?;
        let mut rows = stmt
            .query(vec![libsql::Value::Text(type_code.to_string())])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("query: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => Ok(Some(Self::row_to_metadata(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_metadata(&self, entry: MetadataEntry) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(type_code) DO UPDATE SET \
             descriptor = excluded.descriptor, synced_at = excluded.synced_at, \
             stale = excluded.stale, ttl_minutes = excluded.ttl_minutes",
            self.metadata(),
            METADATA_COLUMNS
        );
        conn.execute(
            &sql,
            vec![
                libsql::Value::Text(entry.id.to_string()),
                libsql::Value::Text(entry.type_code.clone()),
                libsql::Value::Text(serde_json::to_string(&entry.descriptor)?),
                libsql::Value::Text(Self::ts(entry.synced_at)),
                libsql::Value::Integer(i64::from(entry.stale)),
                libsql::Value::Integer(entry.ttl_minutes),
                libsql::Value::Integer(entry.usage_count),
                Self::opt_ts(entry.last_accessed_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("upsert metadata: {}", e)))?;
        Ok(())
    }

    async fn touch_metadata(
        &self,
        type_code: &str,
        accessed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "UPDATE {} SET usage_count = usage_count + 1, last_accessed_at = ? \
             WHERE type_code = ?",
            self.metadata()
        );
        conn.execute(
            &sql,
            vec![
                libsql::Value::Text(Self::ts(accessed_at)),
                libsql::Value::Text(type_code.to_string()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("touch metadata: {}", e)))?;
        Ok(())
    }

    async fn mark_metadata_stale(&self, type_code: &str) -> Result<(), DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "UPDATE {} SET stale = 1 WHERE type_code = ?",
            self.metadata()
        );
        conn.execute(&sql, vec![libsql::Value::Text(type_code.to_string())])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("mark metadata stale: {}", e)))?;
        Ok(())
    }
}
