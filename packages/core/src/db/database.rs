//! Database Connection Management
//!
//! This module provides the core database connection and startup migrations
//! using libsql for ObjectKernel's schema-flexible storage.
//!
//! # Architecture
//!
//! - **Path-agnostic**: accepts any valid PathBuf
//! - **Prefixed tables**: every table name carries a deployer-chosen prefix
//!   (default `kernel`), so several deployments can share one database file
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Foreign keys**: enabled for referential integrity
//! - **JSON operators**: native SQLite JSON support for the attribute query layer
//! - **Numbered migrations**: V1..V6 applied once at startup in order, tracked
//!   in a `<prefix>_schema_migrations` table
//!
//! # Database Connection Patterns
//!
//! **Always use `connect_with_timeout()` in async functions** to avoid SQLite
//! thread-safety violations when the Tokio runtime moves futures between
//! threads. The 5-second busy timeout makes concurrent operations wait and
//! retry instead of failing immediately with `SQLITE_BUSY`.

use crate::db::error::DatabaseError;
use std::path::PathBuf;
use std::sync::Arc;

/// Default table prefix
pub const DEFAULT_TABLE_PREFIX: &str = "kernel";

/// Database service managing the libsql connection, table naming, and
/// startup migrations.
///
/// # Examples
///
/// ```no_run
/// use objectkernel_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = DatabaseService::new(PathBuf::from("./data/kernel.db"), "kernel").await?;
///     # let _ = db;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<libsql::Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    /// Deployer-chosen table prefix
    prefix: String,
}

/// One numbered startup migration
struct Migration {
    version: i64,
    name: &'static str,
    statements: Vec<String>,
}

impl DatabaseService {
    /// Open (or create) the database and bring the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the parent directory cannot be created,
    /// the connection fails, or a migration fails to apply.
    pub async fn new(db_path: PathBuf, prefix: impl Into<String>) -> Result<Self, DatabaseError> {
        let prefix = prefix.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = libsql::Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            prefix,
        };

        service.run_migrations().await?;

        Ok(service)
    }

    /// Prefixed physical table name, e.g. `kernel_objects`
    pub fn table(&self, base: &str) -> String {
        format!("{}_{}", self.prefix, base)
    }

    /// Create a raw connection handle
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        Ok(self.db.connect()?)
    }

    /// Connection with busy timeout configured - the default choice in async code
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;
        Ok(conn)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Apply V1..V6 in order, skipping versions already recorded.
    ///
    /// Each migration runs in its own transaction together with its tracking
    /// row, so a failed migration leaves no partial schema behind.
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                self.table("schema_migrations")
            ),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create migrations table: {}", e))
        })?;

        let applied = self.applied_versions(&conn).await?;

        for migration in self.migrations() {
            if applied.contains(&migration.version) {
                continue;
            }
            self.apply_migration(&conn, &migration).await?;
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applied schema migration"
            );
        }

        Ok(())
    }

    async fn applied_versions(
        &self,
        conn: &libsql::Connection,
    ) -> Result<Vec<i64>, DatabaseError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version FROM {} ORDER BY version",
                self.table("schema_migrations")
            ))
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read applied migrations: {}", e))
            })?;

        let mut rows = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to read applied migrations: {}", e))
        })?;

        let mut versions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let version: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::row_decode("version", e.to_string()))?;
            versions.push(version);
        }
        Ok(versions)
    }

    async fn apply_migration(
        &self,
        conn: &libsql::Connection,
        migration: &Migration,
    ) -> Result<(), DatabaseError> {
        // BEGIN IMMEDIATE takes the write lock up front so a concurrent
        // starter cannot interleave half-applied schema statements.
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::migration_failed(migration.version, format!("begin: {}", e))
        })?;

        for statement in &migration.statements {
            if let Err(e) = conn.execute(statement, ()).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(DatabaseError::migration_failed(
                    migration.version,
                    format!("{}: {}", statement, e),
                ));
            }
        }

        let tracking = format!(
            "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
            self.table("schema_migrations")
        );
        if let Err(e) = conn
            .execute(
                &tracking,
                (
                    migration.version,
                    migration.name,
                    chrono::Utc::now().to_rfc3339(),
                ),
            )
            .await
        {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::migration_failed(
                migration.version,
                format!("tracking row: {}", e),
            ));
        }

        conn.execute("COMMIT", ()).await.map_err(|e| {
            let _ = conn.execute("ROLLBACK", ());
            DatabaseError::migration_failed(migration.version, format!("commit: {}", e))
        })?;

        Ok(())
    }

    /// The ordered migration set.
    ///
    /// Table notes:
    /// - the uniqueness of `(tenant_id, type_code, code)` holds among
    ///   non-deleted rows only, so a soft-deleted code can be re-used
    /// - `"offset"` is quoted because it collides with the SQL keyword
    fn migrations(&self) -> Vec<Migration> {
        let objects = self.table("objects");
        let versions = self.table("object_versions");
        let relationships = self.table("object_relationships");
        let outbox = self.table("outbox");
        let metadata = self.table("metadata_cache");

        vec![
            Migration {
                version: 1,
                name: "objects",
                statements: vec![
                    format!(
                        "CREATE TABLE IF NOT EXISTS {objects} (
                            id TEXT PRIMARY KEY,
                            tenant_id TEXT NOT NULL,
                            type_code TEXT NOT NULL,
                            code TEXT NOT NULL,
                            name TEXT NOT NULL,
                            data TEXT NOT NULL DEFAULT '{{}}',
                            status TEXT NOT NULL DEFAULT 'ACTIVE',
                            version INTEGER NOT NULL DEFAULT 1,
                            deleted INTEGER NOT NULL DEFAULT 0,
                            deleted_at TEXT,
                            deleted_by TEXT,
                            created_at TEXT NOT NULL,
                            created_by TEXT NOT NULL,
                            modified_at TEXT NOT NULL,
                            modified_by TEXT NOT NULL,
                            metadata TEXT NOT NULL DEFAULT '{{}}'
                        )"
                    ),
                    format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{objects}_code
                         ON {objects}(tenant_id, type_code, code) WHERE deleted = 0"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{objects}_tenant_type
                         ON {objects}(tenant_id, type_code, deleted, status)"
                    ),
                ],
            },
            Migration {
                version: 2,
                name: "object_versions",
                statements: vec![
                    format!(
                        "CREATE TABLE IF NOT EXISTS {versions} (
                            id TEXT PRIMARY KEY,
                            object_id TEXT NOT NULL REFERENCES {objects}(id) ON DELETE CASCADE,
                            version_number INTEGER NOT NULL,
                            change_type TEXT NOT NULL,
                            previous_data TEXT,
                            current_data TEXT,
                            diff TEXT,
                            changed_by TEXT NOT NULL,
                            ip TEXT,
                            user_agent TEXT,
                            change_reason TEXT,
                            created_at TEXT NOT NULL
                        )"
                    ),
                    format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{versions}_number
                         ON {versions}(object_id, version_number)"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{versions}_created
                         ON {versions}(object_id, created_at)"
                    ),
                ],
            },
            Migration {
                version: 3,
                name: "object_relationships",
                statements: vec![
                    format!(
                        "CREATE TABLE IF NOT EXISTS {relationships} (
                            id TEXT PRIMARY KEY,
                            source_id TEXT NOT NULL REFERENCES {objects}(id) ON DELETE CASCADE,
                            target_id TEXT NOT NULL REFERENCES {objects}(id) ON DELETE CASCADE,
                            rel_type TEXT NOT NULL,
                            cardinality TEXT NOT NULL,
                            bidirectional INTEGER NOT NULL DEFAULT 0,
                            inverse_type TEXT,
                            strength REAL NOT NULL DEFAULT 1.0,
                            display_order INTEGER NOT NULL DEFAULT 0,
                            metadata TEXT NOT NULL DEFAULT '{{}}',
                            active INTEGER NOT NULL DEFAULT 1,
                            created_at TEXT NOT NULL,
                            created_by TEXT NOT NULL,
                            modified_at TEXT NOT NULL,
                            modified_by TEXT NOT NULL
                        )"
                    ),
                    format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{relationships}_edge
                         ON {relationships}(source_id, target_id, rel_type) WHERE active = 1"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{relationships}_source
                         ON {relationships}(source_id, active)"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{relationships}_target
                         ON {relationships}(target_id, active)"
                    ),
                ],
            },
            Migration {
                version: 4,
                name: "outbox",
                statements: vec![
                    format!(
                        "CREATE TABLE IF NOT EXISTS {outbox} (
                            id TEXT PRIMARY KEY,
                            aggregate_id TEXT NOT NULL,
                            aggregate_type TEXT NOT NULL,
                            event_type TEXT NOT NULL,
                            payload TEXT NOT NULL,
                            status TEXT NOT NULL DEFAULT 'PENDING',
                            retry_count INTEGER NOT NULL DEFAULT 0,
                            max_retries INTEGER NOT NULL DEFAULT 5,
                            error_message TEXT,
                            published_at TEXT,
                            topic TEXT NOT NULL,
                            \"partition\" INTEGER,
                            \"offset\" INTEGER,
                            next_retry_at TEXT,
                            idempotency_key TEXT NOT NULL,
                            created_at TEXT NOT NULL
                        )"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{outbox}_status_created
                         ON {outbox}(status, created_at)"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{outbox}_retry
                         ON {outbox}(next_retry_at) WHERE status = 'FAILED'"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{outbox}_aggregate
                         ON {outbox}(aggregate_id, created_at)"
                    ),
                ],
            },
            Migration {
                version: 5,
                name: "metadata_cache",
                statements: vec![format!(
                    "CREATE TABLE IF NOT EXISTS {metadata} (
                        id TEXT PRIMARY KEY,
                        type_code TEXT NOT NULL UNIQUE,
                        descriptor TEXT NOT NULL,
                        synced_at TEXT NOT NULL,
                        stale INTEGER NOT NULL DEFAULT 0,
                        ttl_minutes INTEGER NOT NULL DEFAULT 60,
                        usage_count INTEGER NOT NULL DEFAULT 0,
                        last_accessed_at TEXT
                    )"
                )],
            },
            Migration {
                version: 6,
                name: "search_indexes",
                statements: vec![
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{objects}_name
                         ON {objects}(tenant_id, type_code, name)"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_{objects}_modified
                         ON {objects}(tenant_id, modified_at)"
                    ),
                    format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{outbox}_idempotency
                         ON {outbox}(idempotency_key)"
                    ),
                ],
            },
        ]
    }
}
