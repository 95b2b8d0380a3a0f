//! Runtime kernel configuration
//!
//! `KernelConfig` is the single source of truth for what a running kernel
//! uses. It is built once at startup by the embedding process (which owns
//! config *loading* - files, env, flags - none of which happens here) and
//! passed to [`crate::services::Kernel::open`]. Immutable for the process
//! lifetime, never serialized.

use crate::db::DEFAULT_TABLE_PREFIX;
use crate::models::DEFAULT_TTL_MINUTES;
use crate::services::dispatcher::DispatcherConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the kernel needs to run
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Path to the libsql database file
    pub db_path: PathBuf,

    /// Deployer-chosen table prefix (default `kernel`)
    pub table_prefix: String,

    /// Look-aside cache entry TTL (default 1 hour)
    pub cache_ttl: Duration,

    /// Outbox dispatcher tuning
    pub dispatcher: DispatcherConfig,

    /// TTL for cached type descriptors from the metadata authority
    pub metadata_ttl_minutes: i64,
}

impl KernelConfig {
    /// Defaults for everything except the database location
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            cache_ttl: Duration::from_secs(3600),
            dispatcher: DispatcherConfig::default(),
            metadata_ttl_minutes: DEFAULT_TTL_MINUTES,
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}
