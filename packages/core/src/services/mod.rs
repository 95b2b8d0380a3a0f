//! Business Services
//!
//! This module contains the core service layer:
//!
//! - [`ObjectService`] - the mutation pipeline (create, update, soft delete,
//!   restore, status change)
//! - [`ObjectReader`] - cache-first reads, listings, history, time-travel
//! - [`RelationshipService`] - typed edges with outbox events
//! - [`OutboxDispatcher`] - background drain of the outbox to the bus
//! - [`MetadataService`] - cached type descriptors from the external authority
//! - [`Kernel`] - explicit composition of all of the above; components are
//!   constructed once at startup and wired by value, with no process-wide
//!   singletons

pub mod bus;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod metadata;
pub mod mutator;
pub mod reader;
pub mod relationships;
pub mod versioner;

pub use bus::{BusClient, BusError, CircuitBreaker, LoopbackBus, PublishAck};
pub use cache::{MemoryCache, ObjectCache};
pub use dispatcher::{DispatcherConfig, DispatcherHandle, DispatchStats, OutboxDispatcher};
pub use error::KernelError;
pub use metadata::{MetadataAuthority, MetadataService, StaticAuthority};
pub use mutator::{CreateObject, ObjectService, UpdateObject};
pub use reader::ObjectReader;
pub use relationships::{RelateObjects, RelationshipService};
pub use versioner::Versioner;

use crate::config::KernelConfig;
use crate::db::{DatabaseService, ObjectStore, TursoStore};
use std::sync::Arc;

/// The assembled kernel.
///
/// # Examples
///
/// ```no_run
/// use objectkernel_core::config::KernelConfig;
/// use objectkernel_core::services::{Kernel, LoopbackBus};
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = KernelConfig::new(PathBuf::from("./data/kernel.db"));
///     let kernel = Kernel::open(config, Arc::new(LoopbackBus::new()), None).await?;
///     let _dispatcher = kernel.start_dispatcher();
///     Ok(())
/// }
/// ```
pub struct Kernel {
    pub store: Arc<dyn ObjectStore>,
    pub cache: Arc<dyn ObjectCache>,
    pub bus: Arc<dyn BusClient>,
    pub mutator: ObjectService,
    pub reader: ObjectReader,
    pub relationships: RelationshipService,
    pub metadata: Option<Arc<MetadataService>>,
    pub dispatcher: Arc<OutboxDispatcher>,
}

impl Kernel {
    /// Open the database, apply migrations, and wire the services.
    ///
    /// The bus client and the optional metadata authority are the kernel's
    /// external collaborators and are injected by the embedding process.
    pub async fn open(
        config: KernelConfig,
        bus: Arc<dyn BusClient>,
        authority: Option<Arc<dyn MetadataAuthority>>,
    ) -> Result<Self, KernelError> {
        let db = DatabaseService::new(config.db_path.clone(), config.table_prefix.clone()).await?;
        let store: Arc<dyn ObjectStore> = Arc::new(TursoStore::new(Arc::new(db)));
        let cache: Arc<dyn ObjectCache> = Arc::new(MemoryCache::with_ttl(config.cache_ttl));

        let metadata = authority.map(|authority| {
            Arc::new(
                MetadataService::new(Arc::clone(&store), authority)
                    .with_ttl_minutes(config.metadata_ttl_minutes),
            )
        });

        let mut mutator = ObjectService::new(Arc::clone(&store), Arc::clone(&cache));
        if let Some(metadata) = &metadata {
            mutator = mutator.with_metadata(Arc::clone(metadata));
        }

        let reader = ObjectReader::new(Arc::clone(&store), Arc::clone(&cache));
        let relationships = RelationshipService::new(Arc::clone(&store));
        let dispatcher = Arc::new(OutboxDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            config.dispatcher.clone(),
        ));

        Ok(Self {
            store,
            cache,
            bus,
            mutator,
            reader,
            relationships,
            metadata,
            dispatcher,
        })
    }

    /// Start the background outbox workers
    pub fn start_dispatcher(&self) -> DispatcherHandle {
        Arc::clone(&self.dispatcher).spawn()
    }
}
