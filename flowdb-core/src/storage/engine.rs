//! Database facade - top-level coordinator

use super::{BlockWriter, PartitionStore, StorageConfig};
use crate::query::{InterfaceInfo, QueryArgs, QueryEngine, QueryResult};
use crate::resolver::{Resolver, SystemResolver};
use crate::retention::{CleanReport, Retention};
use crate::summary::SummaryLedger;
use crate::{Result, Timestamp};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle to one flow database
#[derive(Clone)]
pub struct FlowDb {
    config: StorageConfig,
    store: PartitionStore,
    ledger: SummaryLedger,
    resolver: Arc<dyn Resolver>,
}

impl FlowDb {
    /// Open an existing database; a missing root is an error
    pub fn open(config: StorageConfig) -> Result<Self> {
        let db = Self::handle(config);
        db.store.check_exists()?;
        info!("Opened flow database at {:?}", db.path());
        Ok(db)
    }

    /// Open a database, creating its root directory if needed
    pub fn create(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.db_path)?;
        let db = Self::handle(config);
        info!("Created flow database at {:?}", db.path());
        Ok(db)
    }

    fn handle(config: StorageConfig) -> Self {
        Self {
            store: PartitionStore::new(&config.db_path),
            ledger: SummaryLedger::new(&config.db_path),
            resolver: Arc::new(SystemResolver::new()),
            config,
        }
    }

    /// Use `resolver` for hostnames in conditions and result enrichment
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn path(&self) -> &Path {
        self.store.root()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    pub fn ledger(&self) -> &SummaryLedger {
        &self.ledger
    }

    /// Writer appending blocks to this database
    pub fn writer(&self) -> BlockWriter {
        BlockWriter::new(self.store.clone(), self.ledger.clone(), self.config.lock_timeout)
    }

    /// Retention manager of this database
    pub fn retention(&self) -> Retention {
        Retention::new(self.store.clone(), self.ledger.clone(), self.config.lock_timeout)
    }

    /// Query engine of this database
    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(self.store.clone(), self.ledger.clone()).with_resolver(self.resolver.clone())
    }

    /// Remove partitions older than the day of `cutoff`
    pub fn clean(&self, cutoff: Timestamp) -> Result<CleanReport> {
        self.retention().clean(cutoff)
    }

    /// Remove all interface data and reset the summary to empty
    pub fn wipe(&self) -> Result<usize> {
        let removed = self.retention().wipe()?;
        self.ledger.reset(self.config.lock_timeout)?;
        Ok(removed)
    }

    /// Execute a query
    pub async fn query(&self, args: &QueryArgs) -> Result<QueryResult> {
        self.query_engine().run(args).await
    }

    /// Interfaces known to the summary
    pub fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        self.query_engine().list_interfaces()
    }
}

impl std::fmt::Debug for FlowDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDb")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
