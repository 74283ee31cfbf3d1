//! Query engine - ties compiler, store, pipeline and post-processing together

use super::condition::Condition;
use super::pipeline::{scan_block, Pipeline};
use super::postprocess::resolve_rows;
use super::{QueryArgs, QueryResult, QueryStatus};
use crate::resolver::{Resolver, SystemResolver};
use crate::storage::{BlockRef, PartitionStore};
use crate::summary::SummaryLedger;
use crate::{FlowError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Summary totals of one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub flow_count: u64,
    pub traffic: u64,
    pub begin: Timestamp,
}

/// Executes queries against one database
#[derive(Clone)]
pub struct QueryEngine {
    store: PartitionStore,
    ledger: SummaryLedger,
    resolver: Arc<dyn Resolver>,
}

impl QueryEngine {
    /// Create an engine using the system resolver
    pub fn new(store: PartitionStore, ledger: SummaryLedger) -> Self {
        Self {
            store,
            ledger,
            resolver: Arc::new(SystemResolver::new()),
        }
    }

    /// Replace the resolver used for hostnames in conditions and result enrichment
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Execute a query.
    ///
    /// A query that matches nothing yields an empty result with
    /// [`QueryStatus::Empty`]; every other failure is returned as an error.
    pub async fn run(&self, args: &QueryArgs) -> Result<QueryResult> {
        let start = Instant::now();
        self.store.check_exists()?;
        args.validate()?;

        // Hostname lookups block
        let condition = args.condition.clone();
        let resolver = self.resolver.clone();
        let predicate = tokio::task::spawn_blocking(move || {
            Condition::compile(&condition, resolver.as_ref())
        })
        .await
        .map_err(|e| FlowError::InternalProcessing(format!("Condition compiler aborted: {}", e)))??;
        debug!("Compiled condition {:?} into {:?}", args.condition, predicate);

        let blocks = self.store.blocks_in_range(&args.ifaces, args.range)?;
        let blocks_scanned = blocks.len();
        let pipeline = Pipeline::from_memory_budget(args.max_mem_pct);
        debug!(
            "Scanning {} blocks with {} workers",
            blocks_scanned,
            pipeline.workers()
        );

        let store = self.store.clone();
        let group_by = args.group_by.clone();
        let scan = move |block: BlockRef| scan_block(&store, &block, &predicate, &group_by);
        let aggregate = match pipeline.run(blocks, scan).await {
            Ok(aggregate) => aggregate,
            Err(FlowError::NoResults) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                info!("Query matched no flows in {} blocks", blocks_scanned);
                return Ok(QueryResult::empty(
                    args.group_by.columns().to_vec(),
                    blocks_scanned,
                    elapsed,
                ));
            }
            Err(e) => return Err(e),
        };

        let totals = aggregate.totals;
        let hits_total = aggregate.map.len();
        let mut rows = args.post_process().apply(aggregate, args.group_by.has_time());
        if let Some(options) = args.resolve {
            resolve_rows(&mut rows, self.resolver.clone(), options).await;
        }

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Query returned {} of {} rows from {} blocks in {:.2}ms",
            rows.len(),
            hits_total,
            blocks_scanned,
            execution_time_ms
        );

        Ok(QueryResult {
            columns: args.group_by.columns().to_vec(),
            rows,
            totals,
            hits_total,
            blocks_scanned,
            status: QueryStatus::Ok,
            execution_time_ms,
        })
    }

    /// Interfaces known to the summary, sorted by name
    pub fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        self.store.check_exists()?;
        let summary = self.ledger.read()?;
        Ok(summary
            .interfaces
            .into_iter()
            .map(|(name, s)| InterfaceInfo {
                name,
                flow_count: s.flow_count,
                traffic: s.traffic,
                begin: s.begin,
            })
            .collect())
    }
}
