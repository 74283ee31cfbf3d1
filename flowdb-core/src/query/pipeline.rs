//! Fan-out/fan-in aggregation
//!
//! One scan task per block runs on the blocking pool, bounded by a semaphore
//! sized from the memory budget. Every task sends a tagged outcome over a
//! single channel; the reducer owns the final map and stops at the first
//! failure, cancelling all tasks that have not started scanning yet.

use super::condition::Predicate;
use crate::config::WORKER_MEMORY_ESTIMATE;
use crate::meminfo::memory_budget;
use crate::storage::{BlockRef, PartitionStore};
use crate::{Counters, FlowError, FlowKey, GroupBy, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Partial group-by result of one scan task
pub type PartialMap = HashMap<FlowKey, Counters>;

/// Message sent from a scan task to the reducer
pub type ScanOutcome = std::result::Result<PartialMap, String>;

/// Final aggregation result
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub map: HashMap<FlowKey, Counters>,
    pub totals: Counters,
}

/// Merges partial maps; merge order does not affect the result
#[derive(Debug, Default)]
pub struct Reducer {
    map: HashMap<FlowKey, Counters>,
    totals: Counters,
    merged: usize,
}

impl Reducer {
    /// Create an empty reducer
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one partial result into the running state
    pub fn merge(&mut self, partial: PartialMap) {
        for (key, counters) in partial {
            self.totals += counters;
            *self.map.entry(key).or_default() += counters;
        }
        self.merged += 1;
    }

    /// Number of partials merged so far
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Finish aggregation; an empty map means no flow matched
    pub fn finish(self) -> Result<Aggregate> {
        if self.map.is_empty() {
            return Err(FlowError::NoResults);
        }
        Ok(Aggregate {
            map: self.map,
            totals: self.totals,
        })
    }
}

/// Drain the channel until every sender is gone or a task reports failure
pub async fn reduce(
    mut rx: mpsc::Receiver<ScanOutcome>,
    cancel: CancellationToken,
) -> Result<Aggregate> {
    let mut reducer = Reducer::new();
    while let Some(outcome) = rx.recv().await {
        match outcome {
            Ok(partial) => reducer.merge(partial),
            Err(reason) => {
                cancel.cancel();
                return Err(FlowError::InternalProcessing(reason));
            }
        }
    }
    debug!("Reduced {} partial results", reducer.merged());
    reducer.finish()
}

/// Bounded scan worker pool
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    workers: usize,
}

impl Pipeline {
    /// Pool with a fixed number of concurrent scans
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Pool sized from a percentage of available memory, capped by the CPU count
    pub fn from_memory_budget(max_mem_pct: u8) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let by_memory = (memory_budget(max_mem_pct) / WORKER_MEMORY_ESTIMATE) as usize;
        Self::new(by_memory.clamp(1, cpus))
    }

    /// Number of concurrent scans
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `scan` over every task and reduce the partial results
    pub async fn run<T, F>(&self, tasks: Vec<T>, scan: F) -> Result<Aggregate>
    where
        T: Send + 'static,
        F: Fn(T) -> Result<PartialMap> + Send + Sync + 'static,
    {
        let scan = Arc::new(scan);
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.workers));
        let (tx, rx) = mpsc::channel::<ScanOutcome>(self.workers);

        let reducer = tokio::spawn(reduce(rx, cancel.clone()));

        for task in tasks {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let permits = permits.clone();
            let scan = scan.clone();

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                if cancel.is_cancelled() {
                    return;
                }

                let outcome = match tokio::task::spawn_blocking(move || scan(task)).await {
                    Ok(Ok(partial)) => Ok(partial),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("Scan worker aborted: {}", e)),
                };
                // The reducer may already have stopped after a failure
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        reducer
            .await
            .map_err(|e| FlowError::InternalProcessing(format!("Reducer aborted: {}", e)))?
    }
}

/// Scan one block: decode, filter and group its flows
pub fn scan_block(
    store: &PartitionStore,
    block: &BlockRef,
    predicate: &Predicate,
    group_by: &GroupBy,
) -> Result<PartialMap> {
    let records = store.read_block(block)?;
    let mut partial = PartialMap::new();
    let mut matched = 0;
    for record in records.iter().filter(|r| predicate.matches(r)) {
        let key = group_by.key_for(&block.iface, block.meta.timestamp, record);
        *partial.entry(key).or_default() += record.counters;
        matched += 1;
    }
    debug!(
        "Scanned block {} of {}: {} of {} flows grouped into {} keys",
        block.meta.timestamp,
        block.iface,
        matched,
        records.len(),
        partial.len()
    );
    Ok(partial)
}
