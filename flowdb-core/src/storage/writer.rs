//! Block writer - the append side used by capture

use super::block::encode_block;
use super::metadata::{BlockMeta, Metadata};
use super::partition::{block_path, PartitionStore};
use crate::config::METADATA_FILE_NAME;
use crate::summary::{Summary, SummaryLedger};
use crate::{FlowError, FlowRecord, Result, Timestamp};
use std::fs;
use std::time::Duration;
use tracing::debug;

/// Writes immutable blocks and keeps metadata and summary in step
#[derive(Debug, Clone)]
pub struct BlockWriter {
    store: PartitionStore,
    ledger: SummaryLedger,
    lock_timeout: Duration,
}

impl BlockWriter {
    /// Create a writer over a store and its ledger
    pub fn new(store: PartitionStore, ledger: SummaryLedger, lock_timeout: Duration) -> Self {
        Self {
            store,
            ledger,
            lock_timeout,
        }
    }

    /// Persist one block of flows captured on `iface` starting at `timestamp`.
    ///
    /// The block lands in the partition of its day, its descriptor is appended
    /// to the partition metadata and the summary is incremented.
    pub fn write_block(
        &self,
        iface: &str,
        timestamp: Timestamp,
        records: &[FlowRecord],
    ) -> Result<BlockMeta> {
        if iface.is_empty() || iface.contains(|c: char| c == '/' || c == '\\') || iface == "." || iface == ".." {
            return Err(FlowError::Validation(format!("Invalid interface name {:?}", iface)));
        }

        let partition = self.store.partition_path(iface, timestamp);
        fs::create_dir_all(&partition)?;

        let path = block_path(&partition, timestamp);
        if path.exists() {
            return Err(FlowError::Validation(format!(
                "Block {} already exists on {}",
                timestamp, iface
            )));
        }

        let data = encode_block(records)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, &path)?;

        let meta = BlockMeta {
            timestamp,
            flow_count: records.len() as u64,
            traffic: records
                .iter()
                .fold(0u64, |acc, r| acc.saturating_add(r.counters.total_bytes())),
        };
        Metadata::append(&partition.join(METADATA_FILE_NAME), &meta)?;

        self.ledger
            .modify(self.lock_timeout, |current| Ok(Summary::append(current, iface, &meta)))?;

        debug!(
            "Wrote block {} on {} ({} flows, {} bytes)",
            timestamp, iface, meta.flow_count, meta.traffic
        );
        Ok(meta)
    }
}
