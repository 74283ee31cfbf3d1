//! Storage - partition layout, block codec and the database facade

mod block;
mod engine;
mod metadata;
mod partition;
mod writer;

pub use block::{decode_block, encode_block, BlockHeader, BLOCK_VERSION};
pub use engine::FlowDb;
pub use metadata::{BlockMeta, Metadata};
pub use partition::{
    block_path, parse_partition_name, BlockRef, Partition, PartitionEntry, PartitionStore,
};
pub use writer::BlockWriter;

use std::path::PathBuf;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database root directory
    pub db_path: PathBuf,
    /// Upper bound on waiting for the summary lock
    pub lock_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data"),
            lock_timeout: crate::config::DEFAULT_LOCK_TIMEOUT,
        }
    }
}
