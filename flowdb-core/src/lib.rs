//! FlowDB Core - Time-Partitioned Network Flow Database
//!
//! A Rust-based flow record store and query engine built around:
//! - Day-aligned partitions per capture interface
//! - Immutable, checksummed flow blocks
//! - Parallel scan-and-filter with a single-owner reducer
//!
//! # Architecture
//!
//! - **Partition Store**: `<db>/<iface>/<day>/` directories holding blocks and metadata
//! - **Summary Ledger**: lock-protected per-interface totals document
//! - **Retention**: `clean` and `wipe` maintenance operations
//! - **Query**: condition compiler, fan-out/fan-in aggregation, result post-processing

pub mod meminfo;
pub mod query;
pub mod resolver;
pub mod retention;
pub mod storage;
pub mod summary;
pub mod timeparse;

mod error;
mod types;

pub use error::{FlowError, Result};
pub use types::*;

/// FlowDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    /// Name of the per-partition metadata file
    pub const METADATA_FILE_NAME: &str = "meta.bin";

    /// Name of the summary document in the database root
    pub const SUMMARY_FILE_NAME: &str = "summary.json";

    /// Name of the lock file guarding the summary document
    pub const SUMMARY_LOCK_FILE_NAME: &str = "summary.lock";

    /// Extension of block data files
    pub const BLOCK_FILE_EXTENSION: &str = "blk";

    /// Seconds per partition
    pub const DAY_SECONDS: i64 = 86_400;

    /// Upper bound on waiting for the summary lock
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

    /// Share of total volume kept when no explicit limit is given
    pub const DEFAULT_COVERAGE: f64 = 0.95;

    /// Share of available memory a query may use (percent)
    pub const DEFAULT_MAX_MEM_PCT: u8 = 60;

    /// Rows enriched with reverse DNS lookups
    pub const DEFAULT_RESOLVE_ROWS: usize = 25;

    /// Timeout for a single reverse DNS lookup
    pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Memory accounted per concurrent scan worker (64MB)
    pub const WORKER_MEMORY_ESTIMATE: u64 = 64 * 1024 * 1024;

    /// Physical memory assumed when the platform does not report it (4GB)
    pub const FALLBACK_PHYS_MEM: u64 = 4 * 1024 * 1024 * 1024;
}
