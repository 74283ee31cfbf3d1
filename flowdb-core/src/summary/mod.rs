//! Summary ledger - per-interface totals behind a transactional read-modify-write
//!
//! The document lives at `<db>/summary.json`. Every mutation runs through
//! [`SummaryLedger::modify`], which holds an exclusive lock for at most the
//! given timeout and commits the transformed document atomically.

mod lock;

pub use lock::LockFile;

use crate::config::{SUMMARY_FILE_NAME, SUMMARY_LOCK_FILE_NAME};
use crate::storage::BlockMeta;
use crate::{FlowError, Result, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Totals of one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    /// Number of stored flows
    pub flow_count: u64,
    /// Stored traffic in bytes
    pub traffic: u64,
    /// Timestamp of the earliest retained block
    pub begin: Timestamp,
}

/// The persisted summary document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub interfaces: BTreeMap<String, InterfaceSummary>,
}

impl Summary {
    /// Account a freshly written block. Creates the document when absent.
    pub fn append(current: Option<Summary>, iface: &str, block: &BlockMeta) -> Summary {
        let mut summary = current.unwrap_or_default();
        let entry = summary
            .interfaces
            .entry(iface.to_string())
            .or_insert(InterfaceSummary {
                flow_count: 0,
                traffic: 0,
                begin: block.timestamp,
            });
        entry.flow_count = entry.flow_count.saturating_add(block.flow_count);
        entry.traffic = entry.traffic.saturating_add(block.traffic);
        entry.begin = entry.begin.min(block.timestamp);
        summary
    }

    /// Look up an interface entry
    pub fn get(&self, iface: &str) -> Option<&InterfaceSummary> {
        self.interfaces.get(iface)
    }
}

/// Handle to the summary document of one database
#[derive(Debug, Clone)]
pub struct SummaryLedger {
    db_path: PathBuf,
    inner: Arc<Mutex<()>>,
}

impl SummaryLedger {
    /// Create a ledger for the database at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the summary document
    pub fn path(&self) -> PathBuf {
        self.db_path.join(SUMMARY_FILE_NAME)
    }

    fn lock_path(&self) -> PathBuf {
        self.db_path.join(SUMMARY_LOCK_FILE_NAME)
    }

    /// Read the committed summary
    pub fn read(&self) -> Result<Summary> {
        match load(&self.path())? {
            Some(summary) => Ok(summary),
            None => Err(FlowError::NotFound(format!(
                "Summary {:?} does not exist",
                self.path()
            ))),
        }
    }

    /// Apply `transform` to the current summary under the exclusive lock.
    ///
    /// An absent (or unreadable) document is handed to the transform as `None`.
    /// Nothing is written if the transform fails.
    pub fn modify<F>(&self, timeout: Duration, transform: F) -> Result<Summary>
    where
        F: FnOnce(Option<Summary>) -> Result<Summary>,
    {
        let deadline = Instant::now() + timeout;
        let _guard = self
            .inner
            .try_lock_for(timeout)
            .ok_or(FlowError::LockTimeout(timeout))?;
        let _lock = LockFile::acquire(&self.lock_path(), deadline, timeout)?;

        let current = match load(&self.path()) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Discarding unreadable summary {:?}: {}", self.path(), e);
                None
            }
        };

        let updated = transform(current)?;
        self.commit(&updated)?;
        debug!("Committed summary with {} interfaces", updated.interfaces.len());
        Ok(updated)
    }

    /// Replace the document with an empty one
    pub fn reset(&self, timeout: Duration) -> Result<Summary> {
        self.modify(timeout, |_| Ok(Summary::default()))
    }

    fn commit(&self, summary: &Summary) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(summary)?;
        fs::write(&tmp, data)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<Option<Summary>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(ts: Timestamp, flows: u64, traffic: u64) -> BlockMeta {
        BlockMeta {
            timestamp: ts,
            flow_count: flows,
            traffic,
        }
    }

    #[test]
    fn test_append_creates_and_lowers_begin() {
        let summary = Summary::append(None, "eth0", &block(600, 2, 200));
        let summary = Summary::append(Some(summary), "eth0", &block(300, 3, 300));
        let summary = Summary::append(Some(summary), "eth0", &block(900, 1, 100));

        let eth0 = summary.get("eth0").unwrap();
        assert_eq!(eth0.flow_count, 6);
        assert_eq!(eth0.traffic, 600);
        assert_eq!(eth0.begin, 300);
    }

    #[test]
    fn test_modify_persists() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::new(temp_dir.path());
        assert!(matches!(ledger.read(), Err(FlowError::NotFound(_))));

        ledger
            .modify(Duration::from_secs(1), |current| {
                assert!(current.is_none());
                Ok(Summary::append(current, "eth0", &block(300, 5, 500)))
            })
            .unwrap();

        let summary = ledger.read().unwrap();
        assert_eq!(summary.get("eth0").unwrap().flow_count, 5);
        assert!(!temp_dir.path().join(SUMMARY_LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_failed_transform_keeps_document() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::new(temp_dir.path());
        ledger
            .modify(Duration::from_secs(1), |current| {
                Ok(Summary::append(current, "eth0", &block(300, 5, 500)))
            })
            .unwrap();

        let result = ledger.modify(Duration::from_secs(1), |_| {
            Err(FlowError::Validation("rejected".into()))
        });
        assert!(result.is_err());
        assert_eq!(ledger.read().unwrap().get("eth0").unwrap().traffic, 500);
    }

    #[test]
    fn test_lock_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::new(temp_dir.path());
        fs::write(temp_dir.path().join(SUMMARY_LOCK_FILE_NAME), b"other").unwrap();

        let result = ledger.modify(Duration::from_millis(50), |c| Ok(c.unwrap_or_default()));
        assert!(matches!(result, Err(FlowError::LockTimeout(_))));
    }

    #[test]
    fn test_corrupt_document_is_absent() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = SummaryLedger::new(temp_dir.path());
        fs::write(ledger.path(), b"{ not json").unwrap();

        ledger
            .modify(Duration::from_secs(1), |current| {
                assert!(current.is_none());
                Ok(Summary::default())
            })
            .unwrap();
        assert!(ledger.read().unwrap().interfaces.is_empty());
    }
}
