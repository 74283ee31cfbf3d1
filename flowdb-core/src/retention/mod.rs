//! Retention - removal of stale partitions and full database wipes

use crate::storage::{PartitionEntry, PartitionStore};
use crate::summary::{Summary, SummaryLedger};
use crate::{day_timestamp, FlowError, Result, Timestamp};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What is left of an interface directory after cleaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceState {
    /// Every child was a stale partition; the directory was removed
    AllStale,
    /// Retained partitions, foreign entries or plain files remain
    HasForeignOrRetained,
}

/// Outcome of cleaning one interface directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceCleanResult {
    /// Flows in the removed partitions
    pub delta_flow_count: u64,
    /// Traffic in the removed partitions
    pub delta_traffic: u64,
    /// Earliest block timestamp among retained partitions
    pub new_begin: Option<Timestamp>,
    /// Directory state after cleaning
    pub state: IfaceState,
    /// Number of partitions deleted
    pub partitions_removed: usize,
}

impl IfaceCleanResult {
    /// The interface holds no retained flow data anymore
    pub fn is_gone(&self) -> bool {
        self.new_begin.is_none()
    }
}

/// Per-interface outcomes of a clean run
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub interfaces: BTreeMap<String, IfaceCleanResult>,
}

impl CleanReport {
    /// Total number of deleted partitions
    pub fn partitions_removed(&self) -> usize {
        self.interfaces.values().map(|r| r.partitions_removed).sum()
    }

    /// Interfaces whose summary entry was dropped
    pub fn gone(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .filter(|(_, r)| r.is_gone())
            .map(|(name, _)| name.as_str())
    }
}

/// Retention manager
#[derive(Debug, Clone)]
pub struct Retention {
    store: PartitionStore,
    ledger: SummaryLedger,
    lock_timeout: Duration,
}

impl Retention {
    /// Create a retention manager over a store and its ledger
    pub fn new(store: PartitionStore, ledger: SummaryLedger, lock_timeout: Duration) -> Self {
        Self {
            store,
            ledger,
            lock_timeout,
        }
    }

    /// Remove every partition that cannot hold flows recorded at `cutoff`
    /// or later, then reconcile the summary in one transaction.
    ///
    /// Deletions happen one by one; the first failure aborts and leaves the
    /// summary untouched.
    pub fn clean(&self, cutoff: Timestamp) -> Result<CleanReport> {
        let now = Utc::now().timestamp();
        if cutoff >= now {
            return Err(FlowError::Validation(format!(
                "Only database entries from the past can be cleaned (cutoff {} >= now {})",
                cutoff, now
            )));
        }
        self.store.check_exists()?;

        let mut report = CleanReport::default();
        for iface in self.store.list_interfaces()? {
            let result = self.clean_interface(&iface, cutoff)?;
            report.interfaces.insert(iface, result);
        }

        self.ledger.modify(self.lock_timeout, |current| {
            let mut summary = current
                .ok_or_else(|| FlowError::NotFound("Cannot update summary: summary missing".into()))?;
            reconcile(&mut summary, &report);
            Ok(summary)
        })?;

        info!(
            "Cleaned database before {}: {} partitions removed, {} interfaces gone",
            cutoff,
            report.partitions_removed(),
            report.gone().count()
        );
        Ok(report)
    }

    fn clean_interface(&self, iface: &str, cutoff: Timestamp) -> Result<IfaceCleanResult> {
        let day_cutoff = day_timestamp(cutoff);
        let mut result = IfaceCleanResult {
            delta_flow_count: 0,
            delta_traffic: 0,
            new_begin: None,
            state: IfaceState::AllStale,
            partitions_removed: 0,
        };

        for entry in self.store.list_entries(iface)? {
            let partition = match entry {
                PartitionEntry::NotDirectory(_) => {
                    result.state = IfaceState::HasForeignOrRetained;
                    continue;
                }
                PartitionEntry::Foreign(path) => {
                    debug!("Leaving foreign directory {:?} untouched", path);
                    result.state = IfaceState::HasForeignOrRetained;
                    continue;
                }
                PartitionEntry::Partition(p) => p,
            };

            let meta = self.store.read_metadata(&partition.path);
            if partition.timestamp < day_cutoff {
                self.store.delete_partition(&partition.path)?;
                let (flows, traffic) = meta.totals();
                result.delta_flow_count = result.delta_flow_count.saturating_add(flows);
                result.delta_traffic = result.delta_traffic.saturating_add(traffic);
                result.partitions_removed += 1;
            } else {
                result.state = IfaceState::HasForeignOrRetained;
                if let Some(first) = meta.first_timestamp() {
                    result.new_begin = Some(result.new_begin.map_or(first, |b| b.min(first)));
                }
            }
        }

        if result.state == IfaceState::AllStale {
            self.store.delete_interface(iface)?;
        }
        if result.partitions_removed > 0 {
            info!(
                "Removed {} partitions of {} ({} flows, {} bytes)",
                result.partitions_removed, iface, result.delta_flow_count, result.delta_traffic
            );
        }
        Ok(result)
    }

    /// Delete every directory directly under the database root.
    /// Plain files, including the summary, are kept.
    pub fn wipe(&self) -> Result<usize> {
        self.store.check_exists()?;

        let mut removed = 0;
        for entry in fs::read_dir(self.store.root())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        info!("Wiped {} directories from {:?}", removed, self.store.root());
        Ok(removed)
    }
}

fn reconcile(summary: &mut Summary, report: &CleanReport) {
    for (iface, change) in &report.interfaces {
        match change.new_begin {
            None => {
                summary.interfaces.remove(iface);
            }
            Some(begin) => match summary.interfaces.get_mut(iface) {
                Some(entry) => {
                    entry.flow_count = entry.flow_count.saturating_sub(change.delta_flow_count);
                    entry.traffic = entry.traffic.saturating_sub(change.delta_traffic);
                    entry.begin = begin;
                }
                None => warn!("Interface {} has no summary entry, skipping", iface),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlockWriter;
    use crate::{Counters, FlowRecord};
    use tempfile::TempDir;

    const DAY: Timestamp = 86_400;

    fn setup() -> (TempDir, BlockWriter, Retention) {
        let temp_dir = TempDir::new().unwrap();
        let store = PartitionStore::new(temp_dir.path());
        let ledger = SummaryLedger::new(temp_dir.path());
        let timeout = Duration::from_secs(1);
        let writer = BlockWriter::new(store.clone(), ledger.clone(), timeout);
        let retention = Retention::new(store, ledger, timeout);
        (temp_dir, writer, retention)
    }

    fn flow() -> FlowRecord {
        FlowRecord::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            53,
            17,
            Counters::new(1, 1, 50, 50),
        )
    }

    #[test]
    fn test_future_cutoff_rejected() {
        let (_dir, _writer, retention) = setup();
        let future = Utc::now().timestamp() + 3600;
        assert!(retention.clean(future).unwrap_err().is_validation());
    }

    #[test]
    fn test_missing_summary_fails() {
        let (dir, _writer, retention) = setup();
        fs::create_dir_all(dir.path().join("eth0").join("86400")).unwrap();
        let result = retention.clean(3 * DAY);
        assert!(matches!(result, Err(FlowError::NotFound(_))));
    }

    #[test]
    fn test_partial_clean_updates_summary() {
        let (dir, writer, retention) = setup();
        writer.write_block("eth0", DAY + 60, &[flow(), flow()]).unwrap();
        writer.write_block("eth0", 3 * DAY + 60, &[flow()]).unwrap();
        writer.write_block("eth0", 3 * DAY + 30, &[flow()]).unwrap();

        let report = retention.clean(2 * DAY + 10).unwrap();
        let eth0 = report.interfaces["eth0"];
        assert_eq!(eth0.partitions_removed, 1);
        assert_eq!(eth0.delta_flow_count, 2);
        assert_eq!(eth0.new_begin, Some(3 * DAY + 30));
        assert_eq!(eth0.state, IfaceState::HasForeignOrRetained);

        let summary = SummaryLedger::new(dir.path()).read().unwrap();
        let entry = summary.get("eth0").unwrap();
        assert_eq!(entry.flow_count, 2);
        assert_eq!(entry.traffic, 200);
        assert_eq!(entry.begin, 3 * DAY + 30);
    }

    #[test]
    fn test_cutoff_is_day_aligned() {
        let (dir, writer, retention) = setup();
        writer.write_block("eth0", DAY + 60, &[flow()]).unwrap();

        // Same day as the partition: nothing may be removed
        let report = retention.clean(DAY + 7200).unwrap();
        assert_eq!(report.partitions_removed(), 0);
        assert!(dir.path().join("eth0").join(DAY.to_string()).exists());
    }

    #[test]
    fn test_plain_file_keeps_interface() {
        let (dir, writer, retention) = setup();
        writer.write_block("eth0", DAY, &[flow()]).unwrap();
        fs::write(dir.path().join("eth0").join("README"), b"x").unwrap();

        let report = retention.clean(2 * DAY).unwrap();
        let eth0 = report.interfaces["eth0"];
        assert!(eth0.is_gone());
        assert_eq!(eth0.state, IfaceState::HasForeignOrRetained);
        assert!(dir.path().join("eth0").join("README").exists());

        let summary = SummaryLedger::new(dir.path()).read().unwrap();
        assert!(summary.get("eth0").is_none());
    }

    #[test]
    fn test_wipe_keeps_files() {
        let (dir, writer, retention) = setup();
        writer.write_block("eth0", DAY, &[flow()]).unwrap();
        writer.write_block("eth1", DAY, &[flow()]).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(retention.wipe().unwrap(), 2);
        assert!(!dir.path().join("eth0").exists());
        assert!(!dir.path().join("eth1").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join(crate::config::SUMMARY_FILE_NAME).exists());
    }
}
