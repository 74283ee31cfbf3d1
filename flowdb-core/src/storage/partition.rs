//! Partition store - read and delete primitives over the database layout
//!
//! `<db>/<iface>/<day>/` where `<day>` is the decimal string of a
//! day-aligned Unix timestamp. Each partition directory holds the block
//! files and one metadata file.

use super::block::decode_block;
use super::metadata::{BlockMeta, Metadata};
use crate::config::{BLOCK_FILE_EXTENSION, METADATA_FILE_NAME};
use crate::{day_timestamp, FlowError, FlowRecord, InterfaceSelection, Result, TimeRange, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Parse a partition directory name.
///
/// Only names that are the exact decimal rendering of the parsed integer are
/// accepted, so `"007"` or `"+86400"` are treated as foreign.
pub fn parse_partition_name(name: &str) -> Option<Timestamp> {
    let ts = name.parse::<Timestamp>().ok()?;
    (ts.to_string() == name).then_some(ts)
}

/// A partition directory with a valid timestamp name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Day-aligned timestamp taken from the directory name
    pub timestamp: Timestamp,
    /// Directory path
    pub path: PathBuf,
}

impl Partition {
    /// Path of the partition's metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE_NAME)
    }
}

/// Classification of a child entry of an interface directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionEntry {
    /// A plain file (or anything that is not a directory)
    NotDirectory(PathBuf),
    /// A directory not created by FlowDB
    Foreign(PathBuf),
    /// A partition directory
    Partition(Partition),
}

/// Reference to one block scheduled for scanning
#[derive(Debug, Clone)]
pub struct BlockRef {
    /// Interface the block was captured on
    pub iface: Arc<str>,
    /// Partition directory holding the block
    pub partition: PathBuf,
    /// Block descriptor from the partition metadata
    pub meta: BlockMeta,
}

impl BlockRef {
    /// Path of the block data file
    pub fn path(&self) -> PathBuf {
        block_path(&self.partition, self.meta.timestamp)
    }
}

/// Path of a block file within a partition directory
pub fn block_path(partition: &Path, timestamp: Timestamp) -> PathBuf {
    partition.join(format!("{}.{}", timestamp, BLOCK_FILE_EXTENSION))
}

/// Read access to the on-disk partition layout
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: PathBuf,
}

impl PartitionStore {
    /// Create a store rooted at the database directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Database root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Verify that the database directory exists
    pub fn check_exists(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(FlowError::Validation("Database path must not be empty".into()));
        }
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(FlowError::NotFound(format!(
                "Database path {:?} is not a directory",
                self.root
            ))),
            Err(_) => Err(FlowError::NotFound(format!(
                "Database not found at {:?}",
                self.root
            ))),
        }
    }

    /// Directory of an interface
    pub fn interface_path(&self, iface: &str) -> PathBuf {
        self.root.join(iface)
    }

    /// Directory of an interface's partition for the given day
    pub fn partition_path(&self, iface: &str, day: Timestamp) -> PathBuf {
        self.interface_path(iface).join(day_timestamp(day).to_string())
    }

    /// List interface directories, sorted by name
    pub fn list_interfaces(&self) -> Result<Vec<String>> {
        let mut ifaces = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ifaces.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ifaces.sort();
        Ok(ifaces)
    }

    /// Classify every child entry of an interface directory
    pub fn list_entries(&self, iface: &str) -> Result<Vec<PartitionEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.interface_path(iface))? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_dir() {
                entries.push(PartitionEntry::NotDirectory(path));
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            match parse_partition_name(&name) {
                Some(timestamp) => entries.push(PartitionEntry::Partition(Partition { timestamp, path })),
                None => entries.push(PartitionEntry::Foreign(path)),
            }
        }
        entries.sort_by(|a, b| entry_sort_key(a).cmp(&entry_sort_key(b)));
        Ok(entries)
    }

    /// List the partitions of an interface, oldest first
    pub fn list_partitions(&self, iface: &str) -> Result<Vec<Partition>> {
        let mut partitions: Vec<Partition> = self
            .list_entries(iface)?
            .into_iter()
            .filter_map(|entry| match entry {
                PartitionEntry::Partition(p) => Some(p),
                _ => None,
            })
            .collect();
        partitions.sort_by_key(|p| p.timestamp);
        Ok(partitions)
    }

    /// Best-effort metadata read; damage yields the intact prefix
    pub fn read_metadata(&self, partition: &Path) -> Metadata {
        Metadata::try_read(&partition.join(METADATA_FILE_NAME))
    }

    /// Remove a partition directory with all its blocks
    pub fn delete_partition(&self, partition: &Path) -> Result<()> {
        fs::remove_dir_all(partition)?;
        debug!("Removed partition {:?}", partition);
        Ok(())
    }

    /// Remove an interface directory entirely
    pub fn delete_interface(&self, iface: &str) -> Result<()> {
        fs::remove_dir_all(self.interface_path(iface))?;
        info!("Removed interface directory {}", iface);
        Ok(())
    }

    /// Collect the blocks of the selected interfaces whose start falls in range
    pub fn blocks_in_range(
        &self,
        selection: &InterfaceSelection,
        range: TimeRange,
    ) -> Result<Vec<BlockRef>> {
        let ifaces = match selection {
            InterfaceSelection::Any => self.list_interfaces()?,
            InterfaceSelection::Named(names) => {
                for name in names {
                    if !self.interface_path(name).is_dir() {
                        return Err(FlowError::NotFound(format!("Interface {} not in database", name)));
                    }
                }
                names.clone()
            }
        };

        let mut blocks = Vec::new();
        for iface in ifaces {
            let iface_name: Arc<str> = Arc::from(iface.as_str());
            for partition in self.list_partitions(&iface)? {
                if !range.overlaps_day(partition.timestamp) {
                    continue;
                }
                let meta = self.read_metadata(&partition.path);
                blocks.extend(
                    meta.blocks
                        .into_iter()
                        .filter(|b| range.contains(b.timestamp))
                        .map(|b| BlockRef {
                            iface: iface_name.clone(),
                            partition: partition.path.clone(),
                            meta: b,
                        }),
                );
            }
        }

        debug!("Selected {} blocks in {:?}", blocks.len(), range);
        Ok(blocks)
    }

    /// Read and decode the flow records of a block
    pub fn read_block(&self, block: &BlockRef) -> Result<Vec<FlowRecord>> {
        let data = fs::read(block.path())?;
        decode_block(&data)
    }
}

fn entry_sort_key(entry: &PartitionEntry) -> (u8, Timestamp, &Path) {
    match entry {
        PartitionEntry::Partition(p) => (0, p.timestamp, p.path.as_path()),
        PartitionEntry::Foreign(path) => (1, 0, path.as_path()),
        PartitionEntry::NotDirectory(path) => (2, 0, path.as_path()),
    }
}
