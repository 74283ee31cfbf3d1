//! Partition metadata: an append-only list of block descriptors
//!
//! Each entry is framed as:
//! - 4 bytes: entry length (excluding this field)
//! - N bytes: bincode encoded [`BlockMeta`]
//! - 4 bytes: CRC32 checksum of the encoded block meta
//!
//! Readers stop at the first truncated or corrupted entry so that a crash
//! while appending never hides the blocks written before it.

use crate::{FlowError, Result, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::warn;

/// Descriptor of one immutable block inside a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Block start timestamp
    pub timestamp: Timestamp,
    /// Number of flows in the block
    pub flow_count: u64,
    /// Bytes sent plus received by all flows in the block
    pub traffic: u64,
}

impl BlockMeta {
    /// Serialize with length prefix and CRC checksum
    pub fn serialize_with_checksum(&self) -> Result<Bytes> {
        let payload = bincode::serialize(self)?;

        let mut buf = BytesMut::with_capacity(payload.len() + 8);
        buf.put_u32_le((payload.len() + 4) as u32);
        buf.put_slice(&payload);
        buf.put_u32_le(crc32fast::hash(&payload));
        Ok(buf.freeze())
    }

    /// Deserialize one entry, returning it with the number of bytes consumed
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(FlowError::InvalidFormat("Entry too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);
        let len = cursor.get_u32_le() as usize;
        if len < 4 {
            return Err(FlowError::Corruption(format!("Invalid entry length {}", len)));
        }
        if data.len() < 4 + len {
            return Err(FlowError::InvalidFormat("Incomplete entry".into()));
        }

        let entry = &data[4..4 + len];
        let (payload, checksum) = entry.split_at(len - 4);
        let expected = std::io::Cursor::new(checksum).get_u32_le();
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(FlowError::ChecksumMismatch { expected, actual });
        }

        let meta: BlockMeta = bincode::deserialize(payload)?;
        Ok((meta, 4 + len))
    }
}

/// Ordered block descriptors of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub blocks: Vec<BlockMeta>,
}

impl Metadata {
    /// Parse metadata, failing on the first damaged entry
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (meta, read) = BlockMeta::deserialize_with_checksum(&data[offset..])?;
            blocks.push(meta);
            offset += read;
        }
        Ok(Self { blocks })
    }

    /// Parse as many entries as possible; returns the intact prefix and
    /// whether anything had to be dropped
    pub fn parse_prefix(data: &[u8]) -> (Self, bool) {
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            match BlockMeta::deserialize_with_checksum(&data[offset..]) {
                Ok((meta, read)) => {
                    blocks.push(meta);
                    offset += read;
                }
                Err(_) => return (Self { blocks }, true),
            }
        }
        (Self { blocks }, false)
    }

    /// Read a metadata file strictly
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    /// Best-effort read: a missing, unreadable or damaged file yields
    /// whatever prefix could be parsed, never an error
    pub fn try_read(path: &Path) -> Self {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Failed to read metadata {:?}: {}", path, e);
                return Self::default();
            }
        };

        let (meta, truncated) = Self::parse_prefix(&data);
        if truncated {
            warn!(
                "Metadata {:?} is damaged, using the first {} intact blocks",
                path,
                meta.blocks.len()
            );
        }
        meta
    }

    /// Append a block descriptor to a metadata file
    pub fn append(path: &Path, block: &BlockMeta) -> Result<()> {
        let entry = block.serialize_with_checksum()?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&entry)?;
        file.sync_all()?;
        Ok(())
    }

    /// Timestamp of the earliest block
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.blocks.iter().map(|b| b.timestamp).min()
    }

    /// Summed flow count and traffic of all blocks
    pub fn totals(&self) -> (u64, u64) {
        self.blocks.iter().fold((0, 0), |(flows, traffic), b| {
            (flows.saturating_add(b.flow_count), traffic.saturating_add(b.traffic))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(ts: Timestamp) -> BlockMeta {
        BlockMeta {
            timestamp: ts,
            flow_count: 10,
            traffic: 1000,
        }
    }

    #[test]
    fn test_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta.bin");

        for ts in [300, 600, 900] {
            Metadata::append(&path, &block(ts)).unwrap();
        }

        let meta = Metadata::read(&path).unwrap();
        assert_eq!(meta.blocks.len(), 3);
        assert_eq!(meta.first_timestamp(), Some(300));
        assert_eq!(meta.totals(), (30, 3000));
    }

    #[test]
    fn test_checksum_validation() {
        let mut data = block(300).serialize_with_checksum().unwrap().to_vec();
        data[6] ^= 0xFF;

        let result = BlockMeta::deserialize_with_checksum(&data);
        assert!(matches!(result, Err(FlowError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_best_effort_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta.bin");
        Metadata::append(&path, &block(300)).unwrap();
        Metadata::append(&path, &block(600)).unwrap();

        // Simulate a crash halfway through a third append
        let mut data = fs::read(&path).unwrap();
        let partial = block(900).serialize_with_checksum().unwrap();
        data.extend_from_slice(&partial[..partial.len() / 2]);
        fs::write(&path, &data).unwrap();

        assert!(Metadata::read(&path).is_err());
        let meta = Metadata::try_read(&path);
        assert_eq!(meta.blocks, vec![block(300), block(600)]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let meta = Metadata::try_read(&temp_dir.path().join("absent"));
        assert!(meta.blocks.is_empty());
        assert_eq!(meta.first_timestamp(), None);
    }
}
