//! Flow block file format

use crate::{FlowError, FlowRecord, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Block format version
pub const BLOCK_VERSION: u8 = 1;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block format version
    pub version: u8,
    /// Number of flow records
    pub record_count: u32,
    /// Compressed payload size
    pub compressed_size: u32,
    /// Uncompressed payload size
    pub uncompressed_size: u32,
    /// CRC32 of the compressed payload
    pub checksum: u32,
}

impl BlockHeader {
    /// Header size in bytes
    pub const SIZE: usize = 17;

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.version);
        buf.put_u32_le(self.record_count);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_u32_le(self.checksum);
        buf.freeze()
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(FlowError::InvalidFormat("Block header too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);
        Ok(Self {
            version: cursor.get_u8(),
            record_count: cursor.get_u32_le(),
            compressed_size: cursor.get_u32_le(),
            uncompressed_size: cursor.get_u32_le(),
            checksum: cursor.get_u32_le(),
        })
    }
}

/// Encode flow records into a block: header followed by LZ4-compressed bincode
pub fn encode_block(records: &[FlowRecord]) -> Result<Bytes> {
    let raw = bincode::serialize(records)?;
    let compressed = lz4_flex::compress_prepend_size(&raw);

    let header = BlockHeader {
        version: BLOCK_VERSION,
        record_count: records.len() as u32,
        compressed_size: compressed.len() as u32,
        uncompressed_size: raw.len() as u32,
        checksum: crc32fast::hash(&compressed),
    };

    let mut buf = BytesMut::with_capacity(BlockHeader::SIZE + compressed.len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(&compressed);
    Ok(buf.freeze())
}

/// Decode a block, validating version, size and checksum
pub fn decode_block(data: &[u8]) -> Result<Vec<FlowRecord>> {
    let header = BlockHeader::from_bytes(data)?;
    if header.version != BLOCK_VERSION {
        return Err(FlowError::InvalidFormat(format!(
            "Unsupported block version: {}",
            header.version
        )));
    }

    let payload = &data[BlockHeader::SIZE..];
    if payload.len() != header.compressed_size as usize {
        return Err(FlowError::Corruption(format!(
            "Block payload is {} bytes, header says {}",
            payload.len(),
            header.compressed_size
        )));
    }

    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(FlowError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let raw = lz4_flex::decompress_size_prepended(payload)
        .map_err(|e| FlowError::Compression(e.to_string()))?;
    let records: Vec<FlowRecord> = bincode::deserialize(&raw)?;

    if records.len() != header.record_count as usize {
        return Err(FlowError::Corruption(format!(
            "Block holds {} records, header says {}",
            records.len(),
            header.record_count
        )));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Counters;

    fn sample_records() -> Vec<FlowRecord> {
        (0..50)
            .map(|i| {
                FlowRecord::new(
                    format!("10.0.0.{}", i).parse().unwrap(),
                    "192.168.1.1".parse().unwrap(),
                    443,
                    6,
                    Counters::new(i, i, i * 100, i * 100),
                )
            })
            .collect()
    }

    #[test]
    fn test_block_roundtrip() {
        let records = sample_records();
        let data = encode_block(&records).unwrap();
        let header = BlockHeader::from_bytes(&data).unwrap();
        assert_eq!(header.record_count, 50);

        let decoded = decode_block(&data).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_block_checksum_validation() {
        let mut data = encode_block(&sample_records()).unwrap().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let result = decode_block(&data);
        assert!(matches!(result, Err(FlowError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_block_truncated() {
        let data = encode_block(&sample_records()).unwrap();
        assert!(decode_block(&data[..10]).is_err());
        assert!(decode_block(&data[..data.len() - 5]).unwrap_err().is_corruption());
    }
}
