//! Core types for FlowDB

use crate::config::DAY_SECONDS;
use crate::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::ops::AddAssign;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = i64;

/// Align a timestamp to the start of its (UTC) day.
///
/// Saturates at `Timestamp::MIN` when that day starts before it.
pub fn day_timestamp(ts: Timestamp) -> Timestamp {
    ts.checked_sub(ts.rem_euclid(DAY_SECONDS))
        .unwrap_or(Timestamp::MIN)
}

/// Packet and byte counters of a flow (or an aggregate of flows)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counters {
    pub pkts_rcvd: u64,
    pub pkts_sent: u64,
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
}

impl Counters {
    /// Create counters from received/sent values
    pub fn new(pkts_rcvd: u64, pkts_sent: u64, bytes_rcvd: u64, bytes_sent: u64) -> Self {
        Self {
            pkts_rcvd,
            pkts_sent,
            bytes_rcvd,
            bytes_sent,
        }
    }

    /// Received plus sent bytes
    pub fn total_bytes(&self) -> u64 {
        self.bytes_rcvd.wrapping_add(self.bytes_sent)
    }

    /// Received plus sent packets
    pub fn total_packets(&self) -> u64 {
        self.pkts_rcvd.wrapping_add(self.pkts_sent)
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Self) {
        self.pkts_rcvd = self.pkts_rcvd.wrapping_add(other.pkts_rcvd);
        self.pkts_sent = self.pkts_sent.wrapping_add(other.pkts_sent);
        self.bytes_rcvd = self.bytes_rcvd.wrapping_add(other.bytes_rcvd);
        self.bytes_sent = self.bytes_sent.wrapping_add(other.bytes_sent);
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkts_rcvd: {} pkts_sent: {} bytes_rcvd: {} bytes_sent: {}",
            self.pkts_rcvd, self.pkts_sent, self.bytes_rcvd, self.bytes_sent
        )
    }
}

/// A single flow as stored inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub sip: IpAddr,
    pub dip: IpAddr,
    pub dport: u16,
    pub proto: u8,
    pub counters: Counters,
}

impl FlowRecord {
    /// Create a new flow record
    pub fn new(sip: IpAddr, dip: IpAddr, dport: u16, proto: u8, counters: Counters) -> Self {
        Self {
            sip,
            dip,
            dport,
            proto,
            counters,
        }
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{} proto:{} ({})",
            self.sip,
            self.dip,
            self.dport,
            proto_name(self.proto),
            self.counters
        )
    }
}

/// Group-by column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Sip,
    Dip,
    Dport,
    Proto,
    Iface,
    Time,
}

impl Column {
    /// Parse a column name, accepting `src`/`dst` synonyms
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "sip" | "src" => Some(Column::Sip),
            "dip" | "dst" => Some(Column::Dip),
            "dport" => Some(Column::Dport),
            "proto" => Some(Column::Proto),
            "iface" => Some(Column::Iface),
            "time" => Some(Column::Time),
            _ => None,
        }
    }

    /// Canonical column name
    pub fn name(&self) -> &'static str {
        match self {
            Column::Sip => "sip",
            Column::Dip => "dip",
            Column::Dport => "dport",
            Column::Proto => "proto",
            Column::Iface => "iface",
            Column::Time => "time",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Column::Sip => 1,
            Column::Dip => 1 << 1,
            Column::Dport => 1 << 2,
            Column::Proto => 1 << 3,
            Column::Iface => 1 << 4,
            Column::Time => 1 << 5,
        }
    }
}

/// The ordered set of columns a query groups by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy {
    columns: Vec<Column>,
    mask: u8,
}

impl GroupBy {
    /// Build from explicit columns; duplicates are dropped
    pub fn new(columns: impl IntoIterator<Item = Column>) -> Result<Self> {
        let mut ordered = Vec::new();
        let mut mask = 0u8;
        for column in columns {
            if mask & column.bit() == 0 {
                mask |= column.bit();
                ordered.push(column);
            }
        }
        if ordered.is_empty() {
            return Err(FlowError::Validation("At least one column is required".into()));
        }
        Ok(Self {
            columns: ordered,
            mask,
        })
    }

    /// Parse a comma separated column list or a query-type preset
    pub fn parse(spec: &str) -> Result<Self> {
        let preset: Option<&[Column]> = match spec.trim() {
            "talk_src" => Some(&[Column::Sip]),
            "talk_dst" => Some(&[Column::Dip]),
            "talk_conv" => Some(&[Column::Sip, Column::Dip]),
            "apps_port" => Some(&[Column::Dport, Column::Proto]),
            "agg_talk_port" => Some(&[Column::Sip, Column::Dip, Column::Dport, Column::Proto]),
            "raw" => Some(&[
                Column::Time,
                Column::Iface,
                Column::Sip,
                Column::Dip,
                Column::Dport,
                Column::Proto,
            ]),
            _ => None,
        };
        if let Some(columns) = preset {
            return Self::new(columns.iter().copied());
        }

        let columns = spec
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|name| {
                Column::from_name(name)
                    .ok_or_else(|| FlowError::Validation(format!("Unknown column: {}", name.trim())))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    /// Columns in query order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Check whether a column is part of the grouping
    pub fn contains(&self, column: Column) -> bool {
        self.mask & column.bit() != 0
    }

    /// Check if results are bucketed by time
    pub fn has_time(&self) -> bool {
        self.contains(Column::Time)
    }

    /// Project a stored flow onto the group-by key
    pub fn key_for(&self, iface: &str, timestamp: Timestamp, record: &FlowRecord) -> FlowKey {
        FlowKey {
            time: self.contains(Column::Time).then_some(timestamp),
            iface: self.contains(Column::Iface).then(|| iface.to_string()),
            sip: self.contains(Column::Sip).then_some(record.sip),
            dip: self.contains(Column::Dip).then_some(record.dip),
            dport: self.contains(Column::Dport).then_some(record.dport),
            proto: self.contains(Column::Proto).then_some(record.proto),
        }
    }
}

/// Variable-arity group-by key; unselected members stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<u8>,
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Check if any second of the day starting at `day` is in range
    pub fn overlaps_day(&self, day: Timestamp) -> bool {
        self.overlaps(&TimeRange::new(day, day.saturating_add(DAY_SECONDS - 1)))
    }
}

/// Interfaces a query runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceSelection {
    /// Every interface present in the database
    Any,
    /// Explicit interface names
    Named(Vec<String>),
}

impl InterfaceSelection {
    /// Parse `ANY` or a comma separated interface list
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.trim().eq_ignore_ascii_case("any") {
            return Ok(InterfaceSelection::Any);
        }
        let names: Vec<String> = spec
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(FlowError::Validation("No interface specified".into()));
        }
        Ok(InterfaceSelection::Named(names))
    }
}

const PROTOCOLS: &[(&str, u8)] = &[
    ("ICMP", 1),
    ("IGMP", 2),
    ("TCP", 6),
    ("UDP", 17),
    ("GRE", 47),
    ("ESP", 50),
    ("AH", 51),
    ("ICMPv6", 58),
    ("SCTP", 132),
];

/// Resolve a protocol name (case-insensitive) or number
pub fn proto_number(value: &str) -> Option<u8> {
    if let Ok(n) = value.parse::<u8>() {
        return Some(n);
    }
    PROTOCOLS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, n)| *n)
}

/// Human readable protocol name
pub fn proto_name(proto: u8) -> String {
    PROTOCOLS
        .iter()
        .find(|(_, n)| *n == proto)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| proto.to_string())
}
