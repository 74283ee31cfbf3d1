//! Query engine for FlowDB
//!
//! A query names interfaces, a time range, the columns to group by and an
//! optional filter condition. Execution:
//! - compile the condition into a [`Predicate`]
//! - enumerate candidate blocks from the partition store
//! - scan and reduce them through the [`Pipeline`]
//! - sort, truncate and enrich the rows

pub mod condition;
mod engine;
mod pipeline;
mod postprocess;

pub use condition::{CompareOp, Condition, Predicate};
pub use engine::{InterfaceInfo, QueryEngine};
pub use pipeline::{reduce, scan_block, Aggregate, PartialMap, Pipeline, Reducer, ScanOutcome};
pub use postprocess::{resolve_rows, Direction, PostProcess, ResolveOptions, Row, SortBy};

use crate::config::{DEFAULT_COVERAGE, DEFAULT_MAX_MEM_PCT};
use crate::{Column, Counters, FlowError, GroupBy, InterfaceSelection, Result, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};

// ============================================================================
// Query Arguments
// ============================================================================

/// Parameters of one query
#[derive(Debug, Clone)]
pub struct QueryArgs {
    /// Interfaces to query
    pub ifaces: InterfaceSelection,
    /// Inclusive range of block start timestamps
    pub range: TimeRange,
    /// Columns to group by
    pub group_by: GroupBy,
    /// Filter condition; empty matches everything
    pub condition: String,
    /// Sort metric
    pub sort_by: SortBy,
    /// Direction counted by the sort metric
    pub direction: Direction,
    /// Ascending instead of descending order
    pub ascending: bool,
    /// Row limit; `None` keeps the rows covering 95% of the volume
    pub limit: Option<usize>,
    /// Share of available memory the scan may use (percent)
    pub max_mem_pct: u8,
    /// Reverse lookup of the top rows
    pub resolve: Option<ResolveOptions>,
}

impl QueryArgs {
    /// Query over all time with default ordering
    pub fn new(ifaces: InterfaceSelection, group_by: GroupBy) -> Self {
        Self {
            ifaces,
            range: TimeRange::new(0, Timestamp::MAX),
            group_by,
            condition: String::new(),
            sort_by: SortBy::Bytes,
            direction: Direction::Both,
            ascending: false,
            limit: None,
            max_mem_pct: DEFAULT_MAX_MEM_PCT,
            resolve: None,
        }
    }

    /// Restrict to blocks starting within `[first, last]`
    pub fn with_range(mut self, first: Timestamp, last: Timestamp) -> Self {
        self.range = TimeRange::new(first, last);
        self
    }

    /// Set the filter condition
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Set the sort metric, direction and order
    pub fn with_sort(mut self, sort_by: SortBy, direction: Direction, ascending: bool) -> Self {
        self.sort_by = sort_by;
        self.direction = direction;
        self.ascending = ascending;
        self
    }

    /// Keep at most `limit` rows
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the memory budget percentage
    pub fn with_max_mem_pct(mut self, pct: u8) -> Self {
        self.max_mem_pct = pct;
        self
    }

    /// Enable reverse lookups
    pub fn with_resolve(mut self, options: ResolveOptions) -> Self {
        self.resolve = Some(options);
        self
    }

    /// Reject inconsistent arguments
    pub fn validate(&self) -> Result<()> {
        if self.range.start > self.range.end {
            return Err(FlowError::Validation(format!(
                "Invalid time range: first {} is after last {}",
                self.range.start, self.range.end
            )));
        }
        if self.max_mem_pct == 0 || self.max_mem_pct > 100 {
            return Err(FlowError::Validation(format!(
                "Memory budget must be within 1-100%, got {}",
                self.max_mem_pct
            )));
        }
        if self.limit == Some(0) {
            return Err(FlowError::Validation("Limit must be positive".into()));
        }
        if let Some(resolve) = &self.resolve {
            if resolve.timeout.is_zero() {
                return Err(FlowError::Validation("Resolve timeout must be positive".into()));
            }
        }
        Ok(())
    }

    /// Ordering and truncation settings derived from the arguments
    pub fn post_process(&self) -> PostProcess {
        PostProcess {
            sort_by: self.sort_by,
            direction: self.direction,
            ascending: self.ascending,
            limit: self.limit,
            coverage: DEFAULT_COVERAGE,
        }
    }
}

// ============================================================================
// Query Result Types
// ============================================================================

/// Outcome class of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Rows were found
    Ok,
    /// No flow matched
    Empty,
}

/// Query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Grouped columns
    pub columns: Vec<Column>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Counters summed over all matching flows, including truncated rows
    pub totals: Counters,
    /// Number of rows before truncation
    pub hits_total: usize,
    /// Number of blocks scanned
    pub blocks_scanned: usize,
    pub status: QueryStatus,
    /// Execution time in milliseconds
    pub execution_time_ms: f64,
}

impl QueryResult {
    /// Result of a query that matched nothing
    pub fn empty(columns: Vec<Column>, blocks_scanned: usize, execution_time_ms: f64) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            totals: Counters::default(),
            hits_total: 0,
            blocks_scanned,
            status: QueryStatus::Empty,
            execution_time_ms,
        }
    }

    /// Check if no flow matched
    pub fn is_empty(&self) -> bool {
        self.status == QueryStatus::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> QueryArgs {
        QueryArgs::new(InterfaceSelection::Any, GroupBy::parse("talk_conv").unwrap())
    }

    #[test]
    fn test_validate() {
        assert!(args().validate().is_ok());
        assert!(args().with_range(200, 100).validate().unwrap_err().is_validation());
        assert!(args().with_max_mem_pct(0).validate().is_err());
        assert!(args().with_max_mem_pct(101).validate().is_err());
        assert!(args().with_limit(0).validate().is_err());
    }

    #[test]
    fn test_post_process_settings() {
        let pp = args()
            .with_sort(SortBy::Packets, Direction::In, true)
            .with_limit(5)
            .post_process();
        assert_eq!(pp.sort_by, SortBy::Packets);
        assert_eq!(pp.direction, Direction::In);
        assert!(pp.ascending);
        assert_eq!(pp.limit, Some(5));
    }
}
