//! Result post-processing: ordering, truncation and hostname enrichment

use super::pipeline::Aggregate;
use crate::resolver::Resolver;
use crate::{Counters, FlowKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Metric results are ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Bytes,
    Packets,
    Time,
}

impl SortBy {
    /// Parse `bytes`, `packets` or `time`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bytes" => Some(SortBy::Bytes),
            "packets" => Some(SortBy::Packets),
            "time" => Some(SortBy::Time),
            _ => None,
        }
    }
}

/// Traffic direction the sort metric counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received only
    In,
    /// Sent only
    Out,
    /// Received plus sent
    #[default]
    Both,
}

/// One output row: the group-by values and their counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(flatten)]
    pub key: FlowKey,
    #[serde(flatten)]
    pub counters: Counters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dip_name: Option<String>,
}

/// Ordering and truncation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcess {
    pub sort_by: SortBy,
    pub direction: Direction,
    pub ascending: bool,
    /// Explicit row limit; `None` keeps the rows covering `coverage` of the volume
    pub limit: Option<usize>,
    pub coverage: f64,
}

impl Default for PostProcess {
    fn default() -> Self {
        Self {
            sort_by: SortBy::Bytes,
            direction: Direction::Both,
            ascending: false,
            limit: None,
            coverage: crate::config::DEFAULT_COVERAGE,
        }
    }
}

impl PostProcess {
    /// Value of the sort metric for a row's counters
    pub fn metric(&self, counters: &Counters) -> u64 {
        match (self.sort_by, self.direction) {
            (SortBy::Packets, Direction::In) => counters.pkts_rcvd,
            (SortBy::Packets, Direction::Out) => counters.pkts_sent,
            (SortBy::Packets, Direction::Both) => counters.total_packets(),
            (_, Direction::In) => counters.bytes_rcvd,
            (_, Direction::Out) => counters.bytes_sent,
            (_, Direction::Both) => counters.total_bytes(),
        }
    }

    /// Sort and truncate an aggregate. Returns the kept rows.
    ///
    /// Time-bucketed results are always ordered by key, oldest first, and
    /// are never truncated, not even by an explicit limit.
    pub fn apply(&self, aggregate: Aggregate, time_grouped: bool) -> Vec<Row> {
        let mut rows: Vec<Row> = aggregate
            .map
            .into_iter()
            .map(|(key, counters)| Row {
                key,
                counters,
                sip_name: None,
                dip_name: None,
            })
            .collect();

        let by_key = time_grouped || self.sort_by == SortBy::Time;
        if by_key {
            rows.sort_by(|a, b| a.key.cmp(&b.key));
            if !time_grouped && !self.ascending {
                rows.reverse();
            }
        } else {
            rows.sort_by(|a, b| {
                let order = self.metric(&a.counters).cmp(&self.metric(&b.counters));
                let order = if self.ascending { order } else { order.reverse() };
                order.then_with(|| a.key.cmp(&b.key))
            });
        }

        if time_grouped {
            return rows;
        }
        match self.limit {
            Some(limit) => rows.truncate(limit),
            None if by_key => {}
            None if self.ascending => {
                // Cut on the largest rows, then restore ascending order
                rows.reverse();
                let keep = self.coverage_prefix(&rows);
                rows.truncate(keep);
                rows.reverse();
            }
            None => {
                let keep = self.coverage_prefix(&rows);
                rows.truncate(keep);
            }
        }
        rows
    }

    /// Length of the shortest prefix whose metric reaches the coverage share
    fn coverage_prefix(&self, rows: &[Row]) -> usize {
        let total: u128 = rows.iter().map(|r| u128::from(self.metric(&r.counters))).sum();
        if total == 0 {
            return rows.len();
        }
        let threshold = total as f64 * self.coverage.clamp(0.0, 1.0);

        let mut sum: u128 = 0;
        for (i, row) in rows.iter().enumerate() {
            sum += u128::from(self.metric(&row.counters));
            if sum as f64 >= threshold {
                return i + 1;
            }
        }
        rows.len()
    }
}

/// Reverse lookup settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Number of top rows to enrich
    pub rows: usize,
    /// Bound on a single lookup
    pub timeout: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            rows: crate::config::DEFAULT_RESOLVE_ROWS,
            timeout: crate::config::DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

/// Attach hostnames to the addresses of the first `options.rows` rows.
///
/// Lookups run concurrently; one that fails or times out leaves the raw
/// address in place.
pub async fn resolve_rows(rows: &mut [Row], resolver: Arc<dyn Resolver>, options: ResolveOptions) {
    let limit = options.rows.min(rows.len());
    let mut addrs: Vec<IpAddr> = rows[..limit]
        .iter()
        .flat_map(|r| [r.key.sip, r.key.dip])
        .flatten()
        .collect();
    addrs.sort();
    addrs.dedup();
    if addrs.is_empty() {
        return;
    }

    let mut lookups = JoinSet::new();
    for addr in addrs {
        let resolver = resolver.clone();
        let timeout = options.timeout;
        lookups.spawn(async move {
            let lookup = tokio::task::spawn_blocking(move || resolver.reverse(addr));
            match tokio::time::timeout(timeout, lookup).await {
                Ok(Ok(name)) => (addr, name),
                Ok(Err(e)) => {
                    warn!("Reverse lookup of {} failed: {}", addr, e);
                    (addr, None)
                }
                Err(_) => {
                    warn!("Reverse lookup of {} timed out after {:?}", addr, timeout);
                    (addr, None)
                }
            }
        });
    }

    let mut names: HashMap<IpAddr, String> = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        if let Ok((addr, Some(name))) = joined {
            names.insert(addr, name);
        }
    }
    debug!("Resolved {} addresses", names.len());

    for row in rows[..limit].iter_mut() {
        row.sip_name = row.key.sip.and_then(|a| names.get(&a).cloned());
        row.dip_name = row.key.dip.and_then(|a| names.get(&a).cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    fn aggregate(entries: &[(u16, u64)]) -> Aggregate {
        let mut agg = Aggregate::default();
        for (port, bytes) in entries {
            let counters = Counters::new(1, 2, *bytes, 0);
            agg.map.insert(
                FlowKey {
                    dport: Some(*port),
                    ..Default::default()
                },
                counters,
            );
            agg.totals += counters;
        }
        agg
    }

    fn ports(rows: &[Row]) -> Vec<u16> {
        rows.iter().filter_map(|r| r.key.dport).collect()
    }

    #[test]
    fn test_coverage_truncation() {
        let agg = aggregate(&[(1, 500), (2, 300), (3, 150), (4, 40), (5, 10)]);
        let rows = PostProcess::default().apply(agg, false);
        // 500 + 300 + 150 = 950 of 1000
        assert_eq!(ports(&rows), vec![1, 2, 3]);
    }

    #[test]
    fn test_limit_and_ascending() {
        let agg = aggregate(&[(1, 500), (2, 300), (3, 150)]);
        let options = PostProcess {
            ascending: true,
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ports(&options.apply(agg, false)), vec![3, 2]);
    }

    #[test]
    fn test_ties_break_on_key() {
        let agg = aggregate(&[(9, 100), (3, 100), (5, 100)]);
        let options = PostProcess {
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(ports(&options.apply(agg, false)), vec![3, 5, 9]);
    }

    #[test]
    fn test_direction_metric() {
        let agg = aggregate(&[(1, 500), (2, 300)]);
        let options = PostProcess {
            sort_by: SortBy::Packets,
            direction: Direction::Out,
            ..Default::default()
        };
        assert_eq!(options.metric(&agg.map.values().next().copied().unwrap()), 2);
        let bytes_out = PostProcess {
            direction: Direction::Out,
            ..Default::default()
        };
        // No sent bytes at all: nothing to cut on
        assert_eq!(bytes_out.apply(agg, false).len(), 2);
    }

    #[test]
    fn test_time_grouped_sorted_by_time() {
        let mut agg = Aggregate::default();
        for (ts, bytes) in [(300, 1), (100, 1000), (200, 5)] {
            agg.map.insert(
                FlowKey {
                    time: Some(ts),
                    ..Default::default()
                },
                Counters::new(0, 0, bytes, 0),
            );
        }
        let rows = PostProcess::default().apply(agg, true);
        let times: Vec<_> = rows.iter().filter_map(|r| r.key.time).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn test_time_grouped_ignores_limit() {
        let mut agg = Aggregate::default();
        for ts in [1200, 300, 900, 600] {
            agg.map.insert(
                FlowKey {
                    time: Some(ts),
                    ..Default::default()
                },
                Counters::new(0, 0, 10, 0),
            );
        }
        let options = PostProcess {
            limit: Some(2),
            ..Default::default()
        };
        let rows = options.apply(agg, true);
        let times: Vec<_> = rows.iter().filter_map(|r| r.key.time).collect();
        assert_eq!(times, vec![300, 600, 900, 1200]);
    }

    #[test]
    fn test_ascending_coverage_keeps_largest_rows() {
        let agg = aggregate(&[(1, 500), (2, 300), (3, 150), (4, 40), (5, 10)]);
        let options = PostProcess {
            ascending: true,
            ..Default::default()
        };
        // Same rows as the descending cut, smallest first
        assert_eq!(ports(&options.apply(agg, false)), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_resolve_rows() {
        let known: IpAddr = "10.0.0.1".parse().unwrap();
        let resolver = Arc::new(StaticResolver::new().with_host("gateway", &[known]));
        let mut rows = vec![Row {
            key: FlowKey {
                sip: Some(known),
                dip: Some("10.0.0.2".parse().unwrap()),
                ..Default::default()
            },
            counters: Counters::default(),
            sip_name: None,
            dip_name: None,
        }];

        resolve_rows(&mut rows, resolver, ResolveOptions::default()).await;
        assert_eq!(rows[0].sip_name.as_deref(), Some("gateway"));
        assert_eq!(rows[0].dip_name, None);
    }

    #[tokio::test]
    async fn test_resolve_timeout_keeps_address() {
        let known: IpAddr = "10.0.0.1".parse().unwrap();
        let resolver = Arc::new(
            StaticResolver::new()
                .with_host("slow", &[known])
                .with_delay(Duration::from_millis(300)),
        );
        let mut rows = vec![Row {
            key: FlowKey {
                sip: Some(known),
                ..Default::default()
            },
            counters: Counters::default(),
            sip_name: None,
            dip_name: None,
        }];

        let options = ResolveOptions {
            rows: 1,
            timeout: Duration::from_millis(20),
        };
        resolve_rows(&mut rows, resolver, options).await;
        assert_eq!(rows[0].sip_name, None);
        assert_eq!(rows[0].key.sip, Some(known));
    }
}
