//! Available memory detection for sizing the scan worker pool

use crate::config::FALLBACK_PHYS_MEM;
use std::fs;
use tracing::debug;

/// Bytes of memory available to a query.
///
/// Reads `MemAvailable` (or `MemFree`) from `/proc/meminfo` and falls back to
/// a fixed amount elsewhere.
pub fn available_memory() -> u64 {
    match fs::read_to_string("/proc/meminfo") {
        Ok(content) => parse_meminfo(&content).unwrap_or(FALLBACK_PHYS_MEM),
        Err(e) => {
            debug!("Cannot read /proc/meminfo ({}), assuming {} bytes", e, FALLBACK_PHYS_MEM);
            FALLBACK_PHYS_MEM
        }
    }
}

fn parse_meminfo(content: &str) -> Option<u64> {
    let field = |name: &str| {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
            Some(kb * 1024)
        })
    };
    field("MemAvailable").or_else(|| field("MemFree"))
}

/// Share of available memory given by a percentage
pub fn memory_budget(max_mem_pct: u8) -> u64 {
    available_memory() / 100 * u64::from(max_mem_pct.min(100))
}
