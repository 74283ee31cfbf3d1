//! Rendering of query results and interface listings

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use flowdb_core::query::{InterfaceInfo, QueryResult, Row};
use flowdb_core::{proto_name, Column, Counters, Timestamp};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Txt,
    Json,
    Csv,
}

const COUNTER_HEADERS: [&str; 4] = ["pkts_rcvd", "pkts_sent", "bytes_rcvd", "bytes_sent"];

fn format_time(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn cell(row: &Row, column: Column) -> String {
    let key = &row.key;
    match column {
        Column::Time => key.time.map(format_time).unwrap_or_default(),
        Column::Iface => key.iface.clone().unwrap_or_default(),
        Column::Sip => row
            .sip_name
            .clone()
            .or_else(|| key.sip.map(|a| a.to_string()))
            .unwrap_or_default(),
        Column::Dip => row
            .dip_name
            .clone()
            .or_else(|| key.dip.map(|a| a.to_string()))
            .unwrap_or_default(),
        Column::Dport => key.dport.map(|p| p.to_string()).unwrap_or_default(),
        Column::Proto => key.proto.map(proto_name).unwrap_or_default(),
    }
}

fn counter_cells(counters: &Counters) -> [String; 4] {
    [
        counters.pkts_rcvd.to_string(),
        counters.pkts_sent.to_string(),
        counters.bytes_rcvd.to_string(),
        counters.bytes_sent.to_string(),
    ]
}

/// Write a query result in the requested format
pub fn write_result(out: &mut impl Write, result: &QueryResult, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *out, result)?;
            writeln!(out)?;
        }
        Format::Csv => {
            let mut header: Vec<&str> = result.columns.iter().map(|c| c.name()).collect();
            header.extend(COUNTER_HEADERS);
            writeln!(out, "{}", header.join(","))?;
            for row in &result.rows {
                let mut cells: Vec<String> = result.columns.iter().map(|c| cell(row, *c)).collect();
                cells.extend(counter_cells(&row.counters));
                writeln!(out, "{}", cells.join(","))?;
            }
        }
        Format::Txt => write_table(out, result)?,
    }
    Ok(())
}

fn write_table(out: &mut impl Write, result: &QueryResult) -> Result<()> {
    if result.is_empty() {
        writeln!(out, "No flows matched the query ({} blocks scanned)", result.blocks_scanned)?;
        return Ok(());
    }

    let mut table: Vec<Vec<String>> = Vec::with_capacity(result.rows.len() + 2);
    let mut header: Vec<String> = result.columns.iter().map(|c| c.name().to_string()).collect();
    header.extend(COUNTER_HEADERS.iter().map(|h| h.to_string()));
    table.push(header);
    for row in &result.rows {
        let mut cells: Vec<String> = result.columns.iter().map(|c| cell(row, *c)).collect();
        cells.extend(counter_cells(&row.counters));
        table.push(cells);
    }
    let mut totals = vec![String::new(); result.columns.len()];
    if let Some(first) = totals.first_mut() {
        *first = "total".to_string();
    }
    totals.extend(counter_cells(&result.totals));
    table.push(totals);

    let widths: Vec<usize> = (0..table[0].len())
        .map(|i| table.iter().map(|r| r[i].len()).max().unwrap_or(0))
        .collect();
    let last = table.len() - 1;
    for (n, cells) in table.iter().enumerate() {
        if n == last {
            writeln!(out)?;
        }
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>width$}", c, width = *w))
            .collect();
        writeln!(out, "{}", line.join("  "))?;
    }
    writeln!(
        out,
        "\n{} of {} rows, {} blocks scanned in {:.2}ms",
        result.rows.len(),
        result.hits_total,
        result.blocks_scanned,
        result.execution_time_ms
    )?;
    Ok(())
}

/// Write the interface listing in the requested format
pub fn write_interfaces(out: &mut impl Write, ifaces: &[InterfaceInfo], format: Format) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *out, ifaces)?;
            writeln!(out)?;
        }
        Format::Csv => {
            writeln!(out, "iface,flow_count,traffic,begin")?;
            for info in ifaces {
                writeln!(out, "{},{},{},{}", info.name, info.flow_count, info.traffic, info.begin)?;
            }
        }
        Format::Txt => {
            for info in ifaces {
                writeln!(
                    out,
                    "{:<12} {:>12} flows {:>16} bytes  since {}",
                    info.name,
                    info.flow_count,
                    info.traffic,
                    format_time(info.begin)
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdb_core::query::QueryStatus;
    use flowdb_core::FlowKey;

    fn result() -> QueryResult {
        QueryResult {
            columns: vec![Column::Dport, Column::Proto],
            rows: vec![Row {
                key: FlowKey {
                    dport: Some(443),
                    proto: Some(6),
                    ..Default::default()
                },
                counters: Counters::new(1, 2, 30, 40),
                sip_name: None,
                dip_name: None,
            }],
            totals: Counters::new(1, 2, 30, 40),
            hits_total: 1,
            blocks_scanned: 1,
            status: QueryStatus::Ok,
            execution_time_ms: 0.5,
        }
    }

    #[test]
    fn test_csv() {
        let mut out = Vec::new();
        write_result(&mut out, &result(), Format::Csv).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "dport,proto,pkts_rcvd,pkts_sent,bytes_rcvd,bytes_sent\n443,TCP,1,2,30,40\n"
        );
    }

    #[test]
    fn test_txt_has_totals() {
        let mut out = Vec::new();
        write_result(&mut out, &result(), Format::Txt).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("total"));
        assert!(text.contains("TCP"));
        assert!(text.contains("1 of 1 rows"));
    }
}
