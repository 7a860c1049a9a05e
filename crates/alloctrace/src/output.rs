use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

use colored::Colorize;
use prettytable::{color, Attr, Cell, Row, Table};
use serde::Serialize;

use crate::event::PathKind;
use crate::ledger::Ledger;

const PATHS: [PathKind; 2] = [PathKind::Heap, PathKind::Typed];

/// Everything a reporter needs to render one finished trace.
pub struct TraceReport<'a> {
    pub ledger: &'a Ledger,
    pub total_elapsed: Duration,
    pub caller_name: &'a str,
}

/// Implement to control how the trace summary is displayed or stored.
pub trait Reporter {
    fn report(&self, report: &TraceReport<'_>) -> Result<(), Box<dyn Error>>;
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log(THRESHOLD).floor() as usize).min(UNITS.len() - 1);
    let unit_value = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", unit_value, UNITS[unit_index])
    }
}

fn headers() -> Vec<String> {
    ["Path", "Allocs", "Deallocs", "Live", "Allocated", "Freed", "P50 size", "Max size"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn rows(ledger: &Ledger) -> Vec<Vec<String>> {
    PATHS
        .into_iter()
        .map(|path| {
            let stats = ledger.stats(path);
            vec![
                path.label().to_string(),
                stats.allocs.to_string(),
                stats.deallocs.to_string(),
                ledger.live_blocks(path).to_string(),
                format_bytes(stats.bytes_allocated),
                format_bytes(stats.bytes_freed),
                format_bytes(stats.size_percentile(50.0)),
                format_bytes(stats.max_size()),
            ]
        })
        .collect()
}

fn display_table(report: &TraceReport<'_>) {
    let use_colors = std::env::var("NO_COLOR").is_err();

    let mut table = Table::new();

    let header_cells: Vec<Cell> = headers()
        .into_iter()
        .map(|header| {
            if use_colors {
                Cell::new(&header)
                    .with_style(Attr::Bold)
                    .with_style(Attr::ForegroundColor(color::CYAN))
            } else {
                Cell::new(&header).with_style(Attr::Bold)
            }
        })
        .collect();

    table.add_row(Row::new(header_cells));

    for row in rows(report.ledger) {
        table.add_row(Row::new(row.iter().map(|cell| Cell::new(cell)).collect()));
    }

    println!(
        "\n{} Allocation summary from {} (Total time: {:.2?}):",
        "[alloctrace]".blue().bold(),
        report.caller_name.yellow().bold(),
        report.total_elapsed
    );

    table.printstd();

    let ledger = report.ledger;
    if ledger.balanced() {
        println!(
            "{} {}",
            "[alloctrace]".blue().bold(),
            "every allocation matched by exactly one deallocation".green()
        );
    } else {
        let leaked = ledger.leaked();
        if !leaked.is_empty() {
            println!(
                "{} {}",
                "[alloctrace]".blue().bold(),
                format!("{} block(s) still live:", leaked.len()).red().bold()
            );
            for (addr, block) in leaked {
                println!("  {addr:#x} {} via {}", format_bytes(block.size as u64), block.path);
            }
        }
        for anomaly in ledger.anomalies() {
            println!(
                "{} {}",
                "[alloctrace]".blue().bold(),
                format!("anomaly: {anomaly:?}").red()
            );
        }
    }
}

/// JSON representation of a finished trace.
#[derive(Debug, Clone, Serialize)]
pub struct ReportJson {
    pub caller_name: String,
    pub total_elapsed_ns: u64,
    pub balanced: bool,
    pub live_blocks: usize,
    pub anomalies: usize,
    pub paths: BTreeMap<&'static str, PathJson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathJson {
    pub allocs: u64,
    pub deallocs: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub p50_size: u64,
    pub max_size: u64,
}

impl From<&TraceReport<'_>> for ReportJson {
    fn from(report: &TraceReport<'_>) -> Self {
        let ledger = report.ledger;
        let paths = PATHS
            .into_iter()
            .map(|path| {
                let stats = ledger.stats(path);
                (
                    path.label(),
                    PathJson {
                        allocs: stats.allocs,
                        deallocs: stats.deallocs,
                        bytes_allocated: stats.bytes_allocated,
                        bytes_freed: stats.bytes_freed,
                        p50_size: stats.size_percentile(50.0),
                        max_size: stats.max_size(),
                    },
                )
            })
            .collect();

        Self {
            caller_name: report.caller_name.to_string(),
            total_elapsed_ns: report.total_elapsed.as_nanos() as u64,
            balanced: ledger.balanced(),
            live_blocks: ledger.leaked().len(),
            anomalies: ledger.anomalies().len(),
            paths,
        }
    }
}

pub(crate) struct TableReporter;

impl Reporter for TableReporter {
    fn report(&self, report: &TraceReport<'_>) -> Result<(), Box<dyn Error>> {
        display_table(report);
        Ok(())
    }
}

pub(crate) struct JsonReporter;

impl Reporter for JsonReporter {
    fn report(&self, report: &TraceReport<'_>) -> Result<(), Box<dyn Error>> {
        let json = ReportJson::from(report);
        println!("{}", serde_json::to_string(&json)?);
        Ok(())
    }
}

pub(crate) struct JsonPrettyReporter;

impl Reporter for JsonPrettyReporter {
    fn report(&self, report: &TraceReport<'_>) -> Result<(), Box<dyn Error>> {
        let json = ReportJson::from(report);
        println!("{}", serde_json::to_string_pretty(&json)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AllocEvent;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
    }

    fn sample_report(ledger: &Ledger) -> TraceReport<'_> {
        TraceReport {
            ledger,
            total_elapsed: Duration::from_millis(5),
            caller_name: "demo::main",
        }
    }

    #[test]
    fn test_report_json_shape() {
        let mut ledger = Ledger::new();
        ledger.apply(AllocEvent::TypedAlloc {
            addr: 0x10,
            elem_size: 8,
            count: 1,
        });
        ledger.apply(AllocEvent::TypedDealloc {
            addr: 0x10,
            elem_size: 8,
            count: 1,
        });

        let json = serde_json::to_value(ReportJson::from(&sample_report(&ledger))).unwrap();
        assert_eq!(json["caller_name"], "demo::main");
        assert_eq!(json["balanced"], true);
        assert_eq!(json["live_blocks"], 0);
        assert_eq!(json["paths"]["typed"]["allocs"], 1);
        assert_eq!(json["paths"]["typed"]["bytes_allocated"], 8);
        assert_eq!(json["paths"]["heap"]["allocs"], 0);
    }

    #[test]
    fn test_report_json_flags_leaks() {
        let mut ledger = Ledger::new();
        ledger.apply(AllocEvent::HeapAlloc {
            addr: 0x20,
            size: 64,
            zeroed: false,
        });

        let json = ReportJson::from(&sample_report(&ledger));
        assert!(!json.balanced);
        assert_eq!(json.live_blocks, 1);
    }

    #[test]
    fn test_table_rows_cover_both_paths() {
        let ledger = Ledger::new();
        let rows = rows(&ledger);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "heap");
        assert_eq!(rows[1][0], "typed");
        assert_eq!(rows[0].len(), headers().len());
    }
}
