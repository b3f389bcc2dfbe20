//! Export glue: CSV files and plain-text run summaries.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::recorder::RunTable;
use crate::sources::MetricKey;

/// Write a run table as CSV.
///
/// Header is `metric,core,tick_0..tick_{n-1}`; the core column is empty
/// for machine-wide metrics, and missing samples render as empty cells so
/// column positions always line up with the tick schedule.
pub fn write_csv<W: Write>(out: &mut W, table: &RunTable) -> io::Result<()> {
    write!(out, "metric,core")?;
    for tick in 0..table.tick_count {
        write!(out, ",tick_{}", tick)?;
    }
    writeln!(out)?;

    for row in &table.rows {
        write!(out, "{}", row.key.metric)?;
        match row.key.core {
            Some(core) => write!(out, ",{}", core)?,
            None => write!(out, ",")?,
        }
        for cell in &row.cells {
            match cell {
                Some(value) => write!(out, ",{}", value)?,
                None => write!(out, ",")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write a run table as a CSV file.
pub fn csv_to_file(path: impl AsRef<Path>, table: &RunTable) -> io::Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_csv(&mut writer, table)?;
    writer.flush()
}

/// Per-series statistics for the terminal summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStats {
    /// Series identity.
    pub key: MetricKey,
    /// Mean over non-missing samples, when any exist.
    pub mean: Option<f64>,
    /// Smallest non-missing sample.
    pub min: Option<f64>,
    /// Largest non-missing sample.
    pub max: Option<f64>,
    /// Missing slots out of the run's tick count.
    pub missing: usize,
}

/// Reduce every row of a table to mean, min, and max.
pub fn table_stats(table: &RunTable) -> Vec<SeriesStats> {
    table
        .rows
        .iter()
        .map(|row| {
            let present: Vec<f64> = row.cells.iter().filter_map(|c| *c).collect();
            let mean = if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            };
            let min = present.iter().copied().reduce(f64::min);
            let max = present.iter().copied().reduce(f64::max);
            SeriesStats {
                key: row.key.clone(),
                mean,
                min,
                max,
                missing: row.cells.iter().filter(|c| c.is_none()).count(),
            }
        })
        .collect()
}

/// Render a plain-text summary, one line per series.
pub fn render_summary(table: &RunTable) -> String {
    let mut out = String::new();
    for stats in table_stats(table) {
        let fmt = |v: Option<f64>| match v {
            Some(v) => format!("{:.3}", v),
            None => "undefined".to_string(),
        };
        out.push_str(&format!(
            "{:<32} mean {:>12}  min {:>12}  max {:>12}  missing {}/{}\n",
            stats.key.to_string(),
            fmt(stats.mean),
            fmt(stats.min),
            fmt(stats.max),
            stats.missing,
            table.tick_count,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::TableRow;

    fn table() -> RunTable {
        RunTable {
            tick_count: 3,
            rows: vec![
                TableRow {
                    key: MetricKey::per_core("cache-misses", 0),
                    cells: vec![Some(10.0), None, Some(30.0)],
                },
                TableRow {
                    key: MetricKey::global("wall-power"),
                    cells: vec![Some(150.0), Some(151.0), Some(149.0)],
                },
            ],
        }
    }

    #[test]
    fn csv_header_and_missing_cells() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &table()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "metric,core,tick_0,tick_1,tick_2");
        assert_eq!(lines[1], "cache-misses,0,10,,30");
        assert_eq!(lines[2], "wall-power,,150,151,149");
    }

    #[test]
    fn csv_of_empty_table_is_header_only() {
        let mut buf = Vec::new();
        write_csv(
            &mut buf,
            &RunTable {
                tick_count: 0,
                rows: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "metric,core\n");
    }

    #[test]
    fn stats_skip_missing_samples() {
        let stats = table_stats(&table());
        assert_eq!(stats[0].mean, Some(20.0));
        assert_eq!(stats[0].min, Some(10.0));
        assert_eq!(stats[0].max, Some(30.0));
        assert_eq!(stats[0].missing, 1);
    }

    #[test]
    fn summary_marks_all_missing_rows_undefined() {
        let table = RunTable {
            tick_count: 2,
            rows: vec![TableRow {
                key: MetricKey::global("wall-power"),
                cells: vec![None, None],
            }],
        };
        let text = render_summary(&table);
        assert!(text.contains("undefined"));
        assert!(text.contains("missing 2/2"));
    }

    #[test]
    fn csv_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        csv_to_file(&path, &table()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("metric,core,tick_0"));
    }
}
