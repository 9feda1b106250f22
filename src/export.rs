//! Downloadable artifacts: the filtered rows and the daily summary, both as
//! delimited text prefixed with a UTF-8 byte-order mark.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::{
    aggregate::{self, DailyRow},
    data::{cell_display, format_thousands},
    filter::FilteredView,
    io_utils,
};

pub const DAILY_SUMMARY_HEADERS: [&str; 4] = ["date", "sum", "mean", "count"];

/// Writes every column of the view's rows. `None` writes to stdout.
pub fn write_filtered(view: &FilteredView<'_>, path: Option<&Path>, delimiter: u8) -> Result<usize> {
    let dataset = view.table.dataset();
    let mut writer = io_utils::open_bom_csv_writer(path, delimiter)?;
    writer
        .write_record(&dataset.headers)
        .context("Writing export header")?;
    for &row in &view.rows {
        writer
            .write_record(dataset.rows[row].iter().map(cell_display))
            .with_context(|| format!("Writing export row {}", row + 1))?;
    }
    writer.flush().context("Flushing export output")?;
    info!("Exported {} row(s){}", view.len(), describe_target(path));
    Ok(view.len())
}

/// Writes the per-day amount summary. Returns `Ok(None)` when the table has
/// no date or amount to summarize.
pub fn write_daily_summary(
    view: &FilteredView<'_>,
    path: Option<&Path>,
    delimiter: u8,
) -> Result<Option<usize>> {
    let Some(rows) = aggregate::daily_summary(view) else {
        return Ok(None);
    };
    let mut writer = io_utils::open_bom_csv_writer(path, delimiter)?;
    writer
        .write_record(DAILY_SUMMARY_HEADERS)
        .context("Writing daily summary header")?;
    for row in &rows {
        writer
            .write_record(daily_record(row))
            .with_context(|| format!("Writing daily summary for {}", row.date))?;
    }
    writer.flush().context("Flushing daily summary")?;
    info!("Wrote {} day(s) of summary{}", rows.len(), describe_target(path));
    Ok(Some(rows.len()))
}

fn daily_record(row: &DailyRow) -> [String; 4] {
    [
        row.date.format("%Y-%m-%d").to_string(),
        plain_number(row.sum),
        row.mean.map(plain_number).unwrap_or_default(),
        row.count.to_string(),
    ]
}

/// Machine-readable number: no grouping, at most four decimals, no trailing zeros.
fn plain_number(value: f64) -> String {
    let rendered = format_thousands(value, 4).replace(',', "");
    if rendered.contains('.') {
        rendered
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        rendered
    }
}

fn describe_target(path: Option<&Path>) -> String {
    match path {
        Some(p) if !io_utils::is_dash(p) => format!(" to {p:?}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbers_drop_grouping_and_trailing_zeros() {
        assert_eq!(plain_number(1234567.0), "1234567");
        assert_eq!(plain_number(12.5), "12.5");
        assert_eq!(plain_number(-0.25), "-0.25");
    }
}
