//! Cleaning pipeline applied to a normalized table.
//!
//! Steps run in a fixed order and each can be switched off: column-name
//! normalization, missing-value resolution, numeric coercion, duplicate
//! removal and IQR outlier removal. Columns are never dropped or reordered,
//! so the column mapping resolved by the normalizer stays valid.

use std::collections::HashSet;

use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, cell_display, cell_to_number, normalize_column_name},
    dataset::{ColumnKind, Dataset},
    schema::NormalizedTable,
};

pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Drop every row holding at least one missing value.
    #[default]
    Drop,
    /// Fill numeric columns with their column mean.
    Mean,
    /// Fill every non-temporal missing cell with zero.
    Zero,
    /// Leave missing values untouched.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningOptions {
    pub normalize_column_names: bool,
    pub missing_policy: MissingPolicy,
    pub coerce_types: bool,
    pub remove_duplicates: bool,
    pub remove_outliers: bool,
    pub iqr_multiplier: f64,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            normalize_column_names: true,
            missing_policy: MissingPolicy::default(),
            coerce_types: true,
            remove_duplicates: true,
            remove_outliers: false,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
        }
    }
}

impl CleaningOptions {
    /// Every step disabled; the table passes through untouched.
    pub fn passthrough() -> Self {
        Self {
            normalize_column_names: false,
            missing_policy: MissingPolicy::None,
            coerce_types: false,
            remove_duplicates: false,
            remove_outliers: false,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub original_rows: usize,
    pub final_rows: usize,
    pub renamed_columns: Vec<(String, String)>,
    pub missing_values: usize,
    pub rows_dropped_missing: usize,
    pub cells_filled: usize,
    pub coerced_columns: Vec<String>,
    pub duplicates_removed: usize,
    pub outliers_removed: usize,
}

impl CleaningReport {
    pub fn rows_removed(&self) -> usize {
        self.original_rows.saturating_sub(self.final_rows)
    }
}

pub fn clean(table: &mut NormalizedTable, options: &CleaningOptions) -> CleaningReport {
    let synthesized = table.mapping.synthesized_columns();
    let dataset = &mut table.dataset;
    let mut report = CleaningReport {
        original_rows: dataset.row_count(),
        ..CleaningReport::default()
    };

    if options.normalize_column_names {
        report.renamed_columns = normalize_headers(dataset);
    }

    report.missing_values = dataset.total_missing();
    if report.missing_values > 0 {
        match options.missing_policy {
            MissingPolicy::Drop => {
                report.rows_dropped_missing =
                    dataset.retain_rows(|_, row| row.iter().all(Option::is_some));
            }
            MissingPolicy::Mean => report.cells_filled = fill_with_mean(dataset),
            MissingPolicy::Zero => report.cells_filled = fill_with_zero(dataset),
            MissingPolicy::None => {}
        }
        debug!(
            "{} missing value(s) handled with policy {:?}",
            report.missing_values, options.missing_policy
        );
    }

    if options.coerce_types {
        report.coerced_columns = coerce_numeric_columns(dataset);
    }

    if options.remove_duplicates {
        report.duplicates_removed = remove_duplicates(dataset, &synthesized);
    }

    if options.remove_outliers {
        report.outliers_removed = remove_outliers(dataset, &synthesized, options.iqr_multiplier);
    }

    report.final_rows = dataset.row_count();
    info!(
        "Cleaning kept {} of {} row(s) (missing policy dropped {}, duplicates {}, outliers {})",
        report.final_rows,
        report.original_rows,
        report.rows_dropped_missing,
        report.duplicates_removed,
        report.outliers_removed
    );
    report
}

fn normalize_headers(dataset: &mut Dataset) -> Vec<(String, String)> {
    let mut renamed = Vec::new();
    for header in &mut dataset.headers {
        let normalized = normalize_column_name(header);
        if normalized != *header {
            renamed.push((std::mem::replace(header, normalized.clone()), normalized));
        }
    }
    renamed
}

fn fill_with_mean(dataset: &mut Dataset) -> usize {
    let mut filled = 0usize;
    for idx in dataset.numeric_columns() {
        let values = dataset.numeric_column(idx).into_iter().flatten().collect::<Vec<_>>();
        let Some(mean) = mean(&values) else {
            continue;
        };
        for row in &mut dataset.rows {
            if row[idx].is_none() {
                row[idx] = Some(Value::Float(mean));
                filled += 1;
            }
        }
    }
    filled
}

fn fill_with_zero(dataset: &mut Dataset) -> usize {
    let temporal = (0..dataset.column_count())
        .filter(|idx| dataset.column_kind(*idx) == ColumnKind::Temporal)
        .collect::<HashSet<_>>();
    let mut filled = 0usize;
    for row in &mut dataset.rows {
        for (idx, cell) in row.iter_mut().enumerate() {
            if cell.is_none() && !temporal.contains(&idx) {
                *cell = Some(Value::Integer(0));
                filled += 1;
            }
        }
    }
    filled
}

/// Converts text columns whose every present cell is a formatted number.
fn coerce_numeric_columns(dataset: &mut Dataset) -> Vec<String> {
    let mut coerced = Vec::new();
    for idx in 0..dataset.column_count() {
        let mut has_text = false;
        let mut present = 0usize;
        let all_numeric = dataset.column(idx).flatten().all(|value| {
            present += 1;
            if matches!(value, Value::Text(_)) {
                has_text = true;
            }
            cell_to_number(value).is_some()
        });
        if !has_text || present == 0 || !all_numeric {
            continue;
        }
        for row in &mut dataset.rows {
            if let Some(value) = row[idx].take() {
                row[idx] = cell_to_number(&value);
            }
        }
        debug!("Coerced column '{}' to numbers", dataset.headers[idx]);
        coerced.push(dataset.headers[idx].clone());
    }
    coerced
}

fn remove_duplicates(dataset: &mut Dataset, skip: &[usize]) -> usize {
    let mut seen = HashSet::new();
    dataset.retain_rows(|_, row| {
        let key = row
            .iter()
            .enumerate()
            .filter(|(idx, _)| !skip.contains(idx))
            .map(|(_, cell)| cell_display(cell))
            .collect::<Vec<_>>();
        seen.insert(key)
    })
}

/// Tukey fences per numeric column, in column order. Each pass works on the
/// rows left by the previous one, so removals compound.
fn remove_outliers(dataset: &mut Dataset, skip: &[usize], multiplier: f64) -> usize {
    let mut removed = 0usize;
    for idx in dataset.numeric_columns() {
        if skip.contains(&idx) {
            continue;
        }
        let values = dataset.numeric_column(idx).into_iter().flatten().collect::<Vec<_>>();
        let Some((lower, upper)) = iqr_bounds(&values, multiplier) else {
            continue;
        };
        let dropped = dataset.retain_rows(|_, row| {
            row[idx]
                .as_ref()
                .and_then(Value::as_f64)
                .is_some_and(|value| value >= lower && value <= upper)
        });
        if dropped > 0 {
            debug!(
                "Column '{}': removed {dropped} row(s) outside [{lower}, {upper}]",
                dataset.headers[idx]
            );
        }
        removed += dropped;
    }
    removed
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// `[Q1 - k*IQR, Q3 + k*IQR]` for `values`.
pub fn iqr_bounds(values: &[f64], multiplier: f64) -> Option<(f64, f64)> {
    let q1 = quantile(values, 0.25)?;
    let q3 = quantile(values, 0.75)?;
    let iqr = q3 - q1;
    Some((q1 - multiplier * iqr, q3 + multiplier * iqr))
}
