//! Descriptive statistics and Pearson correlation over a filtered view.

use serde::Serialize;

use crate::{
    aggregate::ColumnRef,
    clean::quantile_sorted,
    derive::DerivedField,
    filter::FilteredView,
    schema::CanonicalField,
};

/// Columns correlated when present, in display order.
pub const PREFERRED_CORRELATION_COLUMNS: [ColumnRef; 6] = [
    ColumnRef::Field(CanonicalField::UnitPrice),
    ColumnRef::Field(CanonicalField::Quantity),
    ColumnRef::Field(CanonicalField::Amount),
    ColumnRef::Field(CanonicalField::GrossIncome),
    ColumnRef::Field(CanonicalField::Rating),
    ColumnRef::Derived(DerivedField::AvgTicket),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub max: Option<f64>,
}

struct ColumnStats {
    values: Vec<f64>,
}

impl ColumnStats {
    fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn mean(&self) -> Option<f64> {
        if self.count() > 0 {
            Some(self.values.iter().sum::<f64>() / self.count() as f64)
        } else {
            None
        }
    }

    /// False when every value is identical, including the empty case.
    fn varies(&self) -> bool {
        self.values
            .split_first()
            .is_some_and(|(first, rest)| rest.iter().any(|v| v != first))
    }

    /// Sample standard deviation (n - 1 denominator), two-pass.
    fn std_dev(&self) -> Option<f64> {
        if self.count() < 2 {
            return None;
        }
        if !self.varies() {
            return Some(0.0);
        }
        let mean = self.mean()?;
        let squares = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        Some((squares / (self.count() as f64 - 1.0)).sqrt())
    }

    fn summarize(mut self, name: String) -> ColumnSummary {
        let mean = self.mean();
        let std_dev = self.std_dev();
        self.values.sort_by(f64::total_cmp);
        let sorted = &self.values;
        let pick = |q: f64| (!sorted.is_empty()).then(|| quantile_sorted(sorted, q));
        ColumnSummary {
            name,
            count: sorted.len(),
            mean,
            std_dev,
            min: sorted.first().copied(),
            q1: pick(0.25),
            median: pick(0.5),
            q3: pick(0.75),
            max: sorted.last().copied(),
        }
    }
}

/// Count, mean, standard deviation and quartiles per numeric column, in
/// column order. Columns built by the normalizer are skipped.
pub fn describe(view: &FilteredView<'_>) -> Vec<ColumnSummary> {
    let table = view.table;
    let synthesized = table.mapping().synthesized_columns();
    table
        .dataset()
        .numeric_columns()
        .into_iter()
        .filter(|column| !synthesized.contains(column))
        .map(|column| {
            ColumnStats::from_values(view.numbers(column))
                .summarize(table.dataset().headers[column].clone())
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub columns: Vec<usize>,
    /// Row-major, `labels.len()` squared; `None` when a pair has fewer than
    /// two complete observations or no variance.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Distinct pairs (upper triangle) whose coefficient is known.
    pub fn pairs(&self) -> Vec<(usize, usize, f64)> {
        let mut pairs = Vec::new();
        for i in 0..self.columns.len() {
            for j in (i + 1)..self.columns.len() {
                if let Some(r) = self.values[i][j] {
                    pairs.push((i, j, r));
                }
            }
        }
        pairs
    }
}

/// Pearson correlation with pairwise-complete observations.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let constant = |pick: fn(&(f64, f64)) -> f64| {
        let first = pick(&pairs[0]);
        pairs.iter().all(|pair| pick(pair) == first)
    };
    if constant(|pair| pair.0) || constant(|pair| pair.1) {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((covariance / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Correlates the preferred columns, or every numeric column when fewer than
/// two preferred ones exist. Columns without variance are left out.
pub fn correlation_matrix(view: &FilteredView<'_>) -> CorrelationMatrix {
    let table = view.table;
    let mut candidates = Vec::new();
    for reference in PREFERRED_CORRELATION_COLUMNS {
        if let Some(column) = table.column_of(reference)
            && !candidates.contains(&column)
        {
            candidates.push(column);
        }
    }
    if candidates.len() < 2 {
        let synthesized = table.mapping().synthesized_columns();
        candidates = table
            .dataset()
            .numeric_columns()
            .into_iter()
            .filter(|column| !synthesized.contains(column))
            .collect();
    }

    let columns = candidates
        .into_iter()
        .filter(|column| ColumnStats::from_values(view.numbers(*column)).varies())
        .collect::<Vec<_>>();

    let series = columns
        .iter()
        .map(|column| {
            view.values(*column)
                .map(|cell| cell.and_then(|value| value.as_f64()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let values = (0..columns.len())
        .map(|i| {
            (0..columns.len())
                .map(|j| {
                    let pairs = series[i]
                        .iter()
                        .zip(&series[j])
                        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
                        .collect::<Vec<_>>();
                    pearson(&pairs)
                })
                .collect()
        })
        .collect();

    CorrelationMatrix {
        labels: columns
            .iter()
            .map(|column| table.dataset().headers[*column].clone())
            .collect(),
        columns,
        values,
    }
}
