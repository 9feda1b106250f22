//! Grouped aggregation over a filtered view.
//!
//! Grouping keys are compared by their display text; rows with a missing key
//! in any grouping column are left out. Group order is explicit per dimension:
//! weekdays run Monday to Sunday, time buckets follow the clock, months, dates
//! and numbers ascend, and every other key keeps first-appearance order.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
};

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    config::TimeView,
    data::Value,
    dataset::ColumnKind,
    derive::{DerivedField, TimeBucket, day_rank},
    filter::FilteredView,
    schema::CanonicalField,
    session::PreparedTable,
};

pub const ALL_SEGMENTS_LABEL: &str = "All";

/// A column addressed by meaning rather than position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRef {
    Field(CanonicalField),
    Derived(DerivedField),
    Column(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sum,
    Mean,
    Count,
    DistinctCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub metric: Metric,
    /// Ignored by `Metric::Count`, which counts rows.
    pub column: Option<ColumnRef>,
    pub label: String,
}

impl MetricSpec {
    pub fn sum(column: ColumnRef, label: &str) -> Self {
        Self::new(Metric::Sum, Some(column), label)
    }

    pub fn mean(column: ColumnRef, label: &str) -> Self {
        Self::new(Metric::Mean, Some(column), label)
    }

    pub fn count(label: &str) -> Self {
        Self::new(Metric::Count, None, label)
    }

    pub fn distinct(column: ColumnRef, label: &str) -> Self {
        Self::new(Metric::DistinctCount, Some(column), label)
    }

    fn new(metric: Metric, column: Option<ColumnRef>, label: &str) -> Self {
        Self {
            metric,
            column,
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub keys: Vec<String>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl Aggregate {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_index(&self, label: &str) -> Option<usize> {
        self.metrics.iter().position(|metric| metric == label)
    }

    /// `(first key, value of metric 0)` pairs, for single-dimension tables.
    pub fn series(&self) -> Vec<(String, f64)> {
        self.rows
            .iter()
            .filter_map(|row| {
                let key = row.keys.first()?.clone();
                let value = row.values.first().copied().flatten()?;
                Some((key, value))
            })
            .collect()
    }

    /// Rows ordered by `metric` descending. The sort is stable, so ties keep
    /// their current order; rows without a value go last.
    pub fn top_n(&self, metric: usize, n: usize) -> Aggregate {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let left = a.values.get(metric).copied().flatten();
            let right = b.values.get(metric).copied().flatten();
            match (left, right) {
                (Some(l), Some(r)) => r.total_cmp(&l),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        rows.truncate(n);
        Aggregate {
            dimensions: self.dimensions.clone(),
            metrics: self.metrics.clone(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Weekday,
    Bucket,
    Natural,
    FirstSeen,
}

fn sort_order(table: &PreparedTable, column: usize) -> SortOrder {
    let features = table.features();
    if features.day_name == Some(column) {
        SortOrder::Weekday
    } else if features.time_bucket == Some(column) {
        SortOrder::Bucket
    } else if features.year_month == Some(column) {
        SortOrder::Natural
    } else {
        match table.dataset().column_kind(column) {
            ColumnKind::Numeric | ColumnKind::Temporal => SortOrder::Natural,
            ColumnKind::Text | ColumnKind::Empty => SortOrder::FirstSeen,
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        _ => match (left.as_date(), right.as_date()) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => left.as_display().cmp(&right.as_display()),
        },
    }
}

#[derive(Default)]
struct MetricState {
    sum: f64,
    observed: usize,
    distinct: HashSet<String>,
}

struct Group<'a> {
    keys: Vec<&'a Value>,
    rows: usize,
    metrics: Vec<MetricState>,
}

/// Groups `view` by `dimensions` and evaluates `metrics` per group. Returns
/// `None` when a dimension or a metric column is not available.
pub fn group_by(
    view: &FilteredView<'_>,
    dimensions: &[ColumnRef],
    metrics: &[MetricSpec],
) -> Option<Aggregate> {
    let table = view.table;
    let dims = dimensions
        .iter()
        .map(|dim| table.column_of(*dim))
        .collect::<Option<Vec<_>>>()?;
    let metric_columns = metrics
        .iter()
        .map(|spec| match (spec.metric, spec.column) {
            (Metric::Count, _) => Some(None),
            (_, Some(column)) => table.column_of(column).map(Some),
            (_, None) => None,
        })
        .collect::<Option<Vec<_>>>()?;

    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    for &row in &view.rows {
        let Some(keys) = dims
            .iter()
            .map(|column| view.cell(row, *column))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let text = keys.iter().map(|value| value.as_display()).collect::<Vec<_>>();
        let slot = *index.entry(text).or_insert_with(|| {
            groups.push(Group {
                keys: keys.clone(),
                rows: 0,
                metrics: metrics.iter().map(|_| MetricState::default()).collect(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.rows += 1;
        for (state, column) in group.metrics.iter_mut().zip(&metric_columns) {
            let Some(column) = column else {
                continue;
            };
            let Some(value) = view.cell(row, *column) else {
                continue;
            };
            if let Some(number) = value.as_f64() {
                state.sum += number;
                state.observed += 1;
            }
            state.distinct.insert(value.as_display());
        }
    }

    let orders = dims
        .iter()
        .map(|column| sort_order(table, *column))
        .collect::<Vec<_>>();
    let first_seen = first_seen_ranks(&groups, dims.len());
    groups.sort_by(|a, b| {
        for (dim, order) in orders.iter().enumerate() {
            let (left, right) = (a.keys[dim], b.keys[dim]);
            let ordering = match order {
                SortOrder::Weekday => rank_or_last(day_rank(&left.as_display()))
                    .cmp(&rank_or_last(day_rank(&right.as_display()))),
                SortOrder::Bucket => rank_or_last(TimeBucket::rank(&left.as_display()))
                    .cmp(&rank_or_last(TimeBucket::rank(&right.as_display()))),
                SortOrder::Natural => compare_values(left, right),
                SortOrder::FirstSeen => first_seen[dim]
                    .get(&left.as_display())
                    .cmp(&first_seen[dim].get(&right.as_display())),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    let rows = groups
        .into_iter()
        .map(|group| AggregateRow {
            keys: group.keys.iter().map(|value| value.as_display()).collect(),
            values: metrics
                .iter()
                .zip(&group.metrics)
                .map(|(spec, state)| match spec.metric {
                    Metric::Sum => Some(state.sum),
                    Metric::Mean => {
                        (state.observed > 0).then(|| state.sum / state.observed as f64)
                    }
                    Metric::Count => Some(group.rows as f64),
                    Metric::DistinctCount => Some(state.distinct.len() as f64),
                })
                .collect(),
        })
        .collect();

    Some(Aggregate {
        dimensions: dims
            .iter()
            .map(|column| table.dataset().headers[*column].clone())
            .collect(),
        metrics: metrics.iter().map(|spec| spec.label.clone()).collect(),
        rows,
    })
}

fn rank_or_last(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

fn first_seen_ranks(groups: &[Group<'_>], dims: usize) -> Vec<HashMap<String, usize>> {
    let mut ranks = vec![HashMap::new(); dims];
    for group in groups {
        for (dim, value) in group.keys.iter().enumerate() {
            let next = ranks[dim].len();
            ranks[dim].entry(value.as_display()).or_insert(next);
        }
    }
    ranks
}

/// Sum of amount per value of `dimension`; `None` when either is unresolved.
pub fn amount_by(view: &FilteredView<'_>, dimension: ColumnRef) -> Option<Aggregate> {
    group_by(
        view,
        &[dimension],
        &[MetricSpec::sum(ColumnRef::Field(CanonicalField::Amount), "total")],
    )
}

/// Percentage change against the previous entry. The first entry, and any
/// entry whose predecessor is missing or zero, has no growth.
pub fn month_over_month(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(idx, current)| {
            let previous = idx.checked_sub(1).and_then(|prev| values[prev])?;
            let current = (*current)?;
            (previous != 0.0).then(|| (current - previous) / previous * 100.0)
        })
        .collect()
}

/// `Gender: Female / Customer segment: Member`, or `All` without segments.
pub fn segment_label(parts: &[(&str, &str)]) -> String {
    if parts.is_empty() {
        ALL_SEGMENTS_LABEL.to_string()
    } else {
        parts
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .join(" / ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownRow {
    pub period: String,
    pub segment: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub time_view: TimeView,
    pub segments: Vec<CanonicalField>,
    pub rows: Vec<BreakdownRow>,
}

/// Amount per time period, split by the intersection of `segments`.
/// Segment fields that are not resolved are skipped.
pub fn time_breakdown(
    view: &FilteredView<'_>,
    time_view: TimeView,
    segments: &[CanonicalField],
) -> Option<Breakdown> {
    let table = view.table;
    let segments = segments
        .iter()
        .copied()
        .filter(|field| table.mapping().is_resolved(*field))
        .unique()
        .collect::<Vec<_>>();
    let mut dimensions = vec![ColumnRef::Derived(time_view.derived_field())];
    dimensions.extend(segments.iter().map(|field| ColumnRef::Field(*field)));
    let aggregate = group_by(
        view,
        &dimensions,
        &[MetricSpec::sum(ColumnRef::Field(CanonicalField::Amount), "total")],
    )?;
    let rows = aggregate
        .rows
        .iter()
        .map(|row| {
            let parts = segments
                .iter()
                .zip(&row.keys[1..])
                .map(|(field, value)| (field.label(), value.as_str()))
                .collect::<Vec<_>>();
            BreakdownRow {
                period: row.keys[0].clone(),
                segment: segment_label(&parts),
                total: row.values[0].unwrap_or(0.0),
            }
        })
        .collect();
    Some(Breakdown {
        time_view,
        segments,
        rows,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub rows: usize,
    pub total_amount: Option<f64>,
    pub mean_amount: Option<f64>,
    pub orders: Option<usize>,
    pub total_quantity: Option<f64>,
    pub distinct_products: Option<usize>,
    pub mean_rating: Option<f64>,
    pub mean_avg_ticket: Option<f64>,
}

fn column_sum(view: &FilteredView<'_>, column: Option<usize>) -> Option<f64> {
    column.map(|c| view.numbers(c).iter().sum())
}

fn column_mean(view: &FilteredView<'_>, column: Option<usize>) -> Option<f64> {
    let values = view.numbers(column?);
    crate::clean::mean(&values)
}

fn distinct_count(view: &FilteredView<'_>, column: Option<usize>) -> Option<usize> {
    let column = column?;
    Some(
        view.values(column)
            .flatten()
            .map(Value::as_display)
            .collect::<HashSet<_>>()
            .len(),
    )
}

pub fn kpis(view: &FilteredView<'_>) -> Kpis {
    let table = view.table;
    let field = |f: CanonicalField| table.mapping().column(f);
    Kpis {
        rows: view.len(),
        total_amount: column_sum(view, field(CanonicalField::Amount)),
        mean_amount: column_mean(view, field(CanonicalField::Amount)),
        orders: distinct_count(view, field(CanonicalField::TransactionId)),
        total_quantity: column_sum(view, field(CanonicalField::Quantity)),
        distinct_products: distinct_count(view, field(CanonicalField::Product)),
        mean_rating: column_mean(view, field(CanonicalField::Rating)),
        mean_avg_ticket: column_mean(view, table.features().avg_ticket),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthRow {
    pub month: String,
    pub total_sales: f64,
    pub avg_ticket: Option<f64>,
    pub orders: Option<usize>,
    pub mom_growth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub rows: Vec<MonthRow>,
    pub best: Option<(String, f64)>,
    pub worst: Option<(String, f64)>,
    pub mean_monthly_sales: Option<f64>,
}

/// Per-month totals with growth. `None` without a month column or an amount.
pub fn monthly_summary(view: &FilteredView<'_>) -> Option<MonthlySummary> {
    let table = view.table;
    let month = ColumnRef::Derived(DerivedField::YearMonth);
    let mut metrics = vec![MetricSpec::sum(ColumnRef::Field(CanonicalField::Amount), "total_sales")];
    let with_ticket = table.features().avg_ticket.is_some();
    if with_ticket {
        metrics.push(MetricSpec::mean(ColumnRef::Derived(DerivedField::AvgTicket), "avg_ticket"));
    }
    let with_orders = table.mapping().is_resolved(CanonicalField::TransactionId);
    if with_orders {
        metrics.push(MetricSpec::distinct(
            ColumnRef::Field(CanonicalField::TransactionId),
            "orders",
        ));
    }
    let aggregate = group_by(view, &[month], &metrics)?;
    let ticket_idx = aggregate.metric_index("avg_ticket");
    let orders_idx = aggregate.metric_index("orders");

    let totals = aggregate
        .rows
        .iter()
        .map(|row| row.values[0])
        .collect::<Vec<_>>();
    let growth = month_over_month(&totals);
    let rows = aggregate
        .rows
        .iter()
        .zip(growth)
        .map(|(row, mom_growth)| MonthRow {
            month: row.keys[0].clone(),
            total_sales: row.values[0].unwrap_or(0.0),
            avg_ticket: ticket_idx.and_then(|idx| row.values[idx]),
            orders: orders_idx.and_then(|idx| row.values[idx]).map(|v| v as usize),
            mom_growth,
        })
        .collect::<Vec<_>>();

    // First occurrence wins on ties, in month order.
    let best = rows
        .iter()
        .fold(None::<&MonthRow>, |best, row| match best {
            Some(current) if current.total_sales >= row.total_sales => Some(current),
            _ => Some(row),
        })
        .map(|row| (row.month.clone(), row.total_sales));
    let worst = rows
        .iter()
        .fold(None::<&MonthRow>, |worst, row| match worst {
            Some(current) if current.total_sales <= row.total_sales => Some(current),
            _ => Some(row),
        })
        .map(|row| (row.month.clone(), row.total_sales));
    let mean_monthly_sales =
        crate::clean::mean(&rows.iter().map(|row| row.total_sales).collect::<Vec<_>>());
    Some(MonthlySummary {
        rows,
        best,
        worst,
        mean_monthly_sales,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub sum: f64,
    pub mean: Option<f64>,
    pub count: usize,
}

/// Amount sum, mean and count per calendar day, ascending by date.
pub fn daily_summary(view: &FilteredView<'_>) -> Option<Vec<DailyRow>> {
    let table = view.table;
    let date = table.mapping().column(CanonicalField::Date)?;
    let amount = table.mapping().column(CanonicalField::Amount)?;
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for &row in &view.rows {
        let Some(day) = view.cell(row, date).and_then(Value::as_date) else {
            continue;
        };
        let entry = days.entry(day).or_insert((0.0, 0));
        if let Some(value) = view.cell(row, amount).and_then(Value::as_f64) {
            entry.0 += value;
            entry.1 += 1;
        }
    }
    Some(
        days.into_iter()
            .map(|(date, (sum, count))| DailyRow {
                date,
                sum,
                mean: (count > 0).then(|| sum / count as f64),
                count,
            })
            .collect(),
    )
}
