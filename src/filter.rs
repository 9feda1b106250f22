use std::cmp::Ordering;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, cell_to_number, parse_naive_date, parse_temporal},
    schema::CanonicalField,
    session::PreparedTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: ComparisonOperator,
    pub raw_value: String,
}

pub fn parse_filters(filters: &[String]) -> Result<Vec<FilterCondition>> {
    filters.iter().map(|f| parse_filter(f)).collect()
}

fn parse_filter(filter: &str) -> Result<FilterCondition> {
    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty filter expression"));
    }

    let lowered = trimmed.to_ascii_lowercase();
    for (needle, op) in [
        (" contains ", ComparisonOperator::Contains),
        (" startswith ", ComparisonOperator::StartsWith),
        (" endswith ", ComparisonOperator::EndsWith),
    ] {
        if let Some(idx) = lowered.find(needle) {
            let (left, right_with_space) = trimmed.split_at(idx);
            let right = right_with_space[needle.len()..].trim();
            return Ok(FilterCondition {
                column: left.trim().to_string(),
                operator: op,
                raw_value: unquote(right).to_string(),
            });
        }
    }

    for (needle, op) in [
        ("!=", ComparisonOperator::NotEq),
        (">=", ComparisonOperator::Ge),
        ("<=", ComparisonOperator::Le),
        ("=", ComparisonOperator::Eq),
        (">", ComparisonOperator::Gt),
        ("<", ComparisonOperator::Lt),
    ] {
        if let Some(idx) = trimmed.find(needle) {
            let left = trimmed[..idx].trim();
            let right = trimmed[idx + needle.len()..].trim();
            if left.is_empty() {
                break;
            }
            return Ok(FilterCondition {
                column: left.to_string(),
                operator: op,
                raw_value: unquote(right).to_string(),
            });
        }
    }

    Err(anyhow!("Failed to parse filter expression '{trimmed}'"))
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Inclusive calendar range; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Multi-select filter: a row passes when the field's value is one of `values`.
/// An empty selection matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub field: CanonicalField,
    pub values: Vec<String>,
}

impl Membership {
    /// Parses `field=value1,value2`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (field, values) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("Selection '{spec}' must look like field=value1,value2"))?;
        let field = CanonicalField::from_name(field)
            .ok_or_else(|| anyhow!("Unknown field '{}' in selection '{spec}'", field.trim()))?;
        let values = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { field, values })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub date_range: Option<DateRange>,
    pub memberships: Vec<Membership>,
    pub conditions: Vec<FilterCondition>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.date_range.is_none_or(|range| range.is_unbounded())
            && self.memberships.is_empty()
            && self.conditions.is_empty()
    }
}

/// Read-only subset of a prepared table, held as row positions.
#[derive(Debug, Clone)]
pub struct FilteredView<'a> {
    pub table: &'a PreparedTable,
    pub rows: Vec<usize>,
}

impl<'a> FilteredView<'a> {
    pub fn all(table: &'a PreparedTable) -> Self {
        Self {
            table,
            rows: (0..table.dataset().row_count()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&'a Value> {
        self.table.dataset().cell(row, column)
    }

    /// Cells of `column` for the rows in the view, in view order.
    pub fn values(&self, column: usize) -> impl Iterator<Item = Option<&'a Value>> + '_ {
        let dataset = self.table.dataset();
        self.rows.iter().map(move |row| dataset.cell(*row, column))
    }

    pub fn numbers(&self, column: usize) -> Vec<f64> {
        self.values(column)
            .filter_map(|cell| cell.and_then(Value::as_f64))
            .collect()
    }
}

struct CompiledCondition<'c> {
    column: usize,
    condition: &'c FilterCondition,
}

/// Applies every predicate of `filters` as a conjunction. Fails only when a
/// comparison references a column the table does not have.
pub fn apply<'a>(table: &'a PreparedTable, filters: &FilterSet) -> Result<FilteredView<'a>> {
    let compiled = filters
        .conditions
        .iter()
        .map(|condition| {
            table
                .resolve_column(&condition.column)
                .map(|column| CompiledCondition { column, condition })
                .ok_or_else(|| anyhow!("Column '{}' not found for filter", condition.column))
        })
        .collect::<Result<Vec<_>>>()?;

    let date_column = match filters.date_range {
        Some(range) if !range.is_unbounded() => {
            let column = table.mapping().column(CanonicalField::Date);
            if column.is_none() {
                warn!("Date range ignored: no date column is resolved");
            }
            column.map(|c| (c, range))
        }
        _ => None,
    };

    let memberships = filters
        .memberships
        .iter()
        .filter_map(|membership| match table.mapping().column(membership.field) {
            Some(column) => Some((column, membership)),
            None => {
                warn!(
                    "Selection on '{}' ignored: the field is not resolved",
                    membership.field
                );
                None
            }
        })
        .collect::<Vec<_>>();

    let dataset = table.dataset();
    let rows = (0..dataset.row_count())
        .filter(|row| {
            if let Some((column, range)) = date_column
                && !dataset
                    .cell(*row, column)
                    .and_then(Value::as_date)
                    .is_some_and(|date| range.contains(date))
            {
                return false;
            }
            memberships.iter().all(|(column, membership)| {
                dataset.cell(*row, *column).is_some_and(|value| {
                    let shown = value.as_display();
                    membership.values.iter().any(|wanted| *wanted == shown)
                })
            }) && compiled.iter().all(|compiled| {
                evaluate_condition(compiled.condition, dataset.cell(*row, compiled.column))
            })
        })
        .collect::<Vec<_>>();
    debug!("Filters kept {} of {} row(s)", rows.len(), dataset.row_count());
    Ok(FilteredView { table, rows })
}

fn evaluate_condition(condition: &FilterCondition, value: Option<&Value>) -> bool {
    use ComparisonOperator::*;
    let needle = condition.raw_value.as_str();
    let text = || value.map(Value::as_display).unwrap_or_default();
    let ordering = || value.and_then(|left| compare_to_literal(left, needle));
    match condition.operator {
        Contains => text().contains(needle),
        StartsWith => text().starts_with(needle),
        EndsWith => text().ends_with(needle),
        Eq => ordering() == Some(Ordering::Equal),
        // A missing or incomparable cell is "not equal".
        NotEq => ordering() != Some(Ordering::Equal),
        Gt => ordering() == Some(Ordering::Greater),
        Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        Lt => ordering() == Some(Ordering::Less),
        Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Compares a cell with a filter literal using the cell's own type.
fn compare_to_literal(left: &Value, literal: &str) -> Option<Ordering> {
    match left {
        Value::Integer(_) | Value::Float(_) => {
            let lhs = left.as_f64()?;
            let rhs = cell_to_number(&Value::Text(literal.to_string()))?.as_f64()?;
            lhs.partial_cmp(&rhs)
        }
        Value::Date(date) => parse_naive_date(literal).map(|rhs| date.cmp(&rhs)),
        Value::DateTime(dt) => match parse_temporal(literal)? {
            Value::DateTime(rhs) => Some(dt.cmp(&rhs)),
            Value::Date(rhs) => Some(dt.date().cmp(&rhs)),
            _ => None,
        },
        Value::Text(text) => Some(text.as_str().cmp(literal)),
    }
}
