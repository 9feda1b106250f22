//! Derived feature columns: calendar period, weekday, hour, time-of-day
//! bucket and average ticket.
//!
//! Every derived column has a fixed header and is written with
//! [`Dataset::set_column`], so re-running the deriver overwrites instead of
//! appending a second copy.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Cell, Value, cell_to_hour},
    dataset::Dataset,
    schema::{CanonicalField, NormalizedTable, YEAR_MONTH_HEADER},
};

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeBucket {
    Morning,
    Lunch,
    Afternoon,
    Evening,
    Night,
    Unknown,
}

impl TimeBucket {
    pub const ORDER: [TimeBucket; 6] = [
        TimeBucket::Morning,
        TimeBucket::Lunch,
        TimeBucket::Afternoon,
        TimeBucket::Evening,
        TimeBucket::Night,
        TimeBucket::Unknown,
    ];

    pub fn from_hour(hour: Option<u32>) -> Self {
        match hour {
            Some(6..=10) => TimeBucket::Morning,
            Some(11..=13) => TimeBucket::Lunch,
            Some(14..=17) => TimeBucket::Afternoon,
            Some(18..=21) => TimeBucket::Evening,
            Some(_) => TimeBucket::Night,
            None => TimeBucket::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeBucket::Morning => "Morning",
            TimeBucket::Lunch => "Lunch",
            TimeBucket::Afternoon => "Afternoon",
            TimeBucket::Evening => "Evening",
            TimeBucket::Night => "Night",
            TimeBucket::Unknown => "Unknown",
        }
    }

    pub fn rank(label: &str) -> Option<usize> {
        Self::ORDER.iter().position(|bucket| bucket.label() == label)
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn time_bucket(hour: Option<u32>) -> &'static str {
    TimeBucket::from_hour(hour).label()
}

/// Amount per unit; `None` when either side is absent or the quantity is zero.
pub fn average_ticket(amount: Option<f64>, quantity: Option<f64>) -> Option<f64> {
    match (amount, quantity) {
        (Some(amount), Some(quantity)) if quantity != 0.0 => {
            Some(amount / quantity).filter(|v| v.is_finite())
        }
        _ => None,
    }
}

pub fn year_month(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

pub fn day_name(date: NaiveDate) -> &'static str {
    DAY_NAMES[date.weekday().num_days_from_monday() as usize]
}

pub fn day_rank(name: &str) -> Option<usize> {
    DAY_NAMES.iter().position(|day| *day == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedField {
    YearMonth,
    DayName,
    Hour,
    TimeBucket,
    AvgTicket,
}

impl DerivedField {
    pub const ALL: [DerivedField; 5] = [
        DerivedField::YearMonth,
        DerivedField::DayName,
        DerivedField::Hour,
        DerivedField::TimeBucket,
        DerivedField::AvgTicket,
    ];

    /// True for a header the deriver writes, such as `time_bucket`.
    pub fn is_derived_header(header: &str) -> bool {
        Self::ALL
            .iter()
            .any(|field| field.header().eq_ignore_ascii_case(header.trim()))
    }

    pub fn header(self) -> &'static str {
        match self {
            DerivedField::YearMonth => YEAR_MONTH_HEADER,
            DerivedField::DayName => "day_name",
            DerivedField::Hour => "hour",
            DerivedField::TimeBucket => "time_bucket",
            DerivedField::AvgTicket => "avg_ticket",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DerivedField::YearMonth => "Month",
            DerivedField::DayName => "Weekday",
            DerivedField::Hour => "Hour",
            DerivedField::TimeBucket => "Time of day",
            DerivedField::AvgTicket => "Average ticket",
        }
    }
}

/// Column positions of the derived features present in a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureColumns {
    pub year_month: Option<usize>,
    pub day_name: Option<usize>,
    pub hour: Option<usize>,
    pub time_bucket: Option<usize>,
    pub avg_ticket: Option<usize>,
}

impl FeatureColumns {
    pub fn column(&self, field: DerivedField) -> Option<usize> {
        match field {
            DerivedField::YearMonth => self.year_month,
            DerivedField::DayName => self.day_name,
            DerivedField::Hour => self.hour,
            DerivedField::TimeBucket => self.time_bucket,
            DerivedField::AvgTicket => self.avg_ticket,
        }
    }
}

pub fn derive_features(table: &mut NormalizedTable) -> FeatureColumns {
    let mapping = &table.mapping;
    let dataset = &mut table.dataset;
    let mut features = FeatureColumns {
        // A source column already named `year_month` still serves as the period key.
        year_month: dataset.column_index(YEAR_MONTH_HEADER),
        ..FeatureColumns::default()
    };

    if let Some(date_col) = mapping.column(CanonicalField::Date) {
        let dates = dataset
            .column(date_col)
            .map(|cell| cell.and_then(Value::as_date))
            .collect::<Vec<_>>();
        let periods = dates
            .iter()
            .map(|date| date.map(|d| Value::Text(year_month(d))))
            .collect();
        let names = dates
            .iter()
            .map(|date| date.map(|d| Value::Text(day_name(d).to_string())))
            .collect();
        features.year_month = Some(write_feature(dataset, DerivedField::YearMonth, periods));
        features.day_name = Some(write_feature(dataset, DerivedField::DayName, names));
    }

    if let Some(hour_col) = hour_source(dataset, mapping.column(CanonicalField::Time), mapping.column(CanonicalField::Date)) {
        let hours = dataset
            .column(hour_col)
            .map(|cell| cell.and_then(cell_to_hour))
            .collect::<Vec<_>>();
        let parsed = hours.iter().flatten().count();
        debug!(
            "Parsed an hour for {parsed} of {} row(s) from '{}'",
            hours.len(),
            dataset.headers[hour_col]
        );
        let hour_cells: Vec<Cell> = hours
            .iter()
            .map(|hour| hour.map(|h| Value::Integer(i64::from(h))))
            .collect();
        let buckets = hours
            .iter()
            .map(|hour| Some(Value::Text(time_bucket(*hour).to_string())))
            .collect();
        features.hour = Some(write_feature(dataset, DerivedField::Hour, hour_cells));
        features.time_bucket = Some(write_feature(dataset, DerivedField::TimeBucket, buckets));
    }

    if let (Some(amount_col), Some(quantity_col)) = (
        mapping.column(CanonicalField::Amount),
        mapping.column(CanonicalField::Quantity),
    ) {
        let tickets = (0..dataset.row_count())
            .map(|row| {
                average_ticket(
                    dataset.cell(row, amount_col).and_then(Value::as_f64),
                    dataset.cell(row, quantity_col).and_then(Value::as_f64),
                )
                .map(Value::Float)
            })
            .collect();
        features.avg_ticket = Some(write_feature(dataset, DerivedField::AvgTicket, tickets));
    }

    features
}

/// The time field when it yields at least one hour; otherwise a date column
/// carrying timestamps.
fn hour_source(dataset: &Dataset, time: Option<usize>, date: Option<usize>) -> Option<usize> {
    let yields_hours = |col: &usize| {
        dataset
            .column(*col)
            .flatten()
            .any(|value| cell_to_hour(value).is_some())
    };
    time.filter(yields_hours).or_else(|| {
        date.filter(|col| {
            dataset
                .column(*col)
                .flatten()
                .any(|value| matches!(value, Value::DateTime(_)))
        })
    })
}

/// True when a column named `header` exists and holds values other than `cells`.
fn replaces_source_values(dataset: &Dataset, header: &str, cells: &[Cell]) -> bool {
    dataset.column_index(header).is_some_and(|idx| {
        dataset
            .column(idx)
            .zip(cells)
            .any(|(old, new)| old.map(Value::as_display) != new.as_ref().map(Value::as_display))
    })
}

fn write_feature(dataset: &mut Dataset, field: DerivedField, cells: Vec<Cell>) -> usize {
    let header = field.header();
    if replaces_source_values(dataset, header, &cells) {
        warn!("Column '{header}' is overwritten with derived {} values", field.label());
    }
    dataset.set_column(header, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaProfile, normalize};

    fn table(headers: &[&str], rows: &[&[&str]]) -> NormalizedTable {
        let raw = Dataset::from_text_rows(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|s| s.to_string()).collect())
                .collect(),
        );
        normalize(raw, &SchemaProfile::retail())
    }

    #[test]
    fn buckets_follow_hour_ranges() {
        assert_eq!(time_bucket(Some(10)), "Morning");
        assert_eq!(time_bucket(Some(11)), "Lunch");
        assert_eq!(time_bucket(Some(14)), "Afternoon");
        assert_eq!(time_bucket(Some(21)), "Evening");
        assert_eq!(time_bucket(Some(23)), "Night");
        assert_eq!(time_bucket(Some(5)), "Night");
        assert_eq!(time_bucket(None), "Unknown");
    }

    #[test]
    fn average_ticket_guards_zero_quantity() {
        assert_eq!(average_ticket(Some(100.0), Some(4.0)), Some(25.0));
        assert_eq!(average_ticket(Some(100.0), Some(0.0)), None);
        assert_eq!(average_ticket(Some(100.0), None), None);
    }

    #[test]
    fn derives_calendar_time_and_ticket_columns() {
        let mut t = table(
            &["Invoice ID", "Date", "Time", "Total", "Quantity"],
            &[
                &["a", "1/5/2019", "1:08:00 PM", "100", "4"],
                &["b", "2019-03-08", "19:45", "50", "0"],
                &["c", "2019-03-09", "later", "30", "1"],
            ],
        );
        let features = derive_features(&mut t);
        let ds = &t.dataset;
        let ym = features.year_month.unwrap();
        let day = features.day_name.unwrap();
        let bucket = features.time_bucket.unwrap();
        let ticket = features.avg_ticket.unwrap();
        assert_eq!(ds.cell(0, ym), Some(&Value::Text("2019-01".into())));
        assert_eq!(ds.cell(0, day), Some(&Value::Text("Saturday".into())));
        assert_eq!(ds.cell(0, bucket), Some(&Value::Text("Lunch".into())));
        assert_eq!(ds.cell(1, bucket), Some(&Value::Text("Evening".into())));
        assert_eq!(ds.cell(2, bucket), Some(&Value::Text("Unknown".into())));
        assert_eq!(ds.cell(0, ticket), Some(&Value::Float(25.0)));
        assert_eq!(ds.cell(1, ticket), None);
    }

    #[test]
    fn rerunning_overwrites_instead_of_duplicating() {
        let mut t = table(&["Date", "Total", "Qty"], &[&["2024-05-01", "10", "2"]]);
        let first = derive_features(&mut t);
        let width = t.dataset.column_count();
        let second = derive_features(&mut t);
        assert_eq!(first, second);
        assert_eq!(t.dataset.column_count(), width);
    }

    #[test]
    fn timestamps_supply_hours_without_a_time_column() {
        let mut t = table(&["InvoiceDate", "Total"], &[&["12/1/2010 8:26", "3"]]);
        let features = derive_features(&mut t);
        let bucket = features.time_bucket.expect("bucket column");
        assert_eq!(t.dataset.cell(0, bucket), Some(&Value::Text("Morning".into())));
    }

    #[test]
    fn missing_date_leaves_calendar_features_absent() {
        let mut t = table(&["Total"], &[&["3"]]);
        let features = derive_features(&mut t);
        assert_eq!(features.year_month, None);
        assert_eq!(features.hour, None);
        assert_eq!(features.avg_ticket, None);
    }

    #[test]
    fn unparseable_time_column_falls_back_to_timestamps() {
        let mut t = table(
            &["InvoiceDate", "Total", "Time slot"],
            &[&["12/1/2010 8:26", "3", "early"], &["12/1/2010 19:05", "4", "late"]],
        );
        let features = derive_features(&mut t);
        let bucket = features.time_bucket.expect("bucket column");
        assert_eq!(t.dataset.cell(0, bucket), Some(&Value::Text("Morning".into())));
        assert_eq!(t.dataset.cell(1, bucket), Some(&Value::Text("Evening".into())));
    }

    #[test]
    fn detects_source_columns_with_other_values() {
        let t = table(&["Date", "Total", "hour"], &[&["2024-05-01", "10", "7"]]);
        let same = vec![Some(Value::Integer(7))];
        let other = vec![Some(Value::Integer(9))];
        assert!(!replaces_source_values(&t.dataset, "hour", &same));
        assert!(replaces_source_values(&t.dataset, "hour", &other));
        assert!(!replaces_source_values(&t.dataset, "day_name", &other));
        assert!(DerivedField::is_derived_header("Time_Bucket"));
        assert!(!DerivedField::is_derived_header("Time"));
    }
}
