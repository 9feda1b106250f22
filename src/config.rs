//! Dashboard request configuration.
//!
//! A [`DashboardConfig`] is built once per invocation, from an optional YAML
//! file overlaid with command-line flags, and passed by reference to every
//! stage. Nothing in the pipeline reads configuration from anywhere else.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    clean::CleaningOptions,
    data::parse_naive_date,
    derive::DerivedField,
    filter::{self, DateRange, FilterSet, Membership},
    schema::CanonicalField,
};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_CORRELATION_FLOOR: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TimeView {
    #[default]
    Monthly,
    Weekday,
    Hourly,
}

impl TimeView {
    pub fn derived_field(self) -> DerivedField {
        match self {
            TimeView::Monthly => DerivedField::YearMonth,
            TimeView::Weekday => DerivedField::DayName,
            TimeView::Hourly => DerivedField::TimeBucket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Built-in profile name (`retail`, `generic`) or a YAML profile path.
    pub profile: String,
    pub cleaning: CleaningOptions,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub selections: Vec<Membership>,
    /// Comparison predicates such as `amount>=100`.
    pub conditions: Vec<String>,
    pub time_view: TimeView,
    pub segments: Vec<CanonicalField>,
    pub top_n: usize,
    /// Lower bound of the correlation heatmap scale, `-1` or `0`.
    pub correlation_floor: f64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            profile: "retail".to_string(),
            cleaning: CleaningOptions::default(),
            start_date: None,
            end_date: None,
            selections: Vec::new(),
            conditions: Vec::new(),
            time_view: TimeView::default(),
            segments: Vec::new(),
            top_n: DEFAULT_TOP_N,
            correlation_floor: DEFAULT_CORRELATION_FLOOR,
        }
    }
}

impl DashboardConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: DashboardConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=0.0).contains(&self.correlation_floor) {
            bail!(
                "correlation_floor must lie between -1 and 0, got {}",
                self.correlation_floor
            );
        }
        if !(self.cleaning.iqr_multiplier.is_finite() && self.cleaning.iqr_multiplier > 0.0) {
            bail!(
                "IQR multiplier must be a positive number, got {}",
                self.cleaning.iqr_multiplier
            );
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            bail!("Start date {start} is after end date {end}");
        }
        Ok(())
    }

    pub fn filter_set(&self) -> Result<FilterSet> {
        let date_range = (self.start_date.is_some() || self.end_date.is_some()).then_some(DateRange {
            start: self.start_date,
            end: self.end_date,
        });
        Ok(FilterSet {
            date_range,
            memberships: self.selections.clone(),
            conditions: filter::parse_filters(&self.conditions)?,
        })
    }
}

/// Parses a date flag; accepts every date layout the loader understands.
pub fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_naive_date(value).ok_or_else(|| format!("'{value}' is not a recognizable date"))
}

pub fn parse_selection_arg(value: &str) -> Result<Membership, String> {
    Membership::parse(value).map_err(|err| err.to_string())
}

pub fn parse_segment_arg(value: &str) -> Result<CanonicalField, String> {
    CanonicalField::from_name(value).ok_or_else(|| {
        anyhow!(
            "Unknown field '{value}'; expected one of: {}",
            CanonicalField::ALL
                .iter()
                .map(|field| field.name())
                .collect::<Vec<_>>()
                .join(", ")
        )
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn yaml_config_fills_unspecified_fields_with_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "profile: generic\ntime_view: weekday\ncleaning:\n  missing_policy: mean\n  remove_outliers: true\nselections:\n  - field: region\n    values: [Seoul]\n"
        )
        .expect("write config");
        let config = DashboardConfig::load(file.path()).expect("load config");
        assert_eq!(config.profile, "generic");
        assert_eq!(config.time_view, TimeView::Weekday);
        assert!(config.cleaning.remove_outliers);
        assert_eq!(config.cleaning.iqr_multiplier, 1.5);
        assert_eq!(config.top_n, DEFAULT_TOP_N);
        assert_eq!(config.selections[0].field, CanonicalField::Region);
    }

    #[test]
    fn validate_rejects_out_of_range_floor_and_inverted_dates() {
        let config = DashboardConfig {
            correlation_floor: 0.5,
            ..DashboardConfig::default()
        };
        assert!(config.validate().is_err());
        let config = DashboardConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..DashboardConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn filter_set_parses_conditions() {
        let config = DashboardConfig {
            conditions: vec!["amount>=100".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..DashboardConfig::default()
        };
        let filters = config.filter_set().expect("filters");
        assert_eq!(filters.conditions.len(), 1);
        assert!(filters.date_range.is_some());
    }

    #[test]
    fn segment_arg_lists_known_fields_on_error() {
        assert_eq!(parse_segment_arg("gender"), Ok(CanonicalField::Gender));
        assert!(parse_segment_arg("colour").unwrap_err().contains("customer_segment"));
    }
}
