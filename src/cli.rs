use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    clean::MissingPolicy,
    config::{self, DashboardConfig, TimeView},
    filter::Membership,
    schema::CanonicalField,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Explore sales data: normalize columns, clean, aggregate and explain",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print KPIs, grouped tables, statistics, correlations and insights
    Report(ReportArgs),
    /// Print row and column counts, column types, missing values and the column mapping
    Inspect(InspectArgs),
    /// Write the filtered rows (and optionally a daily summary) as delimited text with a BOM
    Export(ExportArgs),
    /// Write the generated sample dataset
    Sample(SampleArgs),
}

/// Where the data comes from and how it is read.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// `sample`, `catalog:<owner/dataset>`, or a CSV/TSV/JSON/JSONL/spreadsheet path (`-` for stdin)
    #[arg(default_value = "sample")]
    pub source: String,
    /// Delimiter for delimited input (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of delimited input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Schema profile: `retail`, `generic`, or a YAML profile file
    #[arg(long)]
    pub profile: Option<String>,
}

/// Pipeline settings shared by `report` and `export`. Flags override the
/// values of `--config`.
#[derive(Debug, Args)]
pub struct DashboardArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// YAML file with dashboard settings
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// How missing values are resolved
    #[arg(long, value_enum)]
    pub missing_policy: Option<MissingPolicy>,
    /// Drop rows outside the IQR fences of any numeric column
    #[arg(long)]
    pub remove_outliers: bool,
    /// IQR fence multiplier used with --remove-outliers
    #[arg(long)]
    pub iqr_multiplier: Option<f64>,
    /// Keep rows dated on or after this day
    #[arg(long, value_parser = config::parse_date_arg)]
    pub start: Option<NaiveDate>,
    /// Keep rows dated on or before this day
    #[arg(long, value_parser = config::parse_date_arg)]
    pub end: Option<NaiveDate>,
    /// Keep rows whose field is one of the values, e.g. `region=Seoul,Busan` (repeatable)
    #[arg(long = "select", value_parser = config::parse_selection_arg, action = clap::ArgAction::Append)]
    pub selections: Vec<Membership>,
    /// Comparison filter such as `amount>=100` or `product contains Pad` (repeatable)
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
    /// Period axis for the sales breakdown
    #[arg(long, value_enum)]
    pub time_view: Option<TimeView>,
    /// Field to split the breakdown by (repeatable)
    #[arg(long = "segment", value_parser = config::parse_segment_arg, action = clap::ArgAction::Append)]
    pub segments: Vec<CanonicalField>,
    /// Number of products in the top-products table
    #[arg(long = "top")]
    pub top_n: Option<usize>,
    /// Lower bound of the correlation shading scale (-1 or 0)
    #[arg(long, allow_hyphen_values = true)]
    pub correlation_floor: Option<f64>,
}

impl DashboardArgs {
    /// Loads `--config` when given and overlays every flag that was set.
    pub fn to_config(&self) -> Result<DashboardConfig> {
        let mut config = match &self.config {
            Some(path) => DashboardConfig::load(path)?,
            None => DashboardConfig::default(),
        };
        if let Some(profile) = &self.source.profile {
            config.profile = profile.clone();
        }
        if let Some(policy) = self.missing_policy {
            config.cleaning.missing_policy = policy;
        }
        if self.remove_outliers {
            config.cleaning.remove_outliers = true;
        }
        if let Some(multiplier) = self.iqr_multiplier {
            config.cleaning.iqr_multiplier = multiplier;
        }
        if self.start.is_some() {
            config.start_date = self.start;
        }
        if self.end.is_some() {
            config.end_date = self.end;
        }
        if !self.selections.is_empty() {
            config.selections = self.selections.clone();
        }
        config.conditions.extend(self.filters.iter().cloned());
        if let Some(view) = self.time_view {
            config.time_view = view;
        }
        if !self.segments.is_empty() {
            config.segments = self.segments.clone();
        }
        if let Some(top) = self.top_n {
            config.top_n = top;
        }
        if let Some(floor) = self.correlation_floor {
            config.correlation_floor = floor;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub dashboard: DashboardArgs,
    /// Emit the report as JSON instead of text tables
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub dashboard: DashboardArgs,
    /// Destination for the filtered rows (`-` for stdout)
    #[arg(short, long)]
    pub output: PathBuf,
    /// Optional destination for the per-day amount summary
    #[arg(long)]
    pub summary: Option<PathBuf>,
    /// Output delimiter; defaults to the source's format (tab for TSV, comma otherwise)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct SampleArgs {
    /// Destination file (`-` for stdout)
    #[arg(short, long, default_value = "-")]
    pub output: PathBuf,
    /// PRNG seed
    #[arg(long, default_value_t = crate::sample::SAMPLE_SEED)]
    pub seed: u64,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
