//! Pipeline driver: load, normalize, clean, derive, filter and summarize.
//!
//! A [`Session`] owns at most one loaded dataset. Every request runs the full
//! pipeline again from that immutable raw table, so nothing computed for one
//! request leaks into the next.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    aggregate::{self, Aggregate, Breakdown, ColumnRef, DailyRow, Kpis, MetricSpec, MonthlySummary},
    clean::{self, CleaningOptions, CleaningReport},
    config::DashboardConfig,
    data::normalize_column_name,
    dataset::{ColumnKind, Dataset},
    derive::{self, DerivedField, FeatureColumns},
    error::LoadError,
    filter::{self, FilteredView},
    frequency::{self, ShareRow},
    insight::{self, Insight, InsightContext},
    schema::{self, CanonicalField, ColumnMapping, MatchKind, NormalizedTable, Resolution, SchemaProfile},
    source::{self, DataSource, LoadOptions, LoadedDataset},
    stats::{self, ColumnSummary, CorrelationMatrix},
};

/// A cleaned table with derived features, ready for filtering.
#[derive(Debug, Clone)]
pub struct PreparedTable {
    table: NormalizedTable,
    features: FeatureColumns,
    report: CleaningReport,
}

impl PreparedTable {
    pub fn build(raw: Dataset, profile: &SchemaProfile, options: &CleaningOptions) -> Self {
        let mut table = schema::normalize(raw, profile);
        let report = clean::clean(&mut table, options);
        let features = derive::derive_features(&mut table);
        Self {
            table,
            features,
            report,
        }
    }

    pub fn table(&self) -> &NormalizedTable {
        &self.table
    }

    pub fn dataset(&self) -> &Dataset {
        &self.table.dataset
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.table.mapping
    }

    pub fn features(&self) -> &FeatureColumns {
        &self.features
    }

    pub fn report(&self) -> &CleaningReport {
        &self.report
    }

    pub fn is_dashboard_ready(&self) -> bool {
        self.table.is_dashboard_ready()
    }

    pub fn column_of(&self, reference: ColumnRef) -> Option<usize> {
        match reference {
            ColumnRef::Field(field) => self.mapping().column(field),
            ColumnRef::Derived(field) => self.features.column(field),
            ColumnRef::Column(idx) => (idx < self.dataset().column_count()).then_some(idx),
        }
    }

    /// Looks a user-supplied column name up as a header, then as a canonical
    /// field, then as the header it would have after name normalization.
    pub fn resolve_column(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        let dataset = self.dataset();
        dataset
            .column_index(name)
            .or_else(|| CanonicalField::from_name(name).and_then(|f| self.mapping().column(f)))
            .or_else(|| dataset.column_index(&normalize_column_name(name)))
    }
}

/// Resolves the configured profile and prepares the loaded table.
pub fn prepare(loaded: &LoadedDataset, config: &DashboardConfig) -> Result<PreparedTable> {
    let profile = SchemaProfile::resolve(&config.profile)
        .with_context(|| format!("Resolving schema profile '{}'", config.profile))?;
    let prepared = PreparedTable::build(loaded.dataset.clone(), &profile, &config.cleaning);
    debug!(
        "Prepared {} row(s) with profile '{}'",
        prepared.dataset().row_count(),
        profile.name
    );
    Ok(prepared)
}

#[derive(Debug, Default)]
pub struct Session {
    options: LoadOptions,
    loaded: Option<LoadedDataset>,
}

impl Session {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            loaded: None,
        }
    }

    /// Replaces the current dataset. On failure the session is left empty.
    pub fn load(&mut self, source: &DataSource) -> Result<&LoadedDataset, LoadError> {
        self.clear();
        let loaded = source::load(source, &self.options)?;
        Ok(self.loaded.insert(loaded))
    }

    pub fn loaded(&self) -> Option<&LoadedDataset> {
        self.loaded.as_ref()
    }

    pub fn clear(&mut self) {
        self.loaded = None;
    }

    fn require_loaded(&self) -> Result<&LoadedDataset> {
        self.loaded
            .as_ref()
            .context("No dataset is loaded in this session")
    }

    pub fn prepare(&self, config: &DashboardConfig) -> Result<PreparedTable> {
        prepare(self.require_loaded()?, config)
    }

    pub fn run(&self, config: &DashboardConfig) -> Result<DashboardReport> {
        let loaded = self.require_loaded()?;
        let prepared = prepare(loaded, config)?;
        build_report(loaded, &prepared, config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardMode {
    Full,
    BasicInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: &'static str,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInfo {
    pub rows: usize,
    pub columns: usize,
    pub column_info: Vec<ColumnInfo>,
    pub total_missing: usize,
}

impl BasicInfo {
    pub fn of(dataset: &Dataset) -> Self {
        Self {
            rows: dataset.row_count(),
            columns: dataset.column_count(),
            column_info: (0..dataset.column_count())
                .map(|idx| ColumnInfo {
                    name: dataset.headers[idx].clone(),
                    kind: kind_name(dataset.column_kind(idx)),
                    missing: dataset.missing_count(idx),
                })
                .collect(),
            total_missing: dataset.total_missing(),
        }
    }
}

fn kind_name(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Numeric => "numeric",
        ColumnKind::Temporal => "temporal",
        ColumnKind::Text => "text",
        ColumnKind::Empty => "empty",
    }
}

/// One canonical field and where its values came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingRow {
    pub field: CanonicalField,
    pub column: Option<String>,
    pub origin: &'static str,
}

pub fn mapping_rows(prepared: &PreparedTable) -> Vec<MappingRow> {
    let headers = &prepared.dataset().headers;
    prepared
        .mapping()
        .entries()
        .iter()
        .map(|(field, resolution)| {
            let origin = match resolution {
                Resolution::Source {
                    matched_by: MatchKind::Alias,
                    ..
                } => "alias",
                Resolution::Source {
                    matched_by: MatchKind::Keyword,
                    ..
                } => "keyword",
                Resolution::Synthesized { .. } => "synthesized",
                Resolution::Unresolved => "unresolved",
            };
            MappingRow {
                field: *field,
                column: resolution.column().and_then(|c| headers.get(c).cloned()),
                origin,
            }
        })
        .collect()
}

/// Everything one dashboard request renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub source: String,
    pub profile: String,
    pub mode: DashboardMode,
    pub missing_requirements: Vec<&'static str>,
    pub basic: BasicInfo,
    pub mapping: Vec<MappingRow>,
    pub cleaning: CleaningReport,
    pub filtered_rows: usize,
    pub kpis: Option<Kpis>,
    pub breakdown: Option<Breakdown>,
    pub top_products: Option<Aggregate>,
    pub category_totals: Option<Aggregate>,
    pub region_totals: Option<Aggregate>,
    pub payment_shares: Option<Vec<ShareRow>>,
    pub segment_shares: Option<Vec<ShareRow>>,
    pub monthly: Option<MonthlySummary>,
    pub daily: Option<Vec<DailyRow>>,
    pub describe: Vec<ColumnSummary>,
    pub correlation: CorrelationMatrix,
    pub insights: Vec<Insight>,
}

/// Filters the prepared table and computes every section of the report.
/// Tables that fail the validity check get the basic-info sections only.
pub fn build_report(
    loaded: &LoadedDataset,
    prepared: &PreparedTable,
    config: &DashboardConfig,
) -> Result<DashboardReport> {
    let mut report = DashboardReport {
        source: loaded.source.to_string(),
        profile: prepared.table().profile.clone(),
        mode: DashboardMode::BasicInfo,
        missing_requirements: prepared.table().missing_requirements(),
        basic: BasicInfo::of(&loaded.dataset),
        mapping: mapping_rows(prepared),
        cleaning: prepared.report().clone(),
        filtered_rows: prepared.dataset().row_count(),
        kpis: None,
        breakdown: None,
        top_products: None,
        category_totals: None,
        region_totals: None,
        payment_shares: None,
        segment_shares: None,
        monthly: None,
        daily: None,
        describe: Vec::new(),
        correlation: CorrelationMatrix::default(),
        insights: Vec::new(),
    };
    if !prepared.is_dashboard_ready() {
        warn!(
            "Sales amount or a time axis was not found (missing: {}); showing basic info only",
            report.missing_requirements.join(", ")
        );
        return Ok(report);
    }

    let filters = config.filter_set()?;
    let view = filter::apply(prepared, &filters)?;
    info!(
        "{} of {} row(s) match the current filters",
        view.len(),
        prepared.dataset().row_count()
    );
    let matrix = stats::correlation_matrix(&view);
    let context = InsightContext::from_view(&view, &matrix);

    report.mode = DashboardMode::Full;
    report.filtered_rows = view.len();
    report.kpis = Some(context.kpis.clone());
    report.breakdown = aggregate::time_breakdown(&view, config.time_view, &config.segments);
    report.top_products = aggregate::group_by(
        &view,
        &[ColumnRef::Field(CanonicalField::Product)],
        &[
            MetricSpec::sum(ColumnRef::Field(CanonicalField::Amount), "total"),
            MetricSpec::count("orders"),
        ],
    )
    .map(|agg| agg.top_n(0, config.top_n));
    report.category_totals =
        aggregate::amount_by(&view, ColumnRef::Field(CanonicalField::Category));
    report.region_totals = aggregate::amount_by(&view, ColumnRef::Field(CanonicalField::Region));
    report.payment_shares = shares(&view, CanonicalField::PaymentMethod);
    report.segment_shares = shares(&view, CanonicalField::CustomerSegment);
    report.monthly = aggregate::monthly_summary(&view);
    report.daily = aggregate::daily_summary(&view);
    report.describe = stats::describe(&view);
    report.insights = insight::generate(&context);
    report.correlation = matrix;
    Ok(report)
}

fn shares(view: &FilteredView<'_>, field: CanonicalField) -> Option<Vec<ShareRow>> {
    view.table
        .mapping()
        .column(field)
        .map(|column| frequency::value_shares(view, column))
}

/// Header of a derived feature when the table carries it.
pub fn derived_header(prepared: &PreparedTable, field: DerivedField) -> Option<&str> {
    prepared
        .features()
        .column(field)
        .map(|column| prepared.dataset().headers[column].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFormat;

    fn loaded(headers: &[&str], rows: &[&[&str]]) -> LoadedDataset {
        LoadedDataset {
            source: DataSource::Upload("inline.csv".into()),
            format: SourceFormat::Delimited { delimiter: b',' },
            dataset: Dataset::from_text_rows(
                headers.iter().map(|s| s.to_string()).collect(),
                rows.iter()
                    .map(|row| row.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
        }
    }

    #[test]
    fn resolve_column_accepts_headers_fields_and_raw_names() {
        let data = loaded(
            &["Invoice ID", "Date", "Total", "Unit price"],
            &[&["A-1", "2024-05-01", "100", "10"]],
        );
        let prepared = prepare(&data, &DashboardConfig::default()).expect("prepare");
        let amount = prepared.resolve_column("amount").expect("amount");
        assert_eq!(prepared.dataset().headers[amount], "Total");
        assert_eq!(prepared.resolve_column("Invoice ID"), prepared.resolve_column("Invoice_ID"));
        assert!(prepared.resolve_column("Unit price").is_some());
        assert_eq!(prepared.resolve_column("nope"), None);
        assert_eq!(derived_header(&prepared, DerivedField::YearMonth), Some("year_month"));
    }

    #[test]
    fn table_without_amount_runs_in_basic_mode() {
        let data = loaded(&["name", "colour"], &[&["a", "red"], &["b", "blue"]]);
        let prepared = prepare(&data, &DashboardConfig::default()).expect("prepare");
        let report = build_report(&data, &prepared, &DashboardConfig::default()).expect("report");
        assert_eq!(report.mode, DashboardMode::BasicInfo);
        assert!(report.missing_requirements.contains(&"amount"));
        assert_eq!(report.basic.columns, 2);
        assert!(report.insights.is_empty());
    }

    #[test]
    fn failed_load_clears_previous_dataset() {
        let mut session = Session::default();
        session.load(&DataSource::Sample).expect("sample loads");
        assert!(session.loaded().is_some());
        let err = session
            .load(&DataSource::Catalog("carrie1/ecommerce-data".into()))
            .unwrap_err();
        assert!(matches!(err, LoadError::CatalogReference { .. }));
        assert!(session.loaded().is_none());
        assert!(session.run(&DashboardConfig::default()).is_err());
    }
}
