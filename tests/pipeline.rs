mod common;

use chrono::NaiveDate;
use common::{TestWorkspace, fixture_path};
use sales_lens::{
    aggregate::{self, ColumnRef},
    clean::{CleaningOptions, MissingPolicy},
    config::{DashboardConfig, TimeView},
    data::Value,
    derive::DerivedField,
    export,
    filter::{self, FilteredView, Membership},
    insight::{self, InsightContext, InsightKind},
    schema::{self, CanonicalField, SchemaProfile},
    session::{self, DashboardMode, PreparedTable, Session},
    source::{self, DataSource, LoadOptions},
    stats,
};

fn load_fixture(name: &str) -> source::LoadedDataset {
    source::load(
        &DataSource::Upload(fixture_path(name)),
        &LoadOptions::default(),
    )
    .expect("fixture loads")
}

fn supermarket() -> PreparedTable {
    session::prepare(&load_fixture("supermarket.csv"), &DashboardConfig::default())
        .expect("prepare")
}

#[test]
fn supermarket_columns_resolve_through_aliases() {
    let prepared = supermarket();
    let mapping = prepared.mapping();
    let header = |field| {
        mapping
            .column(field)
            .map(|idx| prepared.dataset().headers[idx].clone())
    };
    assert_eq!(header(CanonicalField::Amount).as_deref(), Some("Total"));
    assert_eq!(header(CanonicalField::TransactionId).as_deref(), Some("Invoice_ID"));
    assert_eq!(header(CanonicalField::Region).as_deref(), Some("City"));
    assert_eq!(header(CanonicalField::Category).as_deref(), Some("Product_line"));
    assert_eq!(header(CanonicalField::CustomerSegment).as_deref(), Some("Customer_type"));
    assert_eq!(header(CanonicalField::GrossIncome).as_deref(), Some("gross_income"));
    assert!(prepared.is_dashboard_ready());
}

#[test]
fn cleaning_removes_the_duplicated_invoice() {
    let prepared = supermarket();
    let report = prepared.report();
    assert_eq!(report.original_rows, 13);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.final_rows, 12);
    assert!(
        report
            .renamed_columns
            .contains(&("Invoice ID".to_string(), "Invoice_ID".to_string()))
    );
}

#[test]
fn kpis_and_monthly_summary_follow_the_rows() {
    let prepared = supermarket();
    let view = FilteredView::all(&prepared);
    let kpis = aggregate::kpis(&view);
    assert_eq!(kpis.total_amount, Some(1780.0));
    assert_eq!(kpis.orders, Some(12));
    assert_eq!(kpis.total_quantity, Some(51.0));

    let monthly = aggregate::monthly_summary(&view).expect("monthly");
    let months = monthly.rows.iter().map(|r| r.month.as_str()).collect::<Vec<_>>();
    assert_eq!(months, vec!["2019-01", "2019-02", "2019-03"]);
    assert_eq!(monthly.rows[0].total_sales, 780.0);
    assert_eq!(monthly.rows[0].mom_growth, None);
    let feb = monthly.rows[1].mom_growth.expect("february growth");
    assert!((feb - (570.0 - 780.0) / 780.0 * 100.0).abs() < 1e-9);
    assert_eq!(monthly.best, Some(("2019-01".to_string(), 780.0)));
    assert_eq!(monthly.worst, Some(("2019-03".to_string(), 430.0)));
}

#[test]
fn weekday_and_bucket_groups_use_calendar_and_clock_order() {
    let prepared = supermarket();
    let view = FilteredView::all(&prepared);
    let buckets = aggregate::amount_by(&view, ColumnRef::Derived(DerivedField::TimeBucket))
        .expect("buckets");
    let order = buckets.rows.iter().map(|r| r.keys[0].as_str()).collect::<Vec<_>>();
    assert_eq!(order, vec!["Morning", "Lunch", "Afternoon", "Evening"]);

    let days = aggregate::amount_by(&view, ColumnRef::Derived(DerivedField::DayName))
        .expect("weekdays");
    let ranks = days
        .rows
        .iter()
        .map(|r| sales_lens::derive::day_rank(&r.keys[0]).expect("weekday name"))
        .collect::<Vec<_>>();
    assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn filters_combine_as_a_conjunction() {
    let prepared = supermarket();
    let config = DashboardConfig {
        start_date: NaiveDate::from_ymd_opt(2019, 2, 1),
        selections: vec![Membership {
            field: CanonicalField::Region,
            values: vec!["Yangon".into(), "Mandalay".into()],
        }],
        conditions: vec!["amount>=150".into()],
        ..DashboardConfig::default()
    };
    let view = filter::apply(&prepared, &config.filter_set().expect("filters")).expect("apply");
    let invoices = view
        .values(prepared.mapping().column(CanonicalField::TransactionId).expect("id"))
        .map(|cell| cell.map(Value::as_display).unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(invoices, vec!["INV-008", "INV-009", "INV-011"]);

    let nothing = DashboardConfig {
        selections: vec![Membership {
            field: CanonicalField::Region,
            values: Vec::new(),
        }],
        ..DashboardConfig::default()
    };
    let empty = filter::apply(&prepared, &nothing.filter_set().expect("filters")).expect("apply");
    assert!(empty.is_empty());
    let insights = insight::generate(&InsightContext::from_view(
        &empty,
        &stats::correlation_matrix(&empty),
    ));
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].kind, InsightKind::NoData);
}

#[test]
fn unknown_filter_column_is_reported() {
    let prepared = supermarket();
    let config = DashboardConfig {
        conditions: vec!["discount>5".into()],
        ..DashboardConfig::default()
    };
    let err = filter::apply(&prepared, &config.filter_set().expect("filters")).unwrap_err();
    assert!(err.to_string().contains("discount"));
}

#[test]
fn full_report_carries_region_insights_and_correlations() {
    let mut session = Session::new(LoadOptions::default());
    session
        .load(&DataSource::Upload(fixture_path("supermarket.csv")))
        .expect("load");
    let config = DashboardConfig {
        time_view: TimeView::Monthly,
        segments: vec![CanonicalField::Gender],
        ..DashboardConfig::default()
    };
    let report = session.run(&config).expect("report");
    assert_eq!(report.mode, DashboardMode::Full);
    assert_eq!(report.filtered_rows, 12);

    let kinds = report.insights.iter().map(|i| i.kind).collect::<Vec<_>>();
    assert_eq!(kinds[0], InsightKind::KpiSummary);
    assert!(kinds.contains(&InsightKind::TopRegion));
    assert!(kinds.contains(&InsightKind::RegionGap));
    assert!(!kinds.contains(&InsightKind::NoPattern));
    let top_region = report
        .insights
        .iter()
        .find(|i| i.kind == InsightKind::TopRegion)
        .expect("top region");
    assert!(top_region.text.starts_with("Yangon"));

    assert!(report.correlation.labels.contains(&"Total".to_string()));
    assert!(report.correlation.labels.contains(&"avg_ticket".to_string()));

    let breakdown = report.breakdown.expect("breakdown");
    assert!(breakdown.rows.iter().all(|row| row.segment.starts_with("Gender: ")));
    assert!(report.top_products.is_none(), "the fixture has no product column");
}

#[test]
fn year_and_month_columns_become_a_date() {
    let loaded = load_fixture("monthly_sales.csv");
    let config = DashboardConfig {
        cleaning: CleaningOptions {
            missing_policy: MissingPolicy::None,
            ..CleaningOptions::default()
        },
        ..DashboardConfig::default()
    };
    let prepared = session::prepare(&loaded, &config).expect("prepare");
    assert!(prepared.is_dashboard_ready());
    let date = prepared.mapping().column(CanonicalField::Date).expect("date");
    assert_eq!(
        prepared.dataset().cell(0, date),
        Some(&Value::Date(NaiveDate::from_ymd_opt(2023, 7, 1).expect("date")))
    );
    assert_eq!(prepared.dataset().cell(4, date), None);
    let amount = prepared.mapping().column(CanonicalField::Amount).expect("amount");
    assert_eq!(prepared.dataset().headers[amount], "RETAIL_SALES");
}

#[test]
fn missing_policies_change_row_counts() {
    let loaded = load_fixture("monthly_sales.csv");
    let with_policy = |policy| {
        let config = DashboardConfig {
            cleaning: CleaningOptions {
                missing_policy: policy,
                ..CleaningOptions::default()
            },
            ..DashboardConfig::default()
        };
        session::prepare(&loaded, &config).expect("prepare")
    };
    let dropped = with_policy(MissingPolicy::Drop);
    assert_eq!(dropped.dataset().row_count(), 3);
    let filled = with_policy(MissingPolicy::Mean);
    assert_eq!(filled.dataset().row_count(), 5);
    assert!(filled.report().cells_filled >= 1);
}

fn derived_values(prepared: &PreparedTable, rows: &[usize]) -> Vec<Vec<Option<String>>> {
    DerivedField::ALL
        .iter()
        .map(|field| {
            let column = prepared.features().column(*field);
            rows.iter()
                .map(|row| {
                    column
                        .and_then(|col| prepared.dataset().cell(*row, col))
                        .map(Value::as_display)
                })
                .collect()
        })
        .collect()
}

#[test]
fn export_then_reload_preserves_canonical_values() {
    let workspace = TestWorkspace::new();
    let prepared = supermarket();
    let view = FilteredView::all(&prepared);
    let out = workspace.path().join("filtered.csv");
    export::write_filtered(&view, Some(out.as_path()), b',').expect("export");

    let bytes = std::fs::read(&out).expect("read export");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));

    let reloaded = source::load(&DataSource::Upload(out), &LoadOptions::default()).expect("reload");
    let normalized = schema::normalize(reloaded.dataset.clone(), &SchemaProfile::retail());
    for field in [
        CanonicalField::Amount,
        CanonicalField::Date,
        CanonicalField::Region,
        CanonicalField::TransactionId,
    ] {
        let before = view
            .rows
            .iter()
            .map(|row| prepared.table().field_value(*row, field).cloned())
            .collect::<Vec<_>>();
        let after = (0..normalized.dataset.row_count())
            .map(|row| normalized.field_value(row, field).cloned())
            .collect::<Vec<_>>();
        assert_eq!(before, after, "{field} differs after the round trip");
    }

    let again = session::prepare(&reloaded, &DashboardConfig::default()).expect("prepare reload");
    let all_rows = (0..again.dataset().row_count()).collect::<Vec<_>>();
    assert_eq!(derived_values(&prepared, &view.rows), derived_values(&again, &all_rows));
}

#[test]
fn timestamp_buckets_survive_export_and_reload() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "online.csv",
        "InvoiceNo,InvoiceDate,Quantity,UnitPrice,Total\n\
         536365,12/1/2010 8:26,6,2.55,15.3\n\
         536366,12/1/2010 19:05,2,1.85,3.7\n",
    );
    let loaded = source::load(&DataSource::Upload(input), &LoadOptions::default()).expect("load");
    let prepared = session::prepare(&loaded, &DashboardConfig::default()).expect("prepare");
    let view = FilteredView::all(&prepared);
    let out = workspace.path().join("online_filtered.csv");
    export::write_filtered(&view, Some(out.as_path()), b',').expect("export");

    let reloaded = source::load(&DataSource::Upload(out), &LoadOptions::default()).expect("reload");
    let again = session::prepare(&reloaded, &DashboardConfig::default()).expect("prepare reload");
    assert!(!again.mapping().is_resolved(CanonicalField::Time));
    let bucket = again
        .features()
        .column(DerivedField::TimeBucket)
        .expect("bucket column");
    let buckets = (0..again.dataset().row_count())
        .map(|row| again.dataset().cell(row, bucket).map(Value::as_display))
        .collect::<Vec<_>>();
    assert_eq!(buckets, vec![Some("Morning".to_string()), Some("Evening".to_string())]);
    assert_eq!(derived_values(&prepared, &view.rows), derived_values(&again, &[0, 1]));
}

#[test]
fn daily_summary_file_lists_each_day() {
    let workspace = TestWorkspace::new();
    let prepared = supermarket();
    let view = FilteredView::all(&prepared);
    let out = workspace.path().join("daily.csv");
    let days = export::write_daily_summary(&view, Some(out.as_path()), b',')
        .expect("summary")
        .expect("date and amount resolved");
    assert_eq!(days, 12);
    let text = std::fs::read_to_string(&out).expect("read summary");
    let mut lines = text.trim_start_matches('\u{feff}').lines();
    assert_eq!(lines.next(), Some("date,sum,mean,count"));
    assert_eq!(lines.next(), Some("2019-01-05,100,100,1"));
}
