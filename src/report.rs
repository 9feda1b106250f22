//! Terminal rendering of a [`DashboardReport`].

use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::{
    aggregate::Aggregate,
    data::format_thousands,
    frequency::{ShareRow, format_percent},
    session::{BasicInfo, DashboardMode, DashboardReport, MappingRow},
    stats::{ColumnSummary, CorrelationMatrix},
    table::{render_pairs, render_table},
};

const HEAT_GLYPHS: [char; 5] = [' ', '░', '▒', '▓', '█'];

/// Shade for `r` on a scale running from `floor` (blank) to 1 (solid).
pub fn heat_glyph(r: f64, floor: f64) -> char {
    let span = 1.0 - floor;
    if !r.is_finite() || span <= 0.0 {
        return HEAT_GLYPHS[0];
    }
    let position = ((r.clamp(floor, 1.0) - floor) / span * (HEAT_GLYPHS.len() - 1) as f64).round();
    HEAT_GLYPHS[(position as usize).min(HEAT_GLYPHS.len() - 1)]
}

fn money(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format_thousands(v, 0))
}

fn decimal(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format_thousands(v, 2))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n== {title} ==");
}

pub fn render_basic_info(info: &BasicInfo) -> String {
    let mut out = render_pairs(&[
        ("Rows".into(), format_thousands(info.rows as f64, 0)),
        ("Columns".into(), info.columns.to_string()),
        ("Missing values".into(), format_thousands(info.total_missing as f64, 0)),
    ]);
    out.push('\n');
    let rows = info
        .column_info
        .iter()
        .map(|column| {
            vec![
                column.name.clone(),
                column.kind.to_string(),
                column.missing.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    out.push_str(&render_table(&strings(&["column", "type", "missing"]), &rows));
    out
}

pub fn render_mapping(mapping: &[MappingRow]) -> String {
    let rows = mapping
        .iter()
        .map(|row| {
            vec![
                row.field.name().to_string(),
                row.column.clone().unwrap_or_else(|| "-".into()),
                row.origin.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&strings(&["field", "column", "matched by"]), &rows)
}

fn render_aggregate(aggregate: &Aggregate) -> String {
    let mut headers = aggregate.dimensions.clone();
    headers.extend(aggregate.metrics.iter().cloned());
    let rows = aggregate
        .rows
        .iter()
        .map(|row| {
            let mut cells = row.keys.clone();
            cells.extend(row.values.iter().map(|value| money(*value)));
            cells
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn render_shares(label: &str, shares: &[ShareRow]) -> String {
    let rows = shares
        .iter()
        .map(|row| {
            vec![
                row.value.clone(),
                row.count.to_string(),
                format_percent(row.share),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&strings(&[label, "count", "share"]), &rows)
}

fn render_describe(summaries: &[ColumnSummary]) -> String {
    let rows = summaries
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.count.to_string(),
                decimal(s.mean),
                decimal(s.std_dev),
                decimal(s.min),
                decimal(s.q1),
                decimal(s.median),
                decimal(s.q3),
                decimal(s.max),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &strings(&["column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"]),
        &rows,
    )
}

pub fn render_correlation(matrix: &CorrelationMatrix, floor: f64) -> String {
    let mut headers = vec![String::new()];
    headers.extend(matrix.labels.iter().cloned());
    let rows = matrix
        .labels
        .iter()
        .zip(&matrix.values)
        .map(|(label, values)| {
            let mut cells = vec![label.clone()];
            cells.extend(values.iter().map(|value| match value {
                Some(r) => format!("{r:>5.2} {}", heat_glyph(*r, floor)),
                None => "-".to_string(),
            }));
            cells
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

/// Renders every section the report carries, in dashboard order.
pub fn render(report: &DashboardReport, correlation_floor: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Source: {} (profile '{}')",
        report.source, report.profile
    );

    section(&mut out, "Basic info");
    out.push_str(&render_basic_info(&report.basic));
    section(&mut out, "Column mapping");
    out.push_str(&render_mapping(&report.mapping));

    if report.mode == DashboardMode::BasicInfo {
        let _ = writeln!(
            out,
            "\nSales amount or a date could not be identified (missing: {}). Only basic \
             information is shown; check the column names.",
            report.missing_requirements.join(", ")
        );
        return out;
    }

    section(&mut out, "Cleaning");
    let cleaning = &report.cleaning;
    out.push_str(&render_pairs(&[
        ("Rows before".into(), cleaning.original_rows.to_string()),
        ("Rows after".into(), cleaning.final_rows.to_string()),
        ("Missing values found".into(), cleaning.missing_values.to_string()),
        ("Rows dropped (missing)".into(), cleaning.rows_dropped_missing.to_string()),
        ("Cells filled".into(), cleaning.cells_filled.to_string()),
        ("Duplicates removed".into(), cleaning.duplicates_removed.to_string()),
        ("Outliers removed".into(), cleaning.outliers_removed.to_string()),
        ("Columns coerced".into(), cleaning.coerced_columns.join(", ")),
    ]));

    if let Some(kpis) = &report.kpis {
        section(&mut out, "Key figures");
        let mut pairs: Vec<(String, String)> = vec![
            ("Rows in view".into(), format_thousands(kpis.rows as f64, 0)),
            ("Total sales".into(), money(kpis.total_amount)),
            ("Mean sale".into(), money(kpis.mean_amount)),
            (
                "Orders".into(),
                kpis.orders.map_or_else(|| "-".into(), |v| format_thousands(v as f64, 0)),
            ),
        ];
        if let Some(quantity) = kpis.total_quantity {
            pairs.push(("Units sold".into(), format_thousands(quantity, 0)));
        }
        if let Some(products) = kpis.distinct_products {
            pairs.push(("Products".into(), products.to_string()));
        }
        if let Some(rating) = kpis.mean_rating {
            pairs.push(("Mean rating".into(), format!("{rating:.2}")));
        }
        pairs.push(("Average ticket".into(), money(kpis.mean_avg_ticket)));
        out.push_str(&render_pairs(&pairs));
    }

    if let Some(breakdown) = &report.breakdown {
        let title = format!("Sales by {}", breakdown.time_view.derived_field().label());
        section(&mut out, &title);
        let rows = breakdown
            .rows
            .iter()
            .map(|row| vec![row.period.clone(), row.segment.clone(), money(Some(row.total))])
            .collect::<Vec<_>>();
        out.push_str(&render_table(&strings(&["period", "segment", "total"]), &rows));
    }

    if let Some(monthly) = &report.monthly {
        section(&mut out, "Monthly summary");
        let rows = monthly
            .rows
            .iter()
            .map(|row| {
                vec![
                    row.month.clone(),
                    money(Some(row.total_sales)),
                    money(row.avg_ticket),
                    row.orders.map_or_else(|| "-".into(), |v| v.to_string()),
                    row.mom_growth
                        .map_or_else(|| "-".into(), |g| format!("{g:.1}%")),
                ]
            })
            .collect::<Vec<_>>();
        out.push_str(&render_table(
            &strings(&["month", "total_sales", "avg_ticket", "orders", "mom_growth"]),
            &rows,
        ));
        if let (Some(best), Some(worst)) = (&monthly.best, &monthly.worst) {
            let _ = writeln!(
                out,
                "Best month {} ({}), worst month {} ({}), mean {}",
                best.0,
                money(Some(best.1)),
                worst.0,
                money(Some(worst.1)),
                money(monthly.mean_monthly_sales)
            );
        }
    }

    for (title, aggregate) in [
        ("Top products", &report.top_products),
        ("Sales by category", &report.category_totals),
        ("Sales by region", &report.region_totals),
    ] {
        if let Some(aggregate) = aggregate.as_ref().filter(|agg| !agg.is_empty()) {
            section(&mut out, title);
            out.push_str(&render_aggregate(aggregate));
        }
    }

    for (title, label, shares) in [
        ("Payment methods", "payment", &report.payment_shares),
        ("Customer segments", "segment", &report.segment_shares),
    ] {
        if let Some(shares) = shares.as_ref().filter(|s| !s.is_empty()) {
            section(&mut out, title);
            out.push_str(&render_shares(label, shares));
        }
    }

    if !report.describe.is_empty() {
        section(&mut out, "Statistics");
        out.push_str(&render_describe(&report.describe));
    }

    if !report.correlation.is_empty() {
        section(&mut out, "Correlation");
        out.push_str(&render_correlation(&report.correlation, correlation_floor));
    }

    section(&mut out, "Insights");
    for insight in &report.insights {
        let _ = writeln!(out, "- {insight}");
    }
    out
}

pub fn render_json(report: &DashboardReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Serializing report as JSON")
}
