//! Rule-based narrative observations.
//!
//! [`InsightContext::from_view`] gathers every aggregate and coefficient the
//! rules read; [`generate`] then walks the rules in a fixed order. Rules never
//! touch the table itself, so a context can also be built by hand.

use std::fmt;

use serde::Serialize;

use crate::{
    aggregate::{self, ColumnRef, Kpis, MetricSpec},
    data::format_thousands,
    derive::{DerivedField, TimeBucket},
    filter::FilteredView,
    frequency::{self, ShareRow},
    schema::CanonicalField,
    stats::{CorrelationMatrix, PREFERRED_CORRELATION_COLUMNS},
};

pub const DOMINANT_CATEGORY_SHARE: f64 = 0.60;
pub const REGION_GAP_RATIO: f64 = 1.5;
pub const WEEKDAY_GAP_RATIO: f64 = 1.3;
pub const NEAR_IDENTITY_CORRELATION: f64 = 0.95;
pub const MEANINGFUL_CORRELATION: f64 = 0.5;
pub const STRONG_CORRELATION: f64 = 0.7;
pub const NEGLIGIBLE_CORRELATION: f64 = 0.1;

pub const NO_DATA_MESSAGE: &str =
    "No rows match the current filters. Adjust the filters and check again.";
pub const NO_PATTERN_MESSAGE: &str =
    "No clear pattern stands out under the current filters. Try another filter combination.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    NoData,
    KpiSummary,
    AverageTicket,
    AverageRating,
    DominantCategory,
    TopRegion,
    RegionGap,
    TopBranch,
    BestRatedRegion,
    GenderShare,
    PeakTimeBucket,
    WeekdayGap,
    LeadingSegment,
    PriceMatchesTicket,
    QuantityIndependent,
    PriceDrivesRevenue,
    RatingIndependent,
    StrongPair,
    NoPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub text: String,
}

impl Insight {
    fn new(kind: InsightKind, text: String) -> Self {
        Self { kind, text }
    }
}

impl fmt::Display for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Totals keyed by group label, largest first.
pub type Ranked = Vec<(String, f64)>;

/// Everything the rules read, computed once from a filtered view.
#[derive(Debug, Clone, Default)]
pub struct InsightContext {
    pub rows: usize,
    pub kpis: Kpis,
    pub category_totals: Option<Ranked>,
    pub region_totals: Option<Ranked>,
    pub branch_totals: Option<Ranked>,
    pub region_ratings: Option<Ranked>,
    pub gender_totals: Option<Ranked>,
    pub bucket_totals: Option<Ranked>,
    /// Weekday totals in calendar order, not ranked.
    pub weekday_totals: Option<Vec<(String, f64)>>,
    pub segment_shares: Option<Vec<ShareRow>>,
    pub correlations: Vec<Correlation>,
}

/// One coefficient between two addressed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub left_label: String,
    pub right_label: String,
    pub r: f64,
}

impl InsightContext {
    pub fn from_view(view: &FilteredView<'_>, matrix: &CorrelationMatrix) -> Self {
        let table = view.table;
        let ranked = |dimension: ColumnRef, metric: MetricSpec| {
            aggregate::group_by(view, &[dimension], &[metric])
                .filter(|agg| !agg.is_empty())
                .map(|agg| agg.top_n(0, agg.rows.len()).series())
        };
        let amount = || MetricSpec::sum(ColumnRef::Field(CanonicalField::Amount), "total");
        let field = ColumnRef::Field;

        let bucket_totals = ranked(ColumnRef::Derived(DerivedField::TimeBucket), amount())
            .filter(|totals| {
                totals
                    .iter()
                    .any(|(bucket, _)| bucket != TimeBucket::Unknown.label())
            });
        let weekday_totals = aggregate::amount_by(view, ColumnRef::Derived(DerivedField::DayName))
            .filter(|agg| !agg.is_empty())
            .map(|agg| agg.series());
        let segment_shares = table
            .mapping()
            .column(CanonicalField::CustomerSegment)
            .map(|column| frequency::value_shares(view, column))
            .filter(|shares| !shares.is_empty());

        // Label every correlated column by the meaning it carries, when it has one.
        let refs = matrix
            .columns
            .iter()
            .map(|column| {
                PREFERRED_CORRELATION_COLUMNS
                    .into_iter()
                    .find(|reference| table.column_of(*reference) == Some(*column))
                    .unwrap_or(ColumnRef::Column(*column))
            })
            .collect::<Vec<_>>();
        let correlations = matrix
            .pairs()
            .into_iter()
            .map(|(i, j, r)| Correlation {
                left: refs[i],
                right: refs[j],
                left_label: matrix.labels[i].clone(),
                right_label: matrix.labels[j].clone(),
                r,
            })
            .collect();

        Self {
            rows: view.len(),
            kpis: aggregate::kpis(view),
            category_totals: ranked(field(CanonicalField::Category), amount()),
            region_totals: ranked(field(CanonicalField::Region), amount()),
            branch_totals: ranked(field(CanonicalField::Branch), amount()),
            region_ratings: ranked(
                field(CanonicalField::Region),
                MetricSpec::mean(field(CanonicalField::Rating), "rating"),
            ),
            gender_totals: ranked(field(CanonicalField::Gender), amount()),
            bucket_totals,
            weekday_totals,
            segment_shares,
            correlations,
        }
    }

    /// Coefficient between two columns, in either order.
    pub fn correlation(&self, a: ColumnRef, b: ColumnRef) -> Option<f64> {
        self.correlations
            .iter()
            .find(|c| (c.left == a && c.right == b) || (c.left == b && c.right == a))
            .map(|c| c.r)
    }
}

fn money(value: f64) -> String {
    format_thousands(value, 0)
}

fn share_of(value: f64, totals: &[(String, f64)]) -> Option<f64> {
    let total: f64 = totals.iter().map(|(_, v)| v).sum();
    (total > 0.0).then(|| value / total)
}

/// Runs every rule in order. An empty view yields only the no-data message;
/// when no rule fires the no-pattern message is returned instead.
pub fn generate(context: &InsightContext) -> Vec<Insight> {
    if context.rows == 0 {
        return vec![Insight::new(InsightKind::NoData, NO_DATA_MESSAGE.to_string())];
    }
    let rules: [fn(&InsightContext, &mut Vec<Insight>); 14] = [
        kpi_summary,
        average_ticket,
        average_rating,
        dominant_category,
        region_rules,
        top_branch,
        best_rated_region,
        gender_share,
        peak_time_bucket,
        weekday_gap,
        leading_segment,
        price_correlations,
        rating_independent,
        strong_pairs,
    ];
    let mut insights = Vec::new();
    for rule in rules {
        rule(context, &mut insights);
    }
    if insights.is_empty() {
        insights.push(Insight::new(
            InsightKind::NoPattern,
            NO_PATTERN_MESSAGE.to_string(),
        ));
    }
    insights
}

fn kpi_summary(context: &InsightContext, out: &mut Vec<Insight>) {
    let (Some(total), Some(orders)) = (context.kpis.total_amount, context.kpis.orders) else {
        return;
    };
    out.push(Insight::new(
        InsightKind::KpiSummary,
        format!(
            "Total sales under the current filters are about {} across {} transaction(s). \
             Use this window as the baseline for sales and order targets.",
            money(total),
            format_thousands(orders as f64, 0)
        ),
    ));
}

fn average_ticket(context: &InsightContext, out: &mut Vec<Insight>) {
    if let Some(ticket) = context.kpis.mean_avg_ticket {
        out.push(Insight::new(
            InsightKind::AverageTicket,
            format!(
                "The average ticket per order is about {}. Bundles and upselling are the levers \
                 for raising it.",
                money(ticket)
            ),
        ));
    }
}

fn average_rating(context: &InsightContext, out: &mut Vec<Insight>) {
    if let Some(rating) = context.kpis.mean_rating {
        out.push(Insight::new(
            InsightKind::AverageRating,
            format!(
                "The overall average rating is {rating:.2}. Study what keeps highly rated \
                 segments there and carry it to the others."
            ),
        ));
    }
}

fn dominant_category(context: &InsightContext, out: &mut Vec<Insight>) {
    let Some(totals) = &context.category_totals else {
        return;
    };
    let Some((category, value)) = totals.first() else {
        return;
    };
    if let Some(share) = share_of(*value, totals)
        && share >= DOMINANT_CATEGORY_SHARE
    {
        out.push(Insight::new(
            InsightKind::DominantCategory,
            format!(
                "{category} accounts for {:.1}% of sales. Revenue depends heavily on one \
                 category; consider diversifying the assortment.",
                share * 100.0
            ),
        ));
    }
}

fn region_rules(context: &InsightContext, out: &mut Vec<Insight>) {
    let Some(totals) = &context.region_totals else {
        return;
    };
    let Some((top, top_value)) = totals.first() else {
        return;
    };
    let share = share_of(*top_value, totals).unwrap_or(0.0);
    out.push(Insight::new(
        InsightKind::TopRegion,
        format!(
            "{top} leads regional sales with about {} ({:.1}% of the total). Prioritize \
             stock, marketing and staffing there.",
            money(*top_value),
            share * 100.0
        ),
    ));
    if totals.len() >= 2
        && let Some((bottom, bottom_value)) = totals.last()
        && *bottom_value > 0.0
        && *top_value >= *bottom_value * REGION_GAP_RATIO
    {
        out.push(Insight::new(
            InsightKind::RegionGap,
            format!(
                "The gap between the top region ({top}) and the bottom region ({bottom}) is \
                 wide. {bottom} is a candidate for promotions and pricing tests."
            ),
        ));
    }
}

fn top_branch(context: &InsightContext, out: &mut Vec<Insight>) {
    let Some(totals) = &context.branch_totals else {
        return;
    };
    if let Some((branch, value)) = totals.first() {
        let share = share_of(*value, totals).unwrap_or(0.0);
        out.push(Insight::new(
            InsightKind::TopBranch,
            format!(
                "Branch {branch} records the highest sales (about {}, {:.1}% of the total). \
                 Benchmark its product mix and operations.",
                money(*value),
                share * 100.0
            ),
        ));
    }
}

fn best_rated_region(context: &InsightContext, out: &mut Vec<Insight>) {
    if let Some((region, rating)) = context.region_ratings.as_ref().and_then(|r| r.first()) {
        out.push(Insight::new(
            InsightKind::BestRatedRegion,
            format!(
                "{region} has the highest average rating at {rating:.2}. Use its offer as the \
                 reference for other regions."
            ),
        ));
    }
}

fn gender_share(context: &InsightContext, out: &mut Vec<Insight>) {
    let Some(totals) = &context.gender_totals else {
        return;
    };
    if let Some((gender, value)) = totals.first()
        && let Some(share) = share_of(*value, totals)
    {
        out.push(Insight::new(
            InsightKind::GenderShare,
            format!(
                "About {:.1}% of sales come from {gender} customers. Promotions and \
                 recommendations aimed at them are likely to pay off.",
                share * 100.0
            ),
        ));
    }
}

fn peak_time_bucket(context: &InsightContext, out: &mut Vec<Insight>) {
    if let Some((bucket, _)) = context.bucket_totals.as_ref().and_then(|b| b.first()) {
        out.push(Insight::new(
            InsightKind::PeakTimeBucket,
            format!(
                "Sales peak in the {bucket} time slot. Schedule coupons and notifications \
                 around it."
            ),
        ));
    }
}

fn weekday_gap(context: &InsightContext, out: &mut Vec<Insight>) {
    let Some(totals) = &context.weekday_totals else {
        return;
    };
    if totals.len() < 2 {
        return;
    }
    // First occurrence wins on ties, in calendar order.
    let mut best = &totals[0];
    let mut worst = &totals[0];
    for entry in &totals[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
        if entry.1 < worst.1 {
            worst = entry;
        }
    }
    if best.1 > 0.0 && best.1 >= worst.1 * WEEKDAY_GAP_RATIO {
        out.push(Insight::new(
            InsightKind::WeekdayGap,
            format!(
                "Sales vary strongly by weekday: {} is the strongest day and {} the weakest. \
                 Run limited offers on weak days and staff up on strong ones.",
                best.0, worst.0
            ),
        ));
    }
}

fn leading_segment(context: &InsightContext, out: &mut Vec<Insight>) {
    if let Some(top) = context.segment_shares.as_ref().and_then(|s| s.first()) {
        out.push(Insight::new(
            InsightKind::LeadingSegment,
            format!(
                "{} is the largest customer segment at {:.1}% of transactions. Dedicated \
                 benefits for it support repeat visits.",
                top.value,
                top.share * 100.0
            ),
        ));
    }
}

fn price_correlations(context: &InsightContext, out: &mut Vec<Insight>) {
    let price = ColumnRef::Field(CanonicalField::UnitPrice);
    let quantity = ColumnRef::Field(CanonicalField::Quantity);
    let rating = ColumnRef::Field(CanonicalField::Rating);
    let amount = ColumnRef::Field(CanonicalField::Amount);
    let income = ColumnRef::Field(CanonicalField::GrossIncome);
    let ticket = ColumnRef::Derived(DerivedField::AvgTicket);

    if let Some(r) = context.correlation(price, ticket)
        && r > NEAR_IDENTITY_CORRELATION
    {
        out.push(Insight::new(
            InsightKind::PriceMatchesTicket,
            format!(
                "Unit price and average ticket are almost identical (r = {r:.2}). Price \
                 changes translate directly into ticket size."
            ),
        ));
    }

    let quantity_r = context
        .correlation(quantity, price)
        .or_else(|| context.correlation(quantity, rating));
    if let Some(r) = quantity_r
        && r.abs() < NEGLIGIBLE_CORRELATION
    {
        out.push(Insight::new(
            InsightKind::QuantityIndependent,
            format!(
                "Quantity per order barely moves with price or rating (r = {r:.2}). \
                 Basket size is driven by something else."
            ),
        ));
    }

    let revenue_r = context
        .correlation(price, amount)
        .or_else(|| context.correlation(price, income));
    if let Some(r) = revenue_r
        && r >= MEANINGFUL_CORRELATION
    {
        out.push(Insight::new(
            InsightKind::PriceDrivesRevenue,
            format!(
                "Higher unit prices go with higher revenue (r = {r:.2}). Premium products \
                 carry a large part of sales."
            ),
        ));
    }
}

fn rating_independent(context: &InsightContext, out: &mut Vec<Insight>) {
    let rating = ColumnRef::Field(CanonicalField::Rating);
    let amount = ColumnRef::Field(CanonicalField::Amount);
    if let Some(r) = context.correlation(rating, amount)
        && r.abs() < NEGLIGIBLE_CORRELATION
    {
        out.push(Insight::new(
            InsightKind::RatingIndependent,
            format!(
                "Ratings are almost unrelated to order value (r = {r:.2}). Satisfaction \
                 does not depend on how much customers spend."
            ),
        ));
    }
}

fn strong_pairs(context: &InsightContext, out: &mut Vec<Insight>) {
    let strong = context
        .correlations
        .iter()
        .filter(|c| c.r.abs() >= STRONG_CORRELATION)
        .map(|c| format!("{} / {} (r = {:.2})", c.left_label, c.right_label, c.r))
        .collect::<Vec<_>>();
    if !strong.is_empty() {
        out.push(Insight::new(
            InsightKind::StrongPair,
            format!("Strongly correlated pairs: {}.", strong.join(", ")),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> InsightContext {
        InsightContext {
            rows: 10,
            ..InsightContext::default()
        }
    }

    fn kinds(insights: &[Insight]) -> Vec<InsightKind> {
        insights.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn empty_view_yields_only_no_data() {
        let insights = generate(&InsightContext::default());
        assert_eq!(kinds(&insights), vec![InsightKind::NoData]);
    }

    #[test]
    fn nothing_available_falls_back_to_no_pattern() {
        assert_eq!(kinds(&generate(&base())), vec![InsightKind::NoPattern]);
    }

    #[test]
    fn dominant_category_needs_sixty_percent() {
        let mut context = base();
        context.category_totals = Some(vec![("A".into(), 96.0), ("B".into(), 4.0)]);
        assert!(kinds(&generate(&context)).contains(&InsightKind::DominantCategory));
        context.category_totals = Some(vec![("A".into(), 50.0), ("B".into(), 50.0)]);
        assert!(!kinds(&generate(&context)).contains(&InsightKind::DominantCategory));
    }

    #[test]
    fn region_gap_requires_positive_bottom() {
        let mut context = base();
        context.region_totals = Some(vec![("Seoul".into(), 300.0), ("Busan".into(), 100.0)]);
        let found = kinds(&generate(&context));
        assert_eq!(found, vec![InsightKind::TopRegion, InsightKind::RegionGap]);
        context.region_totals = Some(vec![("Seoul".into(), 300.0), ("Busan".into(), 0.0)]);
        assert!(!kinds(&generate(&context)).contains(&InsightKind::RegionGap));
    }

    #[test]
    fn weekday_gap_uses_ratio() {
        let mut context = base();
        context.weekday_totals = Some(vec![("Monday".into(), 100.0), ("Tuesday".into(), 120.0)]);
        assert!(!kinds(&generate(&context)).contains(&InsightKind::WeekdayGap));
        context.weekday_totals = Some(vec![("Monday".into(), 100.0), ("Tuesday".into(), 130.0)]);
        let insights = generate(&context);
        assert!(insights[0].text.contains("Tuesday is the strongest"));
    }

    #[test]
    fn correlation_rules_read_either_order() {
        let mut context = base();
        context.correlations = vec![Correlation {
            left: ColumnRef::Derived(DerivedField::AvgTicket),
            right: ColumnRef::Field(CanonicalField::UnitPrice),
            left_label: "avg_ticket".into(),
            right_label: "Unit price".into(),
            r: 0.98,
        }];
        let found = kinds(&generate(&context));
        assert_eq!(
            found,
            vec![InsightKind::PriceMatchesTicket, InsightKind::StrongPair]
        );
    }
}
