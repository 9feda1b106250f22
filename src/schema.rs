//! Canonical schema resolution.
//!
//! A [`SchemaProfile`] is an ordered table of canonical fields, each with its
//! exact aliases, fallback substring keywords and a content validator.
//! [`normalize`] resolves the profile once against a raw dataset and records
//! the outcome in a [`ColumnMapping`]; downstream stages only ever look
//! columns up through that mapping.
//!
//! Resolution runs in two passes. The alias pass gives every field its first
//! declared alias present in the input. The keyword pass then visits the
//! still-unresolved fields in profile order, trying each keyword in declared
//! order against the columns not yet claimed by another field. Comparison in
//! both passes uses [`alias_key`], so case and separators never matter.

use std::{
    collections::HashSet,
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, alias_key, cell_to_number, cell_to_temporal},
    dataset::Dataset,
    derive::DerivedField,
};

/// Header of the synthesized row-index column when no transaction id is found.
pub const SYNTHESIZED_ID_HEADER: &str = "transaction_id";
/// Header of the date synthesized from `YEAR` + `MONTH` columns.
pub const SYNTHESIZED_DATE_HEADER: &str = "date";
/// Header of the derived year-month period column.
pub const YEAR_MONTH_HEADER: &str = "year_month";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum CanonicalField {
    TransactionId,
    Date,
    Time,
    Amount,
    Quantity,
    UnitPrice,
    Category,
    Product,
    Region,
    Branch,
    CustomerSegment,
    PaymentMethod,
    Rating,
    GrossIncome,
    Gender,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 15] = [
        CanonicalField::TransactionId,
        CanonicalField::Date,
        CanonicalField::Time,
        CanonicalField::Amount,
        CanonicalField::Quantity,
        CanonicalField::UnitPrice,
        CanonicalField::Category,
        CanonicalField::Product,
        CanonicalField::Region,
        CanonicalField::Branch,
        CanonicalField::CustomerSegment,
        CanonicalField::PaymentMethod,
        CanonicalField::Rating,
        CanonicalField::GrossIncome,
        CanonicalField::Gender,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::TransactionId => "transaction_id",
            CanonicalField::Date => "date",
            CanonicalField::Time => "time",
            CanonicalField::Amount => "amount",
            CanonicalField::Quantity => "quantity",
            CanonicalField::UnitPrice => "unit_price",
            CanonicalField::Category => "category",
            CanonicalField::Product => "product",
            CanonicalField::Region => "region",
            CanonicalField::Branch => "branch",
            CanonicalField::CustomerSegment => "customer_segment",
            CanonicalField::PaymentMethod => "payment_method",
            CanonicalField::Rating => "rating",
            CanonicalField::GrossIncome => "gross_income",
            CanonicalField::Gender => "gender",
        }
    }

    /// Human-readable label used in reports and segment labels.
    pub fn label(self) -> &'static str {
        match self {
            CanonicalField::TransactionId => "Transaction",
            CanonicalField::Date => "Date",
            CanonicalField::Time => "Time",
            CanonicalField::Amount => "Amount",
            CanonicalField::Quantity => "Quantity",
            CanonicalField::UnitPrice => "Unit price",
            CanonicalField::Category => "Category",
            CanonicalField::Product => "Product",
            CanonicalField::Region => "Region",
            CanonicalField::Branch => "Branch",
            CanonicalField::CustomerSegment => "Customer segment",
            CanonicalField::PaymentMethod => "Payment",
            CanonicalField::Rating => "Rating",
            CanonicalField::GrossIncome => "Gross income",
            CanonicalField::Gender => "Gender",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let key = alias_key(name);
        Self::ALL
            .into_iter()
            .find(|field| alias_key(field.name()) == key)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content check a candidate column must pass. The validator also decides how
/// the resolved column is converted in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValidator {
    #[default]
    Any,
    Numeric,
    Temporal,
}

impl FieldValidator {
    fn accepts(self, dataset: &Dataset, column: usize) -> bool {
        match self {
            FieldValidator::Any => true,
            FieldValidator::Numeric => {
                let mut present = 0usize;
                let mut numeric = 0usize;
                for value in dataset.column(column).flatten() {
                    present += 1;
                    if cell_to_number(value).is_some() {
                        numeric += 1;
                    }
                }
                numeric > 0 && numeric * 2 > present
            }
            FieldValidator::Temporal => dataset
                .column(column)
                .flatten()
                .any(|value| cell_to_temporal(value).is_some()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: CanonicalField,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub validator: FieldValidator,
}

impl FieldSpec {
    fn new(
        field: CanonicalField,
        aliases: &[&str],
        keywords: &[&str],
        validator: FieldValidator,
    ) -> Self {
        Self {
            field,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            validator,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaProfile {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_true")]
    pub synthesize_transaction_id: bool,
    #[serde(default = "default_true")]
    pub synthesize_date_from_year_month: bool,
}

impl SchemaProfile {
    pub const BUILT_IN: &'static [&'static str] = &["retail", "generic"];

    /// Supermarket-style exports: exact aliases first, keywords as a fallback.
    pub fn retail() -> Self {
        use CanonicalField::*;
        use FieldValidator::*;
        Self {
            name: "retail".to_string(),
            fields: vec![
                FieldSpec::new(
                    TransactionId,
                    &[
                        "Invoice ID",
                        "InvoiceID",
                        "Invoice_Id",
                        "Order ID",
                        "OrderID",
                        "BillNo",
                        "Bill No",
                        "Customer ID",
                        "Cust ID",
                        "Transaction ID",
                    ],
                    &["invoice", "transaction", "orderid", "billno"],
                    Any,
                ),
                FieldSpec::new(
                    Date,
                    &["Date", "Order Date", "Order_Date", "InvoiceDate", "Invoice Date"],
                    &["date", "day", "날짜", "일자"],
                    Temporal,
                ),
                FieldSpec::new(Time, &["Time", "Order Time", "Invoice Time"], &["time", "hour"], Any),
                FieldSpec::new(
                    Amount,
                    &["Total", "Sales", "Sale", "Amount", "Revenue", "RETAIL SALES"],
                    &["amount", "sales", "total", "revenue", "price", "금액", "매출"],
                    Numeric,
                ),
                FieldSpec::new(Quantity, &["Quantity", "Qty", "QTY"], &["quantity", "qty", "count", "수량", "개수"], Numeric),
                FieldSpec::new(UnitPrice, &["Unit price", "UnitPrice", "Price"], &["unitprice", "price"], Numeric),
                FieldSpec::new(
                    Category,
                    &["Product line", "Category", "Sub-Category", "Item Type"],
                    &["category", "productline", "type", "카테고리", "분류"],
                    Any,
                ),
                FieldSpec::new(
                    Product,
                    &["Product", "Product Name", "Item Description", "Item"],
                    &["product", "item", "name", "제품", "상품"],
                    Any,
                ),
                FieldSpec::new(Region, &["City", "Region", "State"], &["region", "city", "location", "country", "state", "지역", "도시"], Any),
                FieldSpec::new(Branch, &["Branch", "Store", "Warehouse"], &["branch", "store", "shop"], Any),
                FieldSpec::new(
                    CustomerSegment,
                    &["Customer type", "Segment", "Customer Segment", "CustType"],
                    &["segment", "customertype", "tier", "membership"],
                    Any,
                ),
                FieldSpec::new(
                    PaymentMethod,
                    &["Payment", "Payment Method", "PaymentMode", "Pay Mode", "Ship Mode"],
                    &["payment", "paymode"],
                    Any,
                ),
                FieldSpec::new(Rating, &["Rating", "Score", "Customer Rating"], &["rating", "score"], Numeric),
                FieldSpec::new(
                    GrossIncome,
                    &["gross income", "Gross Income", "Profit"],
                    &["grossincome", "profit"],
                    Numeric,
                ),
                FieldSpec::new(Gender, &["Gender", "Sex"], &["gender"], Any),
            ],
            synthesize_transaction_id: true,
            synthesize_date_from_year_month: true,
        }
    }

    /// Keyword-only detection for arbitrary uploads.
    pub fn generic() -> Self {
        use CanonicalField::*;
        use FieldValidator::*;
        Self {
            name: "generic".to_string(),
            fields: vec![
                FieldSpec::new(TransactionId, &[], &["invoice", "order", "transaction", "id"], Any),
                FieldSpec::new(Date, &[], &["date", "time", "day", "날짜", "일자"], Temporal),
                FieldSpec::new(Amount, &[], &["price", "amount", "total", "sales", "금액", "매출"], Numeric),
                FieldSpec::new(Quantity, &[], &["quantity", "qty", "count", "수량", "개수"], Numeric),
                FieldSpec::new(Category, &[], &["category", "type", "카테고리", "분류"], Any),
                FieldSpec::new(Region, &[], &["region", "location", "country", "city", "지역", "도시"], Any),
                FieldSpec::new(Product, &[], &["product", "item", "name", "제품", "상품"], Any),
                FieldSpec::new(CustomerSegment, &[], &["segment", "tier", "grade"], Any),
                FieldSpec::new(PaymentMethod, &[], &["payment"], Any),
            ],
            synthesize_transaction_id: true,
            synthesize_date_from_year_month: true,
        }
    }

    pub fn built_in(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "retail" => Some(Self::retail()),
            "generic" => Some(Self::generic()),
            _ => None,
        }
    }

    /// Resolves `name` as a built-in profile, or else as a path to a YAML profile.
    pub fn resolve(name: &str) -> Result<Self> {
        match Self::built_in(name) {
            Some(profile) => Ok(profile),
            None => Self::load(Path::new(name)),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema profile {path:?}"))?;
        let reader = BufReader::new(file);
        let profile: SchemaProfile =
            serde_yaml::from_reader(reader).context("Parsing schema profile YAML")?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.fields {
            if !seen.insert(spec.field) {
                return Err(anyhow!(
                    "Profile '{}' declares field '{}' more than once",
                    self.name,
                    spec.field
                ));
            }
        }
        Ok(())
    }
}

impl Default for SchemaProfile {
    fn default() -> Self {
        Self::retail()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Alias,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Copied from an input column; `source` is the header as it was found.
    Source {
        column: usize,
        source: String,
        matched_by: MatchKind,
    },
    /// Built by the normalizer and appended to the dataset.
    Synthesized { column: usize },
    Unresolved,
}

impl Resolution {
    pub fn column(&self) -> Option<usize> {
        match self {
            Resolution::Source { column, .. } | Resolution::Synthesized { column } => Some(*column),
            Resolution::Unresolved => None,
        }
    }
}

/// Outcome of resolving a profile against one dataset, in profile field order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMapping {
    entries: Vec<(CanonicalField, Resolution)>,
}

impl ColumnMapping {
    pub fn entries(&self) -> &[(CanonicalField, Resolution)] {
        &self.entries
    }

    pub fn resolution(&self, field: CanonicalField) -> &Resolution {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, resolution)| resolution)
            .unwrap_or(&Resolution::Unresolved)
    }

    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.resolution(field).column()
    }

    pub fn is_resolved(&self, field: CanonicalField) -> bool {
        self.column(field).is_some()
    }

    pub fn synthesized_columns(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter_map(|(_, resolution)| match resolution {
                Resolution::Synthesized { column } => Some(*column),
                _ => None,
            })
            .collect()
    }

    fn set(&mut self, field: CanonicalField, resolution: Resolution) {
        match self.entries.iter_mut().find(|(candidate, _)| *candidate == field) {
            Some(entry) => entry.1 = resolution,
            None => self.entries.push((field, resolution)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub dataset: Dataset,
    pub mapping: ColumnMapping,
    pub profile: String,
}

impl NormalizedTable {
    /// Current header of the column backing `field`.
    pub fn header(&self, field: CanonicalField) -> Option<&str> {
        self.mapping
            .column(field)
            .and_then(|idx| self.dataset.headers.get(idx))
            .map(String::as_str)
    }

    pub fn field_value(&self, row: usize, field: CanonicalField) -> Option<&Value> {
        self.mapping
            .column(field)
            .and_then(|column| self.dataset.cell(row, column))
    }

    /// Aggregation and charts need an amount, a transaction id and a time axis.
    pub fn is_dashboard_ready(&self) -> bool {
        self.mapping.is_resolved(CanonicalField::Amount)
            && self.mapping.is_resolved(CanonicalField::TransactionId)
            && (self.mapping.is_resolved(CanonicalField::Date)
                || self.dataset.column_index(YEAR_MONTH_HEADER).is_some())
    }

    /// Fields whose absence keeps the table out of the full dashboard.
    pub fn missing_requirements(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.mapping.is_resolved(CanonicalField::Amount) {
            missing.push(CanonicalField::Amount.name());
        }
        if !self.mapping.is_resolved(CanonicalField::TransactionId) {
            missing.push(CanonicalField::TransactionId.name());
        }
        if !self.mapping.is_resolved(CanonicalField::Date)
            && self.dataset.column_index(YEAR_MONTH_HEADER).is_none()
        {
            missing.push("date or year_month");
        }
        missing
    }
}

/// Resolves `profile` against `raw`. Never fails: fields without a usable
/// column stay unresolved and the features depending on them are skipped.
pub fn normalize(raw: Dataset, profile: &SchemaProfile) -> NormalizedTable {
    let mut dataset = raw;
    let keys = dataset
        .headers
        .iter()
        .map(|header| alias_key(header))
        .collect::<Vec<_>>();
    let mut mapping = ColumnMapping::default();
    let mut claimed = HashSet::new();

    for spec in &profile.fields {
        let found = spec.aliases.iter().find_map(|alias| {
            let wanted = alias_key(alias);
            keys.iter()
                .position(|key| *key == wanted)
                .filter(|idx| spec.validator.accepts(&dataset, *idx))
        });
        let resolution = match found {
            Some(column) => {
                claimed.insert(column);
                debug!(
                    "{} <- '{}' (alias)",
                    spec.field, dataset.headers[column]
                );
                Resolution::Source {
                    column,
                    source: dataset.headers[column].clone(),
                    matched_by: MatchKind::Alias,
                }
            }
            None => Resolution::Unresolved,
        };
        mapping.set(spec.field, resolution);
    }

    for spec in &profile.fields {
        if mapping.is_resolved(spec.field) {
            continue;
        }
        let found = spec.keywords.iter().find_map(|keyword| {
            let needle = alias_key(keyword);
            if needle.is_empty() {
                return None;
            }
            keys.iter().enumerate().find_map(|(idx, key)| {
                (!claimed.contains(&idx)
                    && !DerivedField::is_derived_header(&dataset.headers[idx])
                    && key.contains(&needle)
                    && spec.validator.accepts(&dataset, idx))
                .then_some(idx)
            })
        });
        if let Some(column) = found {
            claimed.insert(column);
            debug!(
                "{} <- '{}' (keyword)",
                spec.field, dataset.headers[column]
            );
            mapping.set(
                spec.field,
                Resolution::Source {
                    column,
                    source: dataset.headers[column].clone(),
                    matched_by: MatchKind::Keyword,
                },
            );
        }
    }

    for spec in &profile.fields {
        if let Some(column) = mapping.column(spec.field) {
            convert_in_place(&mut dataset, column, spec.validator);
        }
    }

    if profile.synthesize_transaction_id && !mapping.is_resolved(CanonicalField::TransactionId) {
        let header = dataset.unique_header(SYNTHESIZED_ID_HEADER);
        let cells = (0..dataset.row_count())
            .map(|idx| Some(Value::Integer(idx as i64)))
            .collect();
        let column = dataset.push_column(header, cells);
        debug!("{} synthesized from row positions", CanonicalField::TransactionId);
        mapping.set(CanonicalField::TransactionId, Resolution::Synthesized { column });
    }

    if profile.synthesize_date_from_year_month
        && !mapping.is_resolved(CanonicalField::Date)
        && let Some(cells) = year_month_dates(&dataset)
    {
        let header = dataset.unique_header(SYNTHESIZED_DATE_HEADER);
        let column = dataset.push_column(header, cells);
        debug!("{} synthesized from YEAR and MONTH", CanonicalField::Date);
        mapping.set(CanonicalField::Date, Resolution::Synthesized { column });
    }

    let resolved = mapping
        .entries()
        .iter()
        .filter(|(_, resolution)| resolution.column().is_some())
        .count();
    info!(
        "Profile '{}' resolved {} of {} canonical field(s)",
        profile.name,
        resolved,
        mapping.entries().len()
    );

    let table = NormalizedTable {
        dataset,
        mapping,
        profile: profile.name.clone(),
    };
    if !table.is_dashboard_ready() {
        warn!(
            "Dataset lacks {}; only basic information is available",
            table.missing_requirements().join(", ")
        );
    }
    table
}

fn convert_in_place(dataset: &mut Dataset, column: usize, validator: FieldValidator) {
    let convert: fn(&Value) -> Option<Value> = match validator {
        FieldValidator::Any => return,
        FieldValidator::Numeric => cell_to_number,
        FieldValidator::Temporal => cell_to_temporal,
    };
    let mut lost = 0usize;
    for row in &mut dataset.rows {
        if let Some(cell) = row.get_mut(column)
            && let Some(value) = cell.take()
        {
            *cell = convert(&value);
            if cell.is_none() {
                lost += 1;
            }
        }
    }
    if lost > 0 {
        debug!(
            "Column '{}': {lost} cell(s) could not be converted and are now missing",
            dataset.headers[column]
        );
    }
}

/// First-of-month dates from integer-like `YEAR` and `MONTH` columns.
fn year_month_dates(dataset: &Dataset) -> Option<Vec<Option<Value>>> {
    let year = dataset.headers.iter().position(|h| alias_key(h) == "year")?;
    let month = dataset.headers.iter().position(|h| alias_key(h) == "month")?;
    let integer = |value: Option<&Value>| {
        value
            .and_then(cell_to_number)
            .and_then(|v| v.as_f64())
            .filter(|f| f.fract() == 0.0)
    };
    Some(
        (0..dataset.row_count())
            .map(|row| {
                let y = integer(dataset.cell(row, year))?;
                let m = integer(dataset.cell(row, month))?;
                if !(1.0..=12.0).contains(&m) {
                    return None;
                }
                NaiveDate::from_ymd_opt(y as i32, m as u32, 1).map(Value::Date)
            })
            .collect(),
    )
}
