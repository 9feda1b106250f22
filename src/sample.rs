//! Seeded synthetic order data used when no file is supplied.
//!
//! The generator is deterministic: the same seed always yields the same rows,
//! so reports over the sample are reproducible across runs.

use chrono::{Duration, NaiveDate};
use rand::{
    Rng, SeedableRng,
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
};

use crate::{data::Value, dataset::Dataset};

pub const SAMPLE_SEED: u64 = 42;

pub const SAMPLE_COLUMNS: &[&str] = &[
    "order_id",
    "order_date",
    "product",
    "category",
    "quantity",
    "unit_price",
    "total_amount",
    "region",
    "customer_tier",
];

const PRODUCTS: &[(&str, &str, i64)] = &[
    ("Laptop", "Electronics", 1_200_000),
    ("Smartphone", "Electronics", 800_000),
    ("Tablet", "Electronics", 500_000),
    ("Earphones", "Accessories", 150_000),
    ("Keyboard", "Accessories", 80_000),
    ("Mouse", "Accessories", 50_000),
    ("Monitor", "Electronics", 350_000),
    ("Charger", "Accessories", 30_000),
];

const REGIONS: &[&str] = &[
    "Seoul", "Gyeonggi", "Busan", "Daegu", "Incheon", "Gwangju", "Daejeon",
];

const TIERS: &[&str] = &["Regular", "VIP", "Gold"];
const TIER_WEIGHTS: &[f64] = &[0.6, 0.3, 0.1];

const FIRST_ORDER_ID: u64 = 1000;
const ORDERS_PER_DAY: std::ops::Range<u32> = 10..30;
const QUANTITY: std::ops::RangeInclusive<i64> = 1..=3;

fn sample_period() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default(),
        NaiveDate::from_ymd_opt(2024, 10, 31).unwrap_or_default(),
    )
}

pub fn generate() -> Dataset {
    generate_with_seed(SAMPLE_SEED)
}

pub fn generate_with_seed(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    // Weights are constant and positive.
    let tiers = WeightedIndex::new(TIER_WEIGHTS).ok();
    let (start, end) = sample_period();

    let mut dataset = Dataset::new(SAMPLE_COLUMNS.iter().map(|c| c.to_string()).collect());
    let mut order_id = FIRST_ORDER_ID;
    let mut date = start;
    while date <= end {
        let orders = rng.gen_range(ORDERS_PER_DAY);
        for _ in 0..orders {
            let (product, category, price) = PRODUCTS[rng.gen_range(0..PRODUCTS.len())];
            let quantity = rng.gen_range(QUANTITY);
            let region = REGIONS[rng.gen_range(0..REGIONS.len())];
            let tier = tiers
                .as_ref()
                .map(|dist| TIERS[dist.sample(&mut rng)])
                .unwrap_or(TIERS[0]);
            dataset.rows.push(vec![
                Some(Value::Text(format!("ORD{order_id}"))),
                Some(Value::Date(date)),
                Some(Value::Text(product.to_string())),
                Some(Value::Text(category.to_string())),
                Some(Value::Integer(quantity)),
                Some(Value::Integer(price)),
                Some(Value::Integer(price * quantity)),
                Some(Value::Text(region.to_string())),
                Some(Value::Text(tier.to_string())),
            ]);
            order_id += 1;
        }
        date += Duration::days(1);
    }
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_for_a_seed() {
        assert_eq!(generate(), generate());
        assert_ne!(generate_with_seed(7).rows, generate().rows);
    }

    #[test]
    fn sample_covers_the_full_period_with_bounded_daily_volume() {
        let dataset = generate();
        let days = 184;
        assert!(dataset.row_count() >= days * 10);
        assert!(dataset.row_count() <= days * 29);
        let (start, end) = sample_period();
        assert_eq!(dataset.cell(0, 1), Some(&Value::Date(start)));
        let last = dataset.row_count() - 1;
        assert_eq!(dataset.cell(last, 1), Some(&Value::Date(end)));
        assert_eq!(dataset.cell(0, 0), Some(&Value::Text("ORD1000".into())));
    }

    #[test]
    fn totals_are_price_times_quantity() {
        let dataset = generate();
        for row in 0..dataset.row_count() {
            let quantity = dataset.cell(row, 4).and_then(Value::as_f64).unwrap();
            let price = dataset.cell(row, 5).and_then(Value::as_f64).unwrap();
            let total = dataset.cell(row, 6).and_then(Value::as_f64).unwrap();
            assert!((1.0..=3.0).contains(&quantity));
            assert_eq!(total, price * quantity);
        }
    }
}
