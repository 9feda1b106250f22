use proptest::prelude::*;
use sales_lens::{
    aggregate::month_over_month,
    clean::{iqr_bounds, quantile},
    data::{Value, parse_clock_hour},
    derive::{TimeBucket, average_ticket, time_bucket},
};

proptest! {
    #[test]
    fn bucket_depends_only_on_hour(hour in 0u32..24) {
        let label = time_bucket(Some(hour));
        prop_assert_eq!(label, time_bucket(Some(hour)));
        prop_assert_eq!(label, TimeBucket::from_hour(Some(hour)).label());
        prop_assert_ne!(label, "Unknown");
    }

    #[test]
    fn twenty_four_hour_clock_round_trips(hour in 0u32..24, minute in 0u32..60) {
        let text = format!("{hour:02}:{minute:02}");
        prop_assert_eq!(parse_clock_hour(&text), Some(hour));
    }

    #[test]
    fn twelve_hour_clock_matches_twenty_four(hour in 0u32..24, minute in 0u32..60) {
        let (display, marker) = match hour {
            0 => (12, "AM"),
            1..=11 => (hour, "AM"),
            12 => (12, "PM"),
            _ => (hour - 12, "PM"),
        };
        let text = format!("{display}:{minute:02} {marker}");
        prop_assert_eq!(parse_clock_hour(&text), Some(hour));
    }

    #[test]
    fn average_ticket_is_null_without_quantity(amount in -1e6f64..1e6) {
        prop_assert_eq!(average_ticket(Some(amount), Some(0.0)), None);
        prop_assert_eq!(average_ticket(Some(amount), None), None);
    }

    #[test]
    fn iqr_bounds_contain_the_middle_half(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
        let (low, high) = iqr_bounds(&values, 1.5).expect("bounds");
        let q1 = quantile(&values, 0.25).expect("q1");
        let q3 = quantile(&values, 0.75).expect("q3");
        prop_assert!(low <= q1 && q3 <= high);
    }

    #[test]
    fn first_period_never_has_growth(values in prop::collection::vec(prop::option::of(0f64..1e6), 1..24)) {
        let growth = month_over_month(&values);
        prop_assert_eq!(growth.len(), values.len());
        prop_assert_eq!(growth[0], None);
    }

    #[test]
    fn numbers_pick_the_narrowest_variant(value in -1e9f64..1e9) {
        match Value::number(value) {
            Value::Integer(i) => prop_assert_eq!(i as f64, value),
            Value::Float(f) => prop_assert!(f.fract() != 0.0),
            other => prop_assert!(false, "unexpected {other:?}"),
        }
    }
}

#[test]
fn iqr_rule_flags_the_extreme_value() {
    let (_, high) = iqr_bounds(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0], 1.5).expect("bounds");
    assert!(high < 100.0);
    assert!(high >= 5.0);
    assert_eq!(time_bucket(Some(10)), "Morning");
    assert_eq!(time_bucket(Some(23)), "Night");
    assert_eq!(time_bucket(None), "Unknown");
    assert_eq!(average_ticket(Some(100.0), Some(4.0)), Some(25.0));
}
