use std::collections::HashMap;

use serde::Serialize;

use crate::filter::FilteredView;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareRow {
    pub value: String,
    pub count: usize,
    /// Fraction of non-missing rows, in `0.0..=1.0`.
    pub share: f64,
}

/// Row counts per distinct value of `column`, most frequent first. Missing
/// cells are not counted; ties keep first-appearance order.
pub fn value_shares(view: &FilteredView<'_>, column: usize) -> Vec<ShareRow> {
    let mut accumulator = FrequencyAccumulator::default();
    for value in view.values(column).flatten() {
        accumulator.ingest(value.as_display());
    }
    accumulator.render_rows(0)
}

#[derive(Default)]
struct FrequencyAccumulator {
    total: usize,
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl FrequencyAccumulator {
    fn ingest(&mut self, value: String) {
        self.total += 1;
        match self.counts.get_mut(&value) {
            Some(count) => *count += 1,
            None => {
                self.order.push(value.clone());
                self.counts.insert(value, 1);
            }
        }
    }

    /// `top == 0` keeps every value.
    fn render_rows(&self, top: usize) -> Vec<ShareRow> {
        if self.total == 0 {
            return Vec::new();
        }
        let mut items = self
            .order
            .iter()
            .map(|value| (value, self.counts.get(value).copied().unwrap_or_default()))
            .collect::<Vec<_>>();
        items.sort_by(|a, b| b.1.cmp(&a.1));
        if top > 0 && items.len() > top {
            items.truncate(top);
        }
        items
            .into_iter()
            .map(|(value, count)| ShareRow {
                value: value.clone(),
                count,
                share: count as f64 / self.total as f64,
            })
            .collect()
    }
}

pub fn format_percent(share: f64) -> String {
    format!("{:.2}%", share * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_orders_by_count_then_first_appearance() {
        let mut accumulator = FrequencyAccumulator::default();
        for value in ["Member", "Normal", "Normal", "Member", "VIP"] {
            accumulator.ingest(value.to_string());
        }
        let rows = accumulator.render_rows(0);
        assert_eq!(rows[0].value, "Member");
        assert_eq!(rows[1].value, "Normal");
        assert_eq!(rows[2].value, "VIP");
        assert!((rows[2].share - 0.2).abs() < 1e-12);
        assert_eq!(accumulator.render_rows(1).len(), 1);
    }

    #[test]
    fn percent_format_has_two_decimals() {
        assert_eq!(format_percent(0.5), "50.00%");
    }
}
