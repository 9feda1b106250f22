//! Row-major in-memory table shared by every pipeline stage.
//!
//! Column positions are stable once a dataset is built: later stages rename
//! headers or append derived columns, but never reorder or drop columns, so a
//! column index resolved by the normalizer stays valid to the end.

use std::collections::HashSet;

use crate::data::{Cell, Value, cell_display, is_missing_token, parse_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Temporal,
    Text,
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Builds a dataset from raw text cells. Missing tokens become `None` and
    /// columns whose every present cell is a plain number become numeric.
    pub fn from_text_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut cells = row
                    .into_iter()
                    .map(|raw| {
                        if is_missing_token(&raw) {
                            None
                        } else {
                            Some(Value::Text(raw.trim().to_string()))
                        }
                    })
                    .collect::<Vec<_>>();
                cells.resize(width, None);
                cells
            })
            .collect();
        let mut dataset = Self { headers, rows };
        dataset.infer_numeric_columns();
        dataset
    }

    /// Converts text columns whose every present cell parses as a plain number.
    pub fn infer_numeric_columns(&mut self) {
        for idx in 0..self.column_count() {
            let mut present = 0usize;
            let all_numeric = self.column(idx).flatten().all(|value| {
                present += 1;
                match value {
                    Value::Text(text) => parse_number(text).is_some(),
                    other => other.is_numeric(),
                }
            });
            if present == 0 || !all_numeric {
                continue;
            }
            for row in &mut self.rows {
                if let Some(Some(Value::Text(text))) = row.get(idx) {
                    let parsed = parse_number(text);
                    row[idx] = parsed;
                }
            }
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(|cell| cell.as_ref())
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).and_then(|cell| cell.as_ref()))
    }

    pub fn numeric_column(&self, idx: usize) -> Vec<Option<f64>> {
        self.column(idx)
            .map(|cell| cell.and_then(Value::as_f64))
            .collect()
    }

    pub fn column_kind(&self, idx: usize) -> ColumnKind {
        let mut kind = ColumnKind::Empty;
        for value in self.column(idx).flatten() {
            let current = if value.is_numeric() {
                ColumnKind::Numeric
            } else if value.is_temporal() {
                ColumnKind::Temporal
            } else {
                return ColumnKind::Text;
            };
            kind = match kind {
                ColumnKind::Empty => current,
                existing if existing == current => existing,
                _ => return ColumnKind::Text,
            };
        }
        kind
    }

    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.column_count())
            .filter(|idx| self.column_kind(*idx) == ColumnKind::Numeric)
            .collect()
    }

    pub fn missing_count(&self, idx: usize) -> usize {
        self.column(idx).filter(|cell| cell.is_none()).count()
    }

    pub fn total_missing(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().filter(|cell| cell.is_none()).count())
            .sum()
    }

    /// Appends a column named `name`, or overwrites it when a column with that
    /// exact name already exists. Returns the column index.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) -> usize {
        match self.column_index(name) {
            Some(idx) => {
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row[idx] = cell;
                }
                idx
            }
            None => self.push_column(name.to_string(), cells),
        }
    }

    pub fn push_column(&mut self, name: String, cells: Vec<Cell>) -> usize {
        self.headers.push(name);
        let width = self.headers.len();
        let mut cells = cells.into_iter();
        for row in &mut self.rows {
            row.resize(width - 1, None);
            row.push(cells.next().flatten());
        }
        width - 1
    }

    /// Returns `base`, or `base_1`, `base_2`, ... when `base` is already taken.
    pub fn unique_header(&self, base: &str) -> String {
        let taken = self
            .headers
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Keeps rows for which `keep(index, row)` returns true. Returns the number removed.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(usize, &[Cell]) -> bool,
    {
        let before = self.rows.len();
        let mut idx = 0usize;
        self.rows.retain(|row| {
            let kept = keep(idx, row);
            idx += 1;
            kept
        });
        before - self.rows.len()
    }

    pub fn display_row(&self, row: usize) -> Vec<String> {
        self.rows
            .get(row)
            .map(|cells| cells.iter().map(cell_display).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn from_text_rows_infers_numeric_columns_and_missing_markers() {
        let dataset = Dataset::from_text_rows(
            headers(&["id", "amount", "city"]),
            rows(&[&["1", "10.5", "Yangon"], &["2", "NA", "Mandalay"]]),
        );
        assert_eq!(dataset.column_kind(0), ColumnKind::Numeric);
        assert_eq!(dataset.column_kind(1), ColumnKind::Numeric);
        assert_eq!(dataset.column_kind(2), ColumnKind::Text);
        assert_eq!(dataset.cell(1, 1), None);
        assert_eq!(dataset.cell(0, 1), Some(&Value::Float(10.5)));
    }

    #[test]
    fn short_rows_are_padded_with_missing_cells() {
        let dataset =
            Dataset::from_text_rows(headers(&["a", "b"]), rows(&[&["x"], &["y", "z"]]));
        assert_eq!(dataset.rows[0].len(), 2);
        assert_eq!(dataset.missing_count(1), 1);
    }

    #[test]
    fn set_column_overwrites_existing_names() {
        let mut dataset = Dataset::from_text_rows(headers(&["a"]), rows(&[&["1"], &["2"]]));
        let first = dataset.set_column("b", vec![Some(Value::Integer(5)), None]);
        let second = dataset.set_column("b", vec![None, Some(Value::Integer(6))]);
        assert_eq!(first, second);
        assert_eq!(dataset.column_count(), 2);
        assert_eq!(dataset.cell(1, 1), Some(&Value::Integer(6)));
    }

    #[test]
    fn unique_header_appends_suffixes() {
        let dataset = Dataset::new(headers(&["date", "date_1"]));
        assert_eq!(dataset.unique_header("date"), "date_2");
        assert_eq!(dataset.unique_header("year_month"), "year_month");
    }
}
