//! Dataset ingestion for every supported source.
//!
//! Delimited text goes through `io_utils`; workbooks are read with calamine
//! (first sheet, first row as header); JSON accepts either an array of records
//! or a column-oriented object.

use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use calamine::{Data, DataType, Reader, open_workbook_auto};
use chrono::Timelike;
use encoding_rs::Encoding;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;

use crate::{
    data::{Cell, Value, is_missing_token, parse_temporal},
    dataset::Dataset,
    error::LoadError,
    io_utils, sample,
};

/// Public datasets the dashboard knows by name. They are never downloaded;
/// selecting one reports where to fetch it manually.
pub const CATALOG_DATASETS: &[&str] = &[
    "carrie1/ecommerce-data",
    "aungpyaeap/supermarket-sales",
    "olistbr/brazilian-ecommerce",
];

pub fn is_catalog_dataset(name: &str) -> bool {
    CATALOG_DATASETS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name.trim()))
}

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "xlsb", "ods"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Sample,
    Upload(PathBuf),
    Catalog(String),
}

impl DataSource {
    /// Interprets a command-line source argument: `sample`, `catalog:<owner/name>`
    /// or a file path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("sample") {
            DataSource::Sample
        } else if let Some(name) = trimmed.strip_prefix("catalog:") {
            DataSource::Catalog(name.trim().to_string())
        } else {
            DataSource::Upload(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Sample => write!(f, "sample"),
            DataSource::Upload(path) => write!(f, "{}", path.display()),
            DataSource::Catalog(name) => write!(f, "catalog:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited { delimiter: u8 },
    Json,
    JsonLines,
    Workbook,
    Generated,
}

impl SourceFormat {
    /// Delimiter used when re-serializing data that came from this format.
    pub fn export_delimiter(self) -> u8 {
        match self {
            SourceFormat::Delimited { delimiter } => delimiter,
            _ => io_utils::DEFAULT_CSV_DELIMITER,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: encoding_rs::UTF_8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub source: DataSource,
    pub format: SourceFormat,
    pub dataset: Dataset,
}

pub fn load(source: &DataSource, options: &LoadOptions) -> Result<LoadedDataset, LoadError> {
    let (format, dataset) = match source {
        DataSource::Sample => (SourceFormat::Generated, sample::generate()),
        DataSource::Catalog(name) => {
            if !is_catalog_dataset(name) {
                warn!(
                    "'{name}' is not a known catalog dataset (known: {})",
                    CATALOG_DATASETS.join(", ")
                );
            }
            return Err(LoadError::CatalogReference {
                dataset: name.clone(),
            });
        }
        DataSource::Upload(path) => load_path(path, options)?,
    };
    info!(
        "Loaded {} row(s) x {} column(s) from {source}",
        dataset.row_count(),
        dataset.column_count()
    );
    Ok(LoadedDataset {
        source: source.clone(),
        format,
        dataset,
    })
}

fn load_path(path: &Path, options: &LoadOptions) -> Result<(SourceFormat, Dataset), LoadError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    debug!("Reading {path:?} (extension '{extension}')");
    match extension.as_str() {
        "json" => Ok((SourceFormat::Json, read_json(path)?)),
        "jsonl" | "ndjson" => Ok((SourceFormat::JsonLines, read_json_lines(path)?)),
        ext if WORKBOOK_EXTENSIONS.contains(&ext) => Ok((SourceFormat::Workbook, read_workbook(path)?)),
        "csv" | "tsv" | "txt" | "" => {
            let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
            let dataset = read_delimited(path, delimiter, options.encoding)?;
            Ok((SourceFormat::Delimited { delimiter }, dataset))
        }
        other => Err(LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: other.to_string(),
        }),
    }
}

pub fn read_delimited(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Dataset, LoadError> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter).map_err(|source| {
        LoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let encoding_error = || LoadError::Encoding {
        path: path.to_path_buf(),
        encoding: encoding.name().to_string(),
    };

    let header_record = reader.byte_headers().map_err(csv_error)?.clone();
    let mut headers = io_utils::decode_record(&header_record, encoding).ok_or_else(encoding_error)?;
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    if let Some(first) = headers.first_mut() {
        *first = io_utils::strip_bom(first).to_string();
    }

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(csv_error)?;
        let decoded = io_utils::decode_record(&record, encoding).ok_or_else(encoding_error)?;
        rows.push(decoded);
    }
    Ok(Dataset::from_text_rows(headers, rows))
}

fn read_workbook(path: &Path) -> Result<Dataset, LoadError> {
    let workbook_error = |message: String| LoadError::Workbook {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| workbook_error("no first sheet".to_string()))?
        .map_err(|e| workbook_error(e.to_string()))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    };
    let headers = header_row
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell.get_string() {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ if !cell.is_empty() => cell.to_string(),
            _ => format!("column_{}", idx + 1),
        })
        .collect::<Vec<_>>();
    let width = headers.len();

    let mut dataset = Dataset::new(headers);
    for row in rows {
        let mut cells = row.iter().map(workbook_cell).collect::<Vec<_>>();
        cells.resize(width, None);
        dataset.rows.push(cells);
    }
    dataset.infer_numeric_columns();
    Ok(dataset)
}

fn workbook_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::Int(i) => Some(Value::Integer(*i)),
        Data::Float(f) if f.is_finite() => Some(Value::number(*f)),
        Data::Float(_) => None,
        Data::Bool(b) => Some(Value::Text(b.to_string())),
        Data::String(text) => text_cell(text),
        Data::DateTime(_) => cell.as_datetime().map(|dt| {
            if dt.time().num_seconds_from_midnight() == 0 {
                Value::Date(dt.date())
            } else {
                Value::DateTime(dt)
            }
        }),
        Data::DateTimeIso(text) => parse_temporal(text).or_else(|| text_cell(text)),
        Data::DurationIso(text) => text_cell(text),
    }
}

fn text_cell(raw: &str) -> Cell {
    if is_missing_token(raw) {
        None
    } else {
        Some(Value::Text(raw.trim().to_string()))
    }
}

fn json_cell(value: &JsonValue) -> Cell {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(Value::Text(b.to_string())),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(Value::Float)),
        JsonValue::String(text) => text_cell(text),
        other => Some(Value::Text(other.to_string())),
    }
}

fn read_to_string(path: &Path) -> Result<String, LoadError> {
    let mut file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(buf)
}

fn read_json(path: &Path) -> Result<Dataset, LoadError> {
    let raw = read_to_string(path)?;
    let parsed: JsonValue =
        serde_json::from_str(raw.trim_start_matches('\u{feff}')).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let dataset = match parsed {
        JsonValue::Array(records) => records_to_dataset(path, records.iter())?,
        JsonValue::Object(columns) => columns_to_dataset(path, &columns)?,
        _ => {
            return Err(LoadError::JsonLayout {
                path: path.to_path_buf(),
            });
        }
    };
    if dataset.column_count() == 0 {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(dataset)
}

fn read_json_lines(path: &Path) -> Result<Dataset, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.is_empty() {
            continue;
        }
        let record: JsonValue = serde_json::from_str(trimmed).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(record);
    }
    let dataset = records_to_dataset(path, records.iter())?;
    if dataset.column_count() == 0 {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(dataset)
}

/// Headers are the union of record keys in first-appearance order.
fn records_to_dataset<'a, I>(path: &Path, records: I) -> Result<Dataset, LoadError>
where
    I: Iterator<Item = &'a JsonValue> + Clone,
{
    let mut headers: Vec<String> = Vec::new();
    for record in records.clone() {
        let JsonValue::Object(map) = record else {
            return Err(LoadError::JsonLayout {
                path: path.to_path_buf(),
            });
        };
        for key in map.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    let mut dataset = Dataset::new(headers);
    for record in records {
        if let JsonValue::Object(map) = record {
            let row: Vec<Cell> = dataset
                .headers
                .iter()
                .map(|header| map.get(header).and_then(json_cell))
                .collect();
            dataset.rows.push(row);
        }
    }
    dataset.infer_numeric_columns();
    Ok(dataset)
}

/// Column-oriented layout: `{"col": [..]}` or `{"col": {"0": .., "1": ..}}`.
fn columns_to_dataset(
    path: &Path,
    columns: &serde_json::Map<String, JsonValue>,
) -> Result<Dataset, LoadError> {
    let mut headers = Vec::with_capacity(columns.len());
    let mut values: Vec<Vec<Cell>> = Vec::with_capacity(columns.len());
    for (name, column) in columns {
        let cells = match column {
            JsonValue::Array(items) => items.iter().map(json_cell).collect(),
            JsonValue::Object(indexed) => {
                let mut entries = indexed.iter().collect::<Vec<_>>();
                entries.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));
                entries.into_iter().map(|(_, value)| json_cell(value)).collect()
            }
            _ => {
                return Err(LoadError::JsonLayout {
                    path: path.to_path_buf(),
                });
            }
        };
        headers.push(name.clone());
        values.push(cells);
    }
    let row_count = values.iter().map(Vec::len).max().unwrap_or(0);
    let mut dataset = Dataset::new(headers);
    for row_idx in 0..row_count {
        let row: Vec<Cell> = values
            .iter()
            .map(|column| column.get(row_idx).cloned().flatten())
            .collect();
        dataset.rows.push(row);
    }
    dataset.infer_numeric_columns();
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).expect("create file");
        file.write_all(contents.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn parse_recognizes_sample_and_catalog() {
        assert_eq!(DataSource::parse("sample"), DataSource::Sample);
        assert_eq!(
            DataSource::parse("catalog:aungpyaeap/supermarket-sales"),
            DataSource::Catalog("aungpyaeap/supermarket-sales".to_string())
        );
        assert_eq!(
            DataSource::parse("data/sales.csv"),
            DataSource::Upload(PathBuf::from("data/sales.csv"))
        );
    }

    #[test]
    fn catalog_sources_report_manual_download() {
        let err = load(
            &DataSource::Catalog("carrie1/ecommerce-data".into()),
            &LoadOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("kaggle.com/datasets/carrie1/ecommerce-data"));
        assert!(is_catalog_dataset(" Aungpyaeap/Supermarket-Sales "));
        assert!(!is_catalog_dataset("someone/else"));
    }

    #[test]
    fn delimited_reader_strips_bom_and_infers_numbers() {
        let dir = tempdir().expect("temp dir");
        let path = write(dir.path(), "sales.csv", "\u{feff}Invoice ID,Total\nA-1,10.5\nA-2,NA\n");
        let loaded = load(&DataSource::Upload(path), &LoadOptions::default()).expect("load");
        assert_eq!(loaded.dataset.headers, vec!["Invoice ID", "Total"]);
        assert_eq!(loaded.dataset.cell(0, 1), Some(&Value::Float(10.5)));
        assert_eq!(loaded.dataset.cell(1, 1), None);
        assert_eq!(loaded.format, SourceFormat::Delimited { delimiter: b',' });
    }

    #[test]
    fn tsv_extension_selects_tab_delimiter() {
        let dir = tempdir().expect("temp dir");
        let path = write(dir.path(), "sales.tsv", "a\tb\n1\tx\n");
        let loaded = load(&DataSource::Upload(path), &LoadOptions::default()).expect("load");
        assert_eq!(loaded.format.export_delimiter(), b'\t');
        assert_eq!(loaded.dataset.column_count(), 2);
    }

    #[test]
    fn json_accepts_records_and_columns() {
        let dir = tempdir().expect("temp dir");
        let records = write(
            dir.path(),
            "records.json",
            r#"[{"Total": 5, "City": "Yangon"}, {"Total": 7.5, "Branch": "A"}]"#,
        );
        let dataset = load(&DataSource::Upload(records), &LoadOptions::default())
            .expect("records")
            .dataset;
        assert_eq!(dataset.headers, vec!["Total", "City", "Branch"]);
        assert_eq!(dataset.cell(1, 2), Some(&Value::Text("A".to_string())));
        assert_eq!(dataset.cell(1, 1), None);

        let columns = write(
            dir.path(),
            "columns.json",
            r#"{"Total": {"1": 20, "0": 10}, "City": {"0": "a", "1": "b"}}"#,
        );
        let dataset = load(&DataSource::Upload(columns), &LoadOptions::default())
            .expect("columns")
            .dataset;
        assert_eq!(dataset.headers, vec!["Total", "City"]);
        assert_eq!(dataset.cell(0, 0), Some(&Value::Integer(10)));
        assert_eq!(dataset.cell(1, 0), Some(&Value::Integer(20)));
    }

    #[test]
    fn json_lines_skip_blank_lines() {
        let dir = tempdir().expect("temp dir");
        let path = write(dir.path(), "rows.jsonl", "{\"a\": 1}\n\n{\"a\": 2}\n");
        let dataset = load(&DataSource::Upload(path), &LoadOptions::default())
            .expect("jsonl")
            .dataset;
        assert_eq!(dataset.row_count(), 2);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = write(dir.path(), "notes.parquet", "x");
        let err = load(&DataSource::Upload(path), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_file_is_a_load_error() {
        let dir = tempdir().expect("temp dir");
        let path = write(dir.path(), "empty.csv", "");
        let err = load(&DataSource::Upload(path), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::Empty { .. }));
    }
}
