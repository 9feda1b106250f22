use std::path::PathBuf;

use thiserror::Error;

/// Failure to ingest a dataset. A load error aborts the current load attempt
/// only; every other pipeline failure is recovered locally.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Opening input file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Reading delimited data from {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Decoding {path:?} as {encoding}")]
    Encoding { path: PathBuf, encoding: String },
    #[error("Parsing JSON records from {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported JSON layout in {path:?}: expected an array of records or an object of columns")]
    JsonLayout { path: PathBuf },
    #[error("Reading workbook {path:?}: {message}")]
    Workbook { path: PathBuf, message: String },
    #[error("Unsupported input format '{extension}' for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("Input {path:?} is empty: no header row found")]
    Empty { path: PathBuf },
    #[error(
        "Catalog dataset '{dataset}' cannot be fetched directly; download it from https://www.kaggle.com/datasets/{dataset} and load the file instead"
    )]
    CatalogReference { dataset: String },
}
