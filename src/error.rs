//! Error types shared by the loaders, aggregations and the reporting layer

use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Top-level error for the library.
#[derive(Error, Debug)]
pub enum Error {
    /// A backing artifact could not be loaded. Fatal to the session.
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),

    /// The same cluster id carries more than one (segment, advice) pair.
    #[error(
        "cluster {cluster} maps to conflicting labels: ({first_segment:?}, {first_advice:?}) vs ({second_segment:?}, {second_advice:?})"
    )]
    InconsistentClusterMapping {
        cluster: i64,
        first_segment: String,
        first_advice: String,
        second_segment: String,
        second_advice: String,
    },

    /// A filter combination matched no rows.
    #[error("no data for the selected filters: {0}")]
    EmptyResult(String),

    /// A filter selection names a value that does not exist.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("clustering failed: {0}")]
    Clustering(String),

    /// Writing a derived artifact failed.
    #[error("failed to write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a backing artifact was rejected.
#[derive(Error, Debug)]
pub enum DataLoadError {
    #[error("artifact not found: {path}")]
    Missing { path: PathBuf },

    #[error("unsupported artifact format (expected .csv or .parquet): {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("could not read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("{path} is missing required column {column:?}")]
    MissingColumn { path: PathBuf, column: String },

    /// Row numbers are 1-based data rows (the header is not counted).
    #[error("{path}: invalid {column} at row {row}: {message}")]
    InvalidValue {
        path: PathBuf,
        column: String,
        row: usize,
        message: String,
    },
}
