//! Artifact loading (transactions, RFM export, cluster export) using Polars

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::clusters::ClusterAssignment;
use crate::error::{DataLoadError, Error};
use crate::features::CustomerFeatures;
use crate::scoring::{RfmLevel, RfmScoredRecord};

/// Filter sentinel meaning "no restriction"
pub const ALL: &str = "All";

pub const TRANSACTION_COLUMNS: [&str; 7] = [
    "InvoiceNo",
    "CustomerID",
    "Description",
    "Quantity",
    "UnitPrice",
    "InvoiceDate",
    "Country",
];

pub const RFM_COLUMNS: [&str; 5] = ["CustomerID", "Recency", "Frequency", "Monetary", "RFM_Score"];

pub const CLUSTER_COLUMNS: [&str; 7] = [
    "CustomerID",
    "Recency",
    "Frequency",
    "Monetary",
    "GMM_Cluster",
    "GMM_Segment",
    "GMM_Advice",
];

/// Timestamp layouts accepted for `InvoiceDate`, tried in order after RFC 3339
const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M",
];

/// Returns the concrete selection, or `None` when absent or "All".
pub fn selection(value: Option<&str>) -> Option<&str> {
    value.filter(|v| *v != ALL)
}

/// One invoice line item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLine {
    #[serde(rename = "InvoiceNo")]
    pub invoice_no: String,
    #[serde(rename = "CustomerID")]
    pub customer_id: Option<i64>,
    #[serde(rename = "Description")]
    pub description: String,
    /// Negative for returns
    #[serde(rename = "Quantity")]
    pub quantity: i64,
    #[serde(rename = "UnitPrice")]
    pub unit_price: f64,
    #[serde(rename = "InvoiceDate")]
    pub invoice_date: NaiveDateTime,
    #[serde(rename = "Country")]
    pub country: String,
}

impl OrderLine {
    /// Line revenue, negative for returns. Always derived, never stored.
    pub fn revenue(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

/// Inclusive calendar-date range; time of day is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        let date = timestamp.date();
        self.start <= date && date <= self.end
    }
}

/// Immutable set of order lines loaded once per session
#[derive(Debug, Clone, Default)]
pub struct TransactionStore {
    lines: Vec<OrderLine>,
}

impl TransactionStore {
    pub fn from_lines(lines: Vec<OrderLine>) -> Self {
        Self { lines }
    }

    /// Load order lines from a CSV or Parquet file
    ///
    /// # Arguments
    /// * `path` - Transactions artifact with the columns in [`TRANSACTION_COLUMNS`]
    ///
    /// # Returns
    /// * The store, or a [`DataLoadError`] when the file is missing, unreadable,
    ///   lacks a required column or holds a malformed value
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let frame = Frame::read(path)?;
        frame.require(&TRANSACTION_COLUMNS)?;

        let invoice_nos = frame.required("InvoiceNo", frame.strings("InvoiceNo")?)?;
        let customer_ids = frame.integers("CustomerID")?;
        let descriptions = frame.strings("Description")?;
        let quantities = frame.required("Quantity", frame.integers("Quantity")?)?;
        let unit_prices = frame.required("UnitPrice", frame.floats("UnitPrice")?)?;
        let invoice_dates = frame.timestamps("InvoiceDate")?;
        let countries = frame.strings("Country")?;

        let mut lines = Vec::with_capacity(frame.height());
        for (i, invoice_no) in invoice_nos.into_iter().enumerate() {
            if unit_prices[i] < 0.0 {
                return Err(frame.invalid("UnitPrice", i, "unit price must not be negative").into());
            }
            lines.push(OrderLine {
                invoice_no,
                customer_id: customer_ids[i],
                description: descriptions[i].clone().unwrap_or_default(),
                quantity: quantities[i],
                unit_price: unit_prices[i],
                invoice_date: invoice_dates[i],
                country: countries[i].clone().unwrap_or_default(),
            });
        }

        info!(path = %path.display(), rows = lines.len(), "loaded transactions");
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Country names present in the data, sorted
    pub fn countries(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| line.country.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Calendar span covered by the data, `None` when empty
    pub fn date_bounds(&self) -> Option<DateRange> {
        let min = self.lines.iter().map(|l| l.invoice_date).min()?;
        let max = self.lines.iter().map(|l| l.invoice_date).max()?;
        Some(DateRange::new(min.date(), max.date()))
    }

    /// Lines matching a country selection and an inclusive date range.
    ///
    /// `None` or "All" disables country filtering. The store is untouched;
    /// the returned view borrows from it.
    pub fn filter(&self, country: Option<&str>, range: &DateRange) -> Vec<&OrderLine> {
        let country = selection(country);
        let view: Vec<&OrderLine> = self
            .lines
            .iter()
            .filter(|line| country.map_or(true, |c| line.country == c))
            .filter(|line| range.contains(&line.invoice_date))
            .collect();
        debug!(
            country = country.unwrap_or(ALL),
            start = %range.start,
            end = %range.end,
            rows = view.len(),
            "filtered transactions"
        );
        view
    }
}

/// Load a precomputed RFM export and derive each row's level from `RFM_Score`
pub fn load_rfm_export(path: impl AsRef<Path>) -> crate::Result<Vec<RfmScoredRecord>> {
    let path = path.as_ref();
    let frame = Frame::read(path)?;
    frame.require(&RFM_COLUMNS)?;

    let features = frame.features()?;
    let scores = frame.integers("RFM_Score")?;

    let records: Vec<RfmScoredRecord> = features
        .into_iter()
        .zip(scores)
        .map(|(features, rfm_score)| RfmScoredRecord {
            features,
            sub_scores: None,
            rfm_score,
            level: RfmLevel::from_score(rfm_score),
        })
        .collect();

    info!(path = %path.display(), rows = records.len(), "loaded RFM export");
    Ok(records)
}

/// Load a precomputed cluster assignment export
pub fn load_cluster_export(path: impl AsRef<Path>) -> crate::Result<Vec<ClusterAssignment>> {
    let path = path.as_ref();
    let frame = Frame::read(path)?;
    frame.require(&CLUSTER_COLUMNS)?;

    let features = frame.features()?;
    let clusters = frame.required("GMM_Cluster", frame.integers("GMM_Cluster")?)?;
    let segments = frame.strings("GMM_Segment")?;
    let advice = frame.strings("GMM_Advice")?;

    let records: Vec<ClusterAssignment> = features
        .into_iter()
        .enumerate()
        .map(|(i, features)| ClusterAssignment {
            features,
            cluster: clusters[i],
            segment: segments[i].clone().unwrap_or_default(),
            advice: advice[i].clone().unwrap_or_default(),
        })
        .collect();

    info!(path = %path.display(), rows = records.len(), "loaded cluster export");
    Ok(records)
}

/// Write cluster assignments in the cluster export layout (CSV or Parquet by extension)
pub fn write_cluster_export(path: impl AsRef<Path>, records: &[ClusterAssignment]) -> crate::Result<()> {
    let path = path.as_ref();
    let format = ArtifactFormat::from_path(path)?;
    let export_err = |source| Error::Export {
        path: path.to_path_buf(),
        source,
    };

    let mut df = df!(
        "CustomerID" => records.iter().map(|r| r.features.customer_id).collect::<Vec<i64>>(),
        "Recency" => records.iter().map(|r| r.features.recency).collect::<Vec<i64>>(),
        "Frequency" => records.iter().map(|r| r.features.frequency as i64).collect::<Vec<i64>>(),
        "Monetary" => records.iter().map(|r| r.features.monetary).collect::<Vec<f64>>(),
        "GMM_Cluster" => records.iter().map(|r| r.cluster).collect::<Vec<i64>>(),
        "GMM_Segment" => records.iter().map(|r| r.segment.clone()).collect::<Vec<String>>(),
        "GMM_Advice" => records.iter().map(|r| r.advice.clone()).collect::<Vec<String>>()
    )
    .map_err(export_err)?;

    let mut file = File::create(path)?;
    match format {
        ArtifactFormat::Csv => CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)
            .map_err(export_err)?,
        ArtifactFormat::Parquet => {
            ParquetWriter::new(&mut file)
                .finish(&mut df)
                .map_err(export_err)?;
        }
    }

    info!(path = %path.display(), rows = records.len(), "wrote cluster export");
    Ok(())
}

/// Parse an `InvoiceDate` cell in any of the accepted layouts
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactFormat {
    Csv,
    Parquet,
}

impl ArtifactFormat {
    fn from_path(path: &Path) -> Result<Self, DataLoadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("parquet") | Some("pq") => Ok(Self::Parquet),
            _ => Err(DataLoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// A loaded data frame plus the path it came from, for error context
struct Frame {
    path: PathBuf,
    df: DataFrame,
}

impl Frame {
    fn read(path: &Path) -> Result<Self, DataLoadError> {
        if !path.is_file() {
            return Err(DataLoadError::Missing {
                path: path.to_path_buf(),
            });
        }

        // Full-table schema inference: invoice numbers are numeric until the first "C" return
        let lazy = match ArtifactFormat::from_path(path)? {
            ArtifactFormat::Csv => LazyCsvReader::new(path)
                .with_has_header(true)
                .with_infer_schema_length(None)
                .finish(),
            ArtifactFormat::Parquet => LazyFrame::scan_parquet(path, ScanArgsParquet::default()),
        };
        let df = lazy
            .and_then(|lf| lf.collect())
            .map_err(|source| DataLoadError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            df,
        })
    }

    fn height(&self) -> usize {
        self.df.height()
    }

    fn require(&self, columns: &[&str]) -> Result<(), DataLoadError> {
        for column in columns {
            if self.df.column(column).is_err() {
                return Err(DataLoadError::MissingColumn {
                    path: self.path.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn unreadable(&self, source: PolarsError) -> DataLoadError {
        DataLoadError::Unreadable {
            path: self.path.clone(),
            source,
        }
    }

    fn invalid(&self, column: &str, index: usize, message: impl Into<String>) -> DataLoadError {
        DataLoadError::InvalidValue {
            path: self.path.clone(),
            column: column.to_string(),
            row: index + 1,
            message: message.into(),
        }
    }

    fn series(&self, name: &str) -> Result<&Series, DataLoadError> {
        self.df.column(name).map_err(|e| self.unreadable(e))
    }

    fn strings(&self, name: &str) -> Result<Vec<Option<String>>, DataLoadError> {
        let series = self
            .series(name)?
            .cast(&DataType::String)
            .map_err(|e| self.unreadable(e))?;
        let values = series
            .str()
            .map_err(|e| self.unreadable(e))?
            .into_iter()
            .map(|v| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
            .collect();
        Ok(values)
    }

    fn floats(&self, name: &str) -> Result<Vec<Option<f64>>, DataLoadError> {
        let series = self.series(name)?;
        if series.dtype().is_numeric() {
            let cast = series
                .cast(&DataType::Float64)
                .map_err(|e| self.unreadable(e))?;
            let values = cast.f64().map_err(|e| self.unreadable(e))?.into_iter().collect();
            return Ok(values);
        }

        // Text column: parse cell by cell so the error can name the row
        self.strings(name)?
            .into_iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                None => Ok(None),
                Some(text) => text
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| self.invalid(name, i, format!("{text:?} is not a number"))),
            })
            .collect()
    }

    /// Integer column that may have been exported as floats (`17850.0`)
    fn integers(&self, name: &str) -> Result<Vec<Option<i64>>, DataLoadError> {
        let series = self.series(name)?;
        if series.dtype().is_integer() {
            let cast = series.cast(&DataType::Int64).map_err(|e| self.unreadable(e))?;
            let values = cast.i64().map_err(|e| self.unreadable(e))?.into_iter().collect();
            return Ok(values);
        }

        self.floats(name)?
            .into_iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                None => Ok(None),
                Some(value) if value.is_finite() && value.fract() == 0.0 => Ok(Some(value as i64)),
                Some(value) => Err(self.invalid(name, i, format!("{value} is not an integer"))),
            })
            .collect()
    }

    fn timestamps(&self, name: &str) -> Result<Vec<NaiveDateTime>, DataLoadError> {
        self.strings(name)?
            .into_iter()
            .enumerate()
            .map(|(i, cell)| {
                let text = cell.ok_or_else(|| self.invalid(name, i, "missing value"))?;
                parse_timestamp(&text)
                    .ok_or_else(|| self.invalid(name, i, format!("unrecognised timestamp {text:?}")))
            })
            .collect()
    }

    fn required<T>(&self, name: &str, values: Vec<Option<T>>) -> Result<Vec<T>, DataLoadError> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| self.invalid(name, i, "missing value")))
            .collect()
    }

    /// Shared CustomerID/Recency/Frequency/Monetary columns of the RFM and cluster exports
    fn features(&self) -> Result<Vec<CustomerFeatures>, DataLoadError> {
        let customer_ids = self.required("CustomerID", self.integers("CustomerID")?)?;
        let recency = self.required("Recency", self.integers("Recency")?)?;
        let frequency = self.required("Frequency", self.integers("Frequency")?)?;
        let monetary = self.floats("Monetary")?;

        customer_ids
            .into_iter()
            .enumerate()
            .map(|(i, customer_id)| {
                let frequency = u32::try_from(frequency[i])
                    .map_err(|_| self.invalid("Frequency", i, "frequency must be a non-negative count"))?;
                Ok(CustomerFeatures {
                    customer_id,
                    recency: recency[i],
                    frequency,
                    // Undefined spend is kept and still scored
                    monetary: monetary[i].unwrap_or(f64::NAN),
                })
            })
            .collect()
    }
}
