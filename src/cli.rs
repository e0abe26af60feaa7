//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::data::DateRange;
use crate::report::FilterState;

/// Sales reporting and RFM / GMM customer segmentation over order lines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transactions file (CSV or Parquet)
    #[arg(short, long, default_value = "data.csv")]
    pub input: PathBuf,

    /// Settings file (TOML); embedded defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Render the dashboard views for one filter selection (default)
    Report(ReportArgs),
    /// Fit a Gaussian mixture on RFM features and write the cluster export
    Segment(SegmentArgs),
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct ReportArgs {
    /// Precomputed RFM export; computed from the transactions when omitted
    #[arg(long)]
    pub rfm: Option<PathBuf>,

    /// Precomputed cluster export
    #[arg(long)]
    pub clusters: Option<PathBuf>,

    /// Country filter ("All" for every country)
    #[arg(long)]
    pub country: Option<String>,

    /// First day of the date range (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last day of the date range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// RFM level filter, e.g. "Best Customer"
    #[arg(long)]
    pub rfm_level: Option<String>,

    /// GMM segment filter
    #[arg(long)]
    pub segment: Option<String>,

    /// Rows in each top-N table
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Recency reference date (YYYY-MM-DD)
    #[arg(long)]
    pub reference_date: Option<NaiveDate>,

    /// Quantile buckets per RFM sub-score
    #[arg(long)]
    pub bins: Option<u8>,

    /// Emit every view as JSON instead of the text summary
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ReportArgs {
    /// Apply command-line overrides on top of the settings file
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(top_n) = self.top_n {
            settings.top_n = top_n;
        }
        if let Some(date) = self.reference_date {
            settings.reference_date = Some(date);
        }
        if let Some(bins) = self.bins {
            settings.quantile_bins = bins;
        }
    }

    /// Filter state for this invocation. A missing range bound falls back to
    /// the matching end of `bounds`.
    pub fn filter_state(&self, bounds: Option<DateRange>) -> FilterState {
        let date_range = match (self.start, self.end, bounds) {
            (None, None, _) => None,
            (Some(start), Some(end), _) => Some(DateRange::new(start, end)),
            (Some(start), None, Some(b)) => Some(DateRange::new(start, b.end)),
            (None, Some(end), Some(b)) => Some(DateRange::new(b.start, end)),
            (Some(start), None, None) => Some(DateRange::new(start, start)),
            (None, Some(end), None) => Some(DateRange::new(end, end)),
        };
        FilterState {
            country: self.country.clone(),
            date_range,
            rfm_level: self.rfm_level.clone(),
            segment: self.segment.clone(),
        }
    }
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct SegmentArgs {
    /// Output path for the cluster export (CSV or Parquet)
    #[arg(short, long, default_value = "gmm_segments.csv")]
    pub output: PathBuf,

    /// Number of mixture components
    #[arg(short = 'k', long)]
    pub components: Option<usize>,

    /// Random seed for the EM initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Recency reference date (YYYY-MM-DD)
    #[arg(long)]
    pub reference_date: Option<NaiveDate>,

    /// Prediction mode: provide R,F,M values as comma-separated string
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10, Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,
}

impl SegmentArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(components) = self.components {
            settings.gmm.components = components;
        }
        if let Some(seed) = self.seed {
            settings.gmm.seed = seed;
        }
        if let Some(date) = self.reference_date {
            settings.reference_date = Some(date);
        }
    }

    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary"
    pub fn parse_rfm_values(&self) -> anyhow::Result<Option<(f64, f64, f64)>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            anyhow::bail!("Predict values must be in format 'recency,frequency,monetary'");
        }

        let parse = |name: &str, raw: &str| -> anyhow::Result<f64> {
            raw.parse()
                .map_err(|_| anyhow::anyhow!("Invalid {} value: {}", name, raw))
        };
        Ok(Some((
            parse("recency", parts[0])?,
            parse("frequency", parts[1])?,
            parse("monetary", parts[2])?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_rfm_values() {
        let mut args = SegmentArgs {
            output: PathBuf::from("test.csv"),
            components: None,
            seed: None,
            reference_date: None,
            predict: Some("30, 10, 500.0".to_string()),
        };

        let result = args.parse_rfm_values().unwrap();
        assert_eq!(result, Some((30.0, 10.0, 500.0)));

        args.predict = None;
        assert_eq!(args.parse_rfm_values().unwrap(), None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_rfm_values().is_err());

        args.predict = Some("1,x,3".to_string());
        assert!(args.parse_rfm_values().is_err());
    }

    #[test]
    fn test_report_subcommand() {
        let args = Args::parse_from([
            "segmentscope",
            "--input",
            "orders.csv",
            "report",
            "--country",
            "France",
            "--start",
            "2011-01-01",
            "--rfm-level",
            "Best Customer",
            "--json",
        ]);

        assert_eq!(args.input, PathBuf::from("orders.csv"));
        let Some(Command::Report(report)) = args.command else {
            panic!("expected report subcommand");
        };
        assert_eq!(report.country.as_deref(), Some("France"));
        assert!(report.json);

        let bounds = DateRange::new(date(2010, 12, 1), date(2011, 12, 9));
        let state = report.filter_state(Some(bounds));
        assert_eq!(
            state.date_range,
            Some(DateRange::new(date(2011, 1, 1), date(2011, 12, 9)))
        );
        assert_eq!(state.rfm_level.as_deref(), Some("Best Customer"));
    }

    #[test]
    fn test_overrides_applied() {
        let mut settings = Settings::default();
        let report = ReportArgs {
            top_n: Some(3),
            bins: Some(4),
            ..ReportArgs::default()
        };
        report.apply(&mut settings);
        assert_eq!(settings.top_n, 3);
        assert_eq!(settings.quantile_bins, 4);

        let args = Args::parse_from(["segmentscope", "segment", "-k", "3", "--seed", "7"]);
        let Some(Command::Segment(segment)) = args.command else {
            panic!("expected segment subcommand");
        };
        segment.apply(&mut settings);
        assert_eq!(settings.gmm.components, 3);
        assert_eq!(settings.gmm.seed, 7);
        assert_eq!(segment.output, PathBuf::from("gmm_segments.csv"));
    }

    #[test]
    fn test_no_dates_means_full_range() {
        let state = ReportArgs::default().filter_state(None);
        assert_eq!(state, FilterState::default());
    }
}
