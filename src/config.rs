//! Settings file handling with embedded defaults

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::error::Error;

/// Default settings embedded in the binary
pub const DEFAULT_SETTINGS: &str = r#"
quantile_bins = 5
top_n = 10
table_rows = 20
preview_rows = 100
weekday_years = []

[gmm]
components = 4
n_runs = 10
tolerance = 1e-4
max_iterations = 200
seed = 42

[[gmm.profiles]]
segment = "Hibernating"
advice = "Send a reactivation discount and ask for feedback before they churn for good."

[[gmm.profiles]]
segment = "Occasional Buyers"
advice = "Recommend related products and time promotions around their past purchase months."

[[gmm.profiles]]
segment = "Loyal Regulars"
advice = "Offer a loyalty programme and early access to new collections."

[[gmm.profiles]]
segment = "Champions"
advice = "Reward with exclusive perks, ask for reviews and referrals."
"#;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Recency anchor; the day after the latest invoice when unset
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    pub quantile_bins: u8,
    pub top_n: usize,
    pub table_rows: usize,
    pub preview_rows: usize,
    /// Years shown in the weekday distribution, empty for all
    #[serde(default)]
    pub weekday_years: Vec<i32>,
    pub gmm: GmmSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GmmSettings {
    pub components: usize,
    pub n_runs: u64,
    pub tolerance: f64,
    pub max_iterations: u64,
    pub seed: u64,
    /// Ordered from the lowest-value cluster to the highest
    pub profiles: Vec<SegmentProfile>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SegmentProfile {
    pub segment: String,
    pub advice: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_toml(DEFAULT_SETTINGS).expect("embedded default settings are valid")
    }
}

impl Settings {
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let settings: Settings =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, or the embedded defaults when no path is given
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => {
                info!("Loading settings from: {}", path.display());
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml(&contents)
            }
            None => {
                info!("Using default embedded settings");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(2..=10).contains(&self.quantile_bins) {
            return Err(Error::Config(format!(
                "quantile_bins must be between 2 and 10, got {}",
                self.quantile_bins
            )));
        }
        if self.top_n == 0 {
            return Err(Error::Config("top_n must be at least 1".to_string()));
        }
        if self.gmm.components < 2 {
            return Err(Error::Config("gmm.components must be at least 2".to_string()));
        }
        if self.gmm.profiles.len() < self.gmm.components {
            return Err(Error::Config(format!(
                "gmm.profiles lists {} segments but {} components are requested",
                self.gmm.profiles.len(),
                self.gmm.components
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.quantile_bins, 5);
        assert_eq!(settings.top_n, 10);
        assert_eq!(settings.reference_date, None);
        assert_eq!(settings.gmm.profiles.len(), settings.gmm.components);
    }

    #[test]
    fn test_override_file() {
        let toml = DEFAULT_SETTINGS.replace("quantile_bins = 5", "quantile_bins = 4\nreference_date = \"2011-12-10\"");
        let settings = Settings::from_toml(&toml).unwrap();
        assert_eq!(settings.quantile_bins, 4);
        assert_eq!(settings.reference_date, NaiveDate::from_ymd_opt(2011, 12, 10));
    }

    #[test]
    fn test_rejects_too_few_profiles() {
        let toml = DEFAULT_SETTINGS.replace("components = 4", "components = 6");
        assert!(matches!(Settings::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let toml = format!("colour = \"teal\"\n{DEFAULT_SETTINGS}");
        assert!(Settings::from_toml(&toml).is_err());
    }
}
