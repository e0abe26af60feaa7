//! Quantile-based RFM scoring and customer value levels

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::Error;
use crate::features::CustomerFeatures;

/// Customer value level derived from the composite RFM score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RfmLevel {
    BestCustomer,
    LoyalCustomer,
    LessActiveCustomer,
    Unknown,
}

/// Inclusive `(lower, upper, level)` bands partitioning every integer score.
/// Bands are contiguous and ascending; a missing score maps to `Unknown`.
pub const LEVEL_BANDS: [(i64, i64, RfmLevel); 4] = [
    (i64::MIN, 0, RfmLevel::Unknown),
    (1, 4, RfmLevel::LessActiveCustomer),
    (5, 8, RfmLevel::LoyalCustomer),
    (9, i64::MAX, RfmLevel::BestCustomer),
];

impl RfmLevel {
    pub const ALL: [RfmLevel; 4] = [
        RfmLevel::BestCustomer,
        RfmLevel::LoyalCustomer,
        RfmLevel::LessActiveCustomer,
        RfmLevel::Unknown,
    ];

    pub fn from_score(score: Option<i64>) -> Self {
        let Some(score) = score else {
            return RfmLevel::Unknown;
        };
        LEVEL_BANDS
            .iter()
            .find(|(lower, upper, _)| (*lower..=*upper).contains(&score))
            .map(|(_, _, level)| *level)
            .unwrap_or(RfmLevel::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RfmLevel::BestCustomer => "Best Customer",
            RfmLevel::LoyalCustomer => "Loyal Customer",
            RfmLevel::LessActiveCustomer => "Less Active Customer",
            RfmLevel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RfmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RfmLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RfmLevel::ALL
            .into_iter()
            .find(|level| level.label() == s)
            .ok_or_else(|| Error::InvalidFilter(format!("unknown RFM level {s:?}")))
    }
}

impl Serialize for RfmLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Quantile scores, each in `1..=bins`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubScores {
    #[serde(rename = "R_Score")]
    pub recency: u8,
    #[serde(rename = "F_Score")]
    pub frequency: u8,
    #[serde(rename = "M_Score")]
    pub monetary: u8,
}

impl SubScores {
    pub fn total(&self) -> i64 {
        i64::from(self.recency) + i64::from(self.frequency) + i64::from(self.monetary)
    }
}

/// Customer features with scores and level attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmScoredRecord {
    #[serde(flatten)]
    pub features: CustomerFeatures,
    /// Absent when the record came from an export carrying only the total
    #[serde(flatten)]
    pub sub_scores: Option<SubScores>,
    #[serde(rename = "RFM_Score")]
    pub rfm_score: Option<i64>,
    #[serde(rename = "RFM_level")]
    pub level: RfmLevel,
}

/// Equal-population bins over `values`, 1 for the lowest bucket.
///
/// Ranks are taken by value, ties broken by customer id ascending, so the
/// same input always bins the same way. NaN ranks below every number.
fn quantile_bins(ids: &[i64], values: &[f64], bins: u8) -> Vec<u8> {
    let n = values.len();
    let key = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        key(values[a])
            .total_cmp(&key(values[b]))
            .then_with(|| ids[a].cmp(&ids[b]))
    });

    let mut scores = vec![0u8; n];
    for (rank, &index) in order.iter().enumerate() {
        scores[index] = (rank * bins as usize / n) as u8 + 1;
    }
    scores
}

/// Score customers by quantile bins and assign value levels
///
/// # Arguments
/// * `features` - Customer feature records
/// * `bins` - Number of quantile buckets (score range `1..=bins`)
///
/// # Returns
/// * Scored records in input order, none dropped
pub fn score_customers(features: &[CustomerFeatures], bins: u8) -> crate::Result<Vec<RfmScoredRecord>> {
    if !(2..=10).contains(&bins) {
        return Err(Error::Config(format!(
            "quantile bins must be between 2 and 10, got {bins}"
        )));
    }

    let ids: Vec<i64> = features.iter().map(|f| f.customer_id).collect();
    let recency: Vec<f64> = features.iter().map(|f| f.recency as f64).collect();
    let frequency: Vec<f64> = features.iter().map(|f| f64::from(f.frequency)).collect();
    let monetary: Vec<f64> = features.iter().map(|f| f.monetary).collect();

    let r_bins = quantile_bins(&ids, &recency, bins);
    let f_bins = quantile_bins(&ids, &frequency, bins);
    let m_bins = quantile_bins(&ids, &monetary, bins);

    let records: Vec<RfmScoredRecord> = features
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let sub_scores = SubScores {
                // Most recent bucket scores highest
                recency: bins + 1 - r_bins[i],
                frequency: f_bins[i],
                monetary: m_bins[i],
            };
            let total = sub_scores.total();
            RfmScoredRecord {
                features: f.clone(),
                sub_scores: Some(sub_scores),
                rfm_score: Some(total),
                level: RfmLevel::from_score(Some(total)),
            }
        })
        .collect();

    debug!(customers = records.len(), bins, "scored customers");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: i64, recency: i64, frequency: u32, monetary: f64) -> CustomerFeatures {
        CustomerFeatures {
            customer_id: id,
            recency,
            frequency,
            monetary,
        }
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(RfmLevel::from_score(Some(9)), RfmLevel::BestCustomer);
        assert_eq!(RfmLevel::from_score(Some(15)), RfmLevel::BestCustomer);
        assert_eq!(RfmLevel::from_score(Some(8)), RfmLevel::LoyalCustomer);
        assert_eq!(RfmLevel::from_score(Some(5)), RfmLevel::LoyalCustomer);
        assert_eq!(RfmLevel::from_score(Some(4)), RfmLevel::LessActiveCustomer);
        assert_eq!(RfmLevel::from_score(Some(1)), RfmLevel::LessActiveCustomer);
        assert_eq!(RfmLevel::from_score(Some(0)), RfmLevel::Unknown);
        assert_eq!(RfmLevel::from_score(Some(-3)), RfmLevel::Unknown);
        assert_eq!(RfmLevel::from_score(None), RfmLevel::Unknown);
    }

    #[test]
    fn test_level_bands_partition_all_integers() {
        assert_eq!(LEVEL_BANDS.first().unwrap().0, i64::MIN);
        assert_eq!(LEVEL_BANDS.last().unwrap().1, i64::MAX);
        for pair in LEVEL_BANDS.windows(2) {
            assert!(pair[0].0 <= pair[0].1);
            assert_eq!(pair[0].1 + 1, pair[1].0, "gap or overlap after {:?}", pair[0]);
        }

        for score in -20..=40 {
            let matching = LEVEL_BANDS
                .iter()
                .filter(|(lo, hi, _)| (*lo..=*hi).contains(&score))
                .count();
            assert_eq!(matching, 1, "score {score} matched {matching} bands");
        }
    }

    #[test]
    fn test_level_label_roundtrip() {
        for level in RfmLevel::ALL {
            assert_eq!(level.label().parse::<RfmLevel>().unwrap(), level);
        }
        assert!("Gold".parse::<RfmLevel>().is_err());
    }

    #[test]
    fn test_quantile_scores_direction() {
        let features: Vec<CustomerFeatures> = (0..10)
            .map(|i| customer(100 + i, 100 - i * 10, (i + 1) as u32, (i as f64) * 50.0))
            .collect();
        let scored = score_customers(&features, 5).unwrap();

        // Customer 109: most recent, most frequent, biggest spender
        let best = scored.last().unwrap().sub_scores.unwrap();
        assert_eq!((best.recency, best.frequency, best.monetary), (5, 5, 5));
        assert_eq!(scored.last().unwrap().rfm_score, Some(15));
        assert_eq!(scored.last().unwrap().level, RfmLevel::BestCustomer);

        let worst = scored[0].sub_scores.unwrap();
        assert_eq!((worst.recency, worst.frequency, worst.monetary), (1, 1, 1));
        assert_eq!(scored[0].level, RfmLevel::LessActiveCustomer);
    }

    #[test]
    fn test_ties_break_by_customer_id() {
        // All equal: rank order is purely customer id
        let features = vec![
            customer(3, 10, 1, 10.0),
            customer(1, 10, 1, 10.0),
            customer(4, 10, 1, 10.0),
            customer(2, 10, 1, 10.0),
        ];
        let scored = score_customers(&features, 4).unwrap();
        let m: Vec<(i64, u8)> = scored
            .iter()
            .map(|r| (r.features.customer_id, r.sub_scores.unwrap().monetary))
            .collect();
        assert_eq!(m, vec![(3, 3), (1, 1), (4, 4), (2, 2)]);

        let again = score_customers(&features, 4).unwrap();
        assert_eq!(scored, again);
    }

    #[test]
    fn test_zero_and_undefined_monetary_still_scored() {
        let features = vec![
            customer(1, 5, 1, 0.0),
            customer(2, 5, 1, f64::NAN),
            customer(3, 5, 1, 100.0),
        ];
        let scored = score_customers(&features, 3).unwrap();

        assert_eq!(scored.len(), 3);
        assert_eq!(scored[1].sub_scores.unwrap().monetary, 1);
        assert_eq!(scored[0].sub_scores.unwrap().monetary, 2);
        assert_eq!(scored[2].sub_scores.unwrap().monetary, 3);
    }

    #[test]
    fn test_scores_within_range_for_small_sets() {
        let features = vec![customer(1, 5, 2, 10.0), customer(2, 50, 1, 5.0)];
        let scored = score_customers(&features, 5).unwrap();
        for record in &scored {
            let s = record.sub_scores.unwrap();
            for v in [s.recency, s.frequency, s.monetary] {
                assert!((1..=5).contains(&v));
            }
        }
        assert!(score_customers(&[], 5).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_bin_count() {
        assert!(score_customers(&[], 1).is_err());
        assert!(score_customers(&[], 11).is_err());
    }

    #[test]
    fn test_serialized_columns() {
        let scored = score_customers(&[customer(12346, 3, 2, 40.0)], 5).unwrap();
        let json = serde_json::to_value(&scored[0]).unwrap();
        assert_eq!(json["CustomerID"], 12346);
        assert_eq!(json["RFM_level"], "Loyal Customer");
        assert!(json.get("R_Score").is_some());
    }
}
