//! Per-cluster statistics and advice over precomputed GMM assignments

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::data::selection;
use crate::error::Error;
use crate::features::CustomerFeatures;

/// One customer's cluster assignment as exported by the segmentation step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    #[serde(flatten)]
    pub features: CustomerFeatures,
    #[serde(rename = "GMM_Cluster")]
    pub cluster: i64,
    #[serde(rename = "GMM_Segment")]
    pub segment: String,
    #[serde(rename = "GMM_Advice")]
    pub advice: String,
}

/// Mean recency, frequency and monetary value of a group, rounded to 2 decimal places
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureAverages {
    pub recency: f64,
    pub frequency: f64,
    pub monetary: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdviceEntry {
    pub cluster: i64,
    pub segment: String,
    pub advice: String,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Running mean that ignores undefined values
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    pub(crate) fn add(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    /// `NaN` when nothing was added
    pub(crate) fn value(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Recency / frequency / monetary means for a group of customers
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FeatureMeans {
    recency: Mean,
    frequency: Mean,
    monetary: Mean,
}

impl FeatureMeans {
    pub(crate) fn add(&mut self, features: &CustomerFeatures) {
        self.recency.add(features.recency as f64);
        self.frequency.add(f64::from(features.frequency));
        self.monetary.add(features.monetary);
    }

    pub(crate) fn rounded(&self) -> FeatureAverages {
        FeatureAverages {
            recency: round2(self.recency.value()),
            frequency: round2(self.frequency.value()),
            monetary: round2(self.monetary.value()),
        }
    }
}

/// Read-only summaries over a set of cluster assignments
#[derive(Debug, Clone, Copy)]
pub struct ClusterSummary<'a> {
    records: &'a [ClusterAssignment],
}

impl<'a> ClusterSummary<'a> {
    pub fn new(records: &'a [ClusterAssignment]) -> Self {
        Self { records }
    }

    pub fn counts_by_cluster(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records {
            *counts.entry(record.cluster).or_insert(0) += 1;
        }
        counts
    }

    pub fn averages_by_cluster(&self) -> BTreeMap<i64, FeatureAverages> {
        let mut means: BTreeMap<i64, FeatureMeans> = BTreeMap::new();
        for record in self.records {
            means.entry(record.cluster).or_default().add(&record.features);
        }
        means
            .into_iter()
            .map(|(cluster, m)| (cluster, m.rounded()))
            .collect()
    }

    /// One (cluster, segment, advice) entry per cluster id, ascending.
    ///
    /// Fails when a cluster id carries two different label pairs; that is
    /// corrupted input and is reported rather than resolved.
    pub fn advice_legend(&self) -> crate::Result<Vec<AdviceEntry>> {
        let mut legend: BTreeMap<i64, (&str, &str)> = BTreeMap::new();
        for record in self.records {
            let labels = (record.segment.as_str(), record.advice.as_str());
            let (segment, advice) = *legend.entry(record.cluster).or_insert(labels);
            if (segment, advice) != labels {
                return Err(Error::InconsistentClusterMapping {
                    cluster: record.cluster,
                    first_segment: segment.to_string(),
                    first_advice: advice.to_string(),
                    second_segment: record.segment.clone(),
                    second_advice: record.advice.clone(),
                });
            }
        }

        Ok(legend
            .into_iter()
            .map(|(cluster, (segment, advice))| AdviceEntry {
                cluster,
                segment: segment.to_string(),
                advice: advice.to_string(),
            })
            .collect())
    }

    /// Records in `segment`; `None` or "All" returns everything
    pub fn filter_by_segment(&self, segment: Option<&str>) -> Vec<&'a ClusterAssignment> {
        match selection(segment) {
            None => self.records.iter().collect(),
            Some(segment) => self.records.iter().filter(|r| r.segment == segment).collect(),
        }
    }

    /// Distinct non-empty segment labels, sorted
    pub fn segments(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !r.segment.is_empty())
            .map(|r| r.segment.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
