//! Gaussian mixture segmentation producing the cluster export

use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_clustering::GaussianMixtureModel;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::clusters::ClusterAssignment;
use crate::config::{GmmSettings, SegmentProfile};
use crate::error::Error;
use crate::features::CustomerFeatures;

/// Standard scaler fitted on the training features
fn fit_scaler(raw: &Array2<f64>) -> crate::Result<LinearScaler<f64>> {
    let dataset = Dataset::new(raw.clone(), Array1::<usize>::zeros(raw.nrows()));
    LinearScaler::standard()
        .fit(&dataset)
        .map_err(|e| Error::Clustering(e.to_string()))
}

/// Fitted mixture with clusters relabeled by ascending customer value
pub struct GmmSegmentation {
    model: GaussianMixtureModel<f64>,
    scaler: LinearScaler<f64>,
    /// Raw mixture component -> (cluster id, profile)
    labels: BTreeMap<usize, (i64, SegmentProfile)>,
    /// One row per training customer
    pub assignments: Vec<ClusterAssignment>,
    /// Cluster means in standardized space, row index = cluster id
    pub centroids: Array2<f64>,
}

impl GmmSegmentation {
    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters()];
        for assignment in &self.assignments {
            sizes[assignment.cluster as usize] += 1;
        }
        sizes
    }

    /// Cluster id, segment and advice for a customer outside the training set
    pub fn predict(&self, recency: f64, frequency: f64, monetary: f64) -> crate::Result<(i64, SegmentProfile)> {
        let raw = Array2::from_shape_vec((1, 3), vec![recency, frequency, monetary])
            .map_err(|e| Error::Clustering(e.to_string()))?;
        let scaled = self.scaler.transform(raw);
        let component: Array1<usize> = self.model.predict(&scaled);
        self.labels
            .get(&component[0])
            .cloned()
            .ok_or_else(|| Error::Clustering(format!("component {} has no training members", component[0])))
    }
}

fn feature_matrix(features: &[CustomerFeatures]) -> crate::Result<Array2<f64>> {
    let mut raw = Vec::with_capacity(features.len() * 3);
    for f in features {
        if !f.monetary.is_finite() {
            return Err(Error::Clustering(format!(
                "customer {} has undefined monetary value",
                f.customer_id
            )));
        }
        raw.extend_from_slice(&[f.recency as f64, f64::from(f.frequency), f.monetary]);
    }
    Array2::from_shape_vec((features.len(), 3), raw).map_err(|e| Error::Clustering(e.to_string()))
}

/// Fit a Gaussian mixture on standardized R/F/M and label every customer
///
/// # Arguments
/// * `features` - Customer feature records (training set)
/// * `settings` - Component count, EM parameters, seed and segment profiles
///
/// # Returns
/// * Assignments whose cluster ids rank clusters by value (0 = lowest). Ranks
///   are spread evenly over the profile list: the lowest cluster takes the
///   first profile and the highest takes the last. Components left without
///   members are dropped.
pub fn fit_segments(features: &[CustomerFeatures], settings: &GmmSettings) -> crate::Result<GmmSegmentation> {
    let k = settings.components;
    if k < 2 || settings.profiles.len() < k {
        return Err(Error::Config(format!(
            "{} components need at least as many segment profiles, got {}",
            k,
            settings.profiles.len()
        )));
    }
    if features.len() < k {
        return Err(Error::Clustering(format!(
            "number of customers ({}) must be at least the number of components ({})",
            features.len(),
            k
        )));
    }

    let raw = feature_matrix(features)?;
    let scaler = fit_scaler(&raw)?;
    let scaled = scaler.transform(raw);

    let dataset = DatasetBase::from(scaled.clone());
    let model = GaussianMixtureModel::params(k)
        .n_runs(settings.n_runs)
        .tolerance(settings.tolerance)
        .max_n_iterations(settings.max_iterations)
        .with_rng(StdRng::seed_from_u64(settings.seed))
        .fit(&dataset)
        .map_err(|e| Error::Clustering(e.to_string()))?;
    let components: Array1<usize> = model.predict(&scaled);

    // Value score per customer: recent, frequent and high-spending rank higher
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (row, &component) in scaled.outer_iter().zip(components.iter()) {
        let entry = sums.entry(component).or_insert((0.0, 0));
        entry.0 += -row[0] + row[1] + row[2];
        entry.1 += 1;
    }
    let mut ranked: Vec<(usize, f64)> = sums
        .into_iter()
        .map(|(component, (sum, n))| (component, sum / n as f64))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let present = ranked.len();
    let last = settings.profiles.len() - 1;
    let labels: BTreeMap<usize, (i64, SegmentProfile)> = ranked
        .iter()
        .enumerate()
        .map(|(rank, &(component, _))| {
            let profile = settings.profiles[rank * last / (present - 1).max(1)].clone();
            (component, (rank as i64, profile))
        })
        .collect();

    let assignments: Vec<ClusterAssignment> = features
        .iter()
        .zip(components.iter())
        .map(|(f, component)| {
            let (cluster, profile) = &labels[component];
            ClusterAssignment {
                features: f.clone(),
                cluster: *cluster,
                segment: profile.segment.clone(),
                advice: profile.advice.clone(),
            }
        })
        .collect();

    let mut centroids: Array2<f64> = Array2::zeros((present, 3));
    let mut counts = vec![0usize; present];
    for (row, component) in scaled.outer_iter().zip(components.iter()) {
        let cluster = labels[component].0 as usize;
        let mut centroid = centroids.row_mut(cluster);
        centroid += &row;
        counts[cluster] += 1;
    }
    for (mut centroid, &n) in centroids.outer_iter_mut().zip(counts.iter()) {
        centroid /= n as f64;
    }

    info!(customers = features.len(), clusters = present, "fitted Gaussian mixture");
    debug!(?counts, "cluster sizes");

    Ok(GmmSegmentation {
        model,
        scaler,
        labels,
        assignments,
        centroids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::ClusterSummary;
    use crate::config::Settings;

    /// Two well separated groups of customers
    fn create_test_features() -> Vec<CustomerFeatures> {
        let mut features = Vec::new();
        for i in 0..20 {
            features.push(CustomerFeatures {
                customer_id: 1000 + i,
                recency: 300 + (i % 5),
                frequency: 1,
                monetary: 20.0 + i as f64,
            });
            features.push(CustomerFeatures {
                customer_id: 2000 + i,
                recency: 2 + (i % 3),
                frequency: 25 + (i % 4) as u32,
                monetary: 5000.0 + 10.0 * i as f64,
            });
        }
        features
    }

    fn two_cluster_settings() -> GmmSettings {
        let mut settings = Settings::default().gmm;
        settings.components = 2;
        settings
    }

    #[test]
    fn test_scaler_centers_columns() {
        let raw = Array2::from_shape_vec((3, 2), vec![1.0, 10.0, 2.0, 20.0, 3.0, 60.0]).unwrap();
        let scaler = fit_scaler(&raw).unwrap();
        let scaled = scaler.transform(raw);

        assert!((scaled[[0, 0]] + scaled[[2, 0]]).abs() < 1e-12);
        assert!(scaled[[1, 0]].abs() < 1e-12);
        assert!(scaled.column(1).sum().abs() < 1e-9);
    }

    #[test]
    fn test_fit_segments_ranks_clusters_by_value() {
        let features = create_test_features();
        let segmentation = fit_segments(&features, &two_cluster_settings()).unwrap();

        assert_eq!(segmentation.assignments.len(), features.len());
        assert_eq!(segmentation.n_clusters(), 2);
        assert_eq!(segmentation.cluster_sizes().iter().sum::<usize>(), features.len());

        let profiles = &Settings::default().gmm.profiles;
        for assignment in &segmentation.assignments {
            let high_value = assignment.features.customer_id >= 2000;
            let expected = if high_value { 1 } else { 0 };
            assert_eq!(assignment.cluster, expected);
            // Lowest cluster takes the first profile, highest the last
            let profile = if high_value { &profiles[3] } else { &profiles[0] };
            assert_eq!(assignment.segment, profile.segment);
        }

        // Output satisfies the cluster export contract
        let legend = ClusterSummary::new(&segmentation.assignments).advice_legend().unwrap();
        assert_eq!(legend.len(), 2);
    }

    #[test]
    fn test_fit_segments_is_reproducible() {
        let features = create_test_features();
        let first = fit_segments(&features, &two_cluster_settings()).unwrap();
        let second = fit_segments(&features, &two_cluster_settings()).unwrap();
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn test_predict_new_customer() {
        let features = create_test_features();
        let segmentation = fit_segments(&features, &two_cluster_settings()).unwrap();

        let (cluster, profile) = segmentation.predict(3.0, 26.0, 5100.0).unwrap();
        assert_eq!(cluster, 1);
        assert_eq!(profile.segment, "Champions");
    }

    #[test]
    fn test_three_clusters_spread_over_profiles() {
        let mut features = create_test_features();
        for i in 0..20 {
            features.push(CustomerFeatures {
                customer_id: 3000 + i,
                recency: 60 + (i % 4),
                frequency: 8 + (i % 3) as u32,
                monetary: 900.0 + 5.0 * i as f64,
            });
        }
        let mut settings = Settings::default().gmm;
        settings.components = 3;
        let segmentation = fit_segments(&features, &settings).unwrap();

        let legend = ClusterSummary::new(&segmentation.assignments).advice_legend().unwrap();
        let segments: Vec<&str> = legend.iter().map(|e| e.segment.as_str()).collect();
        let profiles = &settings.profiles;
        assert_eq!(
            segments,
            vec![
                profiles[0].segment.as_str(),
                profiles[1].segment.as_str(),
                profiles[3].segment.as_str()
            ]
        );
    }

    #[test]
    fn test_too_few_customers() {
        let features = create_test_features();
        let result = fit_segments(&features[..1], &two_cluster_settings());
        assert!(matches!(result, Err(Error::Clustering(_))));
    }

    #[test]
    fn test_too_few_profiles() {
        let mut settings = two_cluster_settings();
        settings.profiles.truncate(1);
        let result = fit_segments(&create_test_features(), &settings);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
