//! K-Means clustering and proxy risk labeling on RFM features

use crate::data::{CHANNEL_ID, CUSTOMER_ID};
use crate::error::StageError;
use crate::rfm::{RfmTable, FREQUENCY, MONETARY_MEAN, MONETARY_STD, MONETARY_TOTAL, RECENCY};
use crate::scaler::MinMaxScaler;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::{DataFrame, NamedFrom, PolarsResult, Series};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::Deserialize;

pub const CLUSTER: &str = "Cluster";
pub const RISK_LABEL: &str = "Risk_Label";

/// K-Means settings; the seed makes partition assignment reproducible
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub n_clusters: usize,
    pub seed: u64,
    /// Independent initializations; the run with the lowest inertia is kept
    pub n_runs: usize,
    pub max_iters: u64,
    pub tolerance: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            n_clusters: 3,
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted partition of the scaled feature space
#[derive(Debug, Clone)]
pub struct ClusterModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in scaled space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl ClusterModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` points
    pub fn silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = features.row(i);
            let own = self.labels[i];

            let mut same = (0.0, 0usize);
            let mut other = vec![(0.0, 0usize); self.n_clusters];
            for j in (0..n_samples).filter(|&j| j != i) {
                let distance = squared_distance(&point, &features.row(j)).sqrt();
                let label = self.labels[j];
                if label == own {
                    same.0 += distance;
                    same.1 += 1;
                } else if label < self.n_clusters {
                    other[label].0 += distance;
                    other[label].1 += 1;
                }
            }

            let a = if same.1 == 0 { 0.0 } else { same.0 / same.1 as f64 };
            let b = other
                .iter()
                .filter(|(_, count)| *count > 0)
                .map(|(sum, count)| sum / *count as f64)
                .fold(f64::INFINITY, f64::min);

            silhouette_sum += if b.is_infinite() || (a == 0.0 && b == 0.0) {
                0.0
            } else {
                (b - a) / a.max(b)
            };
        }

        silhouette_sum / n_samples as f64
    }
}

/// Fit K-Means on already-scaled features.
///
/// Fails when the cluster count is zero or exceeds the number of rows.
pub fn fit_kmeans(features: &Array2<f64>, params: &ClusterParams) -> Result<ClusterModel, StageError> {
    let n_samples = features.nrows();
    if params.n_clusters == 0 {
        return Err(StageError::cluster("number of clusters must be positive"));
    }
    if n_samples < params.n_clusters {
        return Err(StageError::cluster(format!(
            "number of customers ({}) is smaller than number of clusters ({})",
            n_samples, params.n_clusters
        )));
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let rng = Pcg64Mcg::seed_from_u64(params.seed);
    let model = KMeans::params_with(params.n_clusters, rng, L2Dist)
        .n_runs(params.n_runs.max(1))
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| StageError::cluster(e.to_string()))?;

    let labels: Array1<usize> = model.predict(dataset.records());
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(ClusterModel {
        n_clusters: params.n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Customers with their cluster assignment and binary proxy risk label
#[derive(Debug, Clone)]
pub struct LabeledCustomers {
    pub rfm: RfmTable,
    pub clusters: Vec<usize>,
    /// 1 for members of the high-risk cluster, 0 otherwise
    pub risk_labels: Vec<u8>,
    pub high_risk_cluster: usize,
    pub scaler: MinMaxScaler,
    pub model: ClusterModel,
    /// Min-max scaled Recency, Frequency, Monetary_Total the model was fit on
    pub scaled: Array2<f64>,
}

impl LabeledCustomers {
    pub fn high_risk_count(&self) -> usize {
        self.risk_labels.iter().filter(|&&l| l == 1).count()
    }

    /// Mean unscaled Recency per cluster; `None` for empty clusters
    pub fn cluster_mean_recency(&self) -> Vec<Option<f64>> {
        mean_recency_by_cluster(&self.rfm, &self.clusters, self.model.n_clusters)
    }

    /// Processed customer table: the RFM columns followed by Cluster and Risk_Label
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let rows = &self.rfm.customers;
        DataFrame::new(vec![
            Series::new(
                CUSTOMER_ID,
                rows.iter().map(|r| r.customer_id.clone()).collect::<Vec<_>>(),
            ),
            Series::new(RECENCY, rows.iter().map(|r| r.recency).collect::<Vec<_>>()),
            Series::new(
                FREQUENCY,
                rows.iter().map(|r| r.frequency as i64).collect::<Vec<_>>(),
            ),
            Series::new(
                MONETARY_TOTAL,
                rows.iter().map(|r| r.monetary_total).collect::<Vec<_>>(),
            ),
            Series::new(
                MONETARY_MEAN,
                rows.iter().map(|r| r.monetary_mean).collect::<Vec<_>>(),
            ),
            Series::new(
                MONETARY_STD,
                rows.iter().map(|r| r.monetary_std).collect::<Vec<_>>(),
            ),
            Series::new(
                CHANNEL_ID,
                rows.iter().map(|r| r.channel_id.clone()).collect::<Vec<_>>(),
            ),
            Series::new(
                CLUSTER,
                self.clusters.iter().map(|&c| c as i64).collect::<Vec<_>>(),
            ),
            Series::new(
                RISK_LABEL,
                self.risk_labels.iter().map(|&l| l as i32).collect::<Vec<_>>(),
            ),
        ])
    }
}

/// Cluster customers on scaled Recency, Frequency and Monetary_Total and flag the
/// cluster with the highest mean Recency as high risk.
pub fn assign_risk_label(rfm: RfmTable, params: &ClusterParams) -> Result<LabeledCustomers, StageError> {
    let raw = rfm_matrix(&rfm);
    let scaler = MinMaxScaler::fit(&raw);
    let scaled = scaler.transform(&raw);

    let model = fit_kmeans(&scaled, params)?;
    let clusters = model.labels.to_vec();

    let means = mean_recency_by_cluster(&rfm, &clusters, model.n_clusters);
    let high_risk_cluster = highest_mean(&means)
        .ok_or_else(|| StageError::cluster("no non-empty cluster to label"))?;

    let risk_labels: Vec<u8> = clusters
        .iter()
        .map(|&c| u8::from(c == high_risk_cluster))
        .collect();

    log::info!(
        "cluster {} flagged high risk: {} of {} customers (inertia {:.4})",
        high_risk_cluster,
        risk_labels.iter().filter(|&&l| l == 1).count(),
        clusters.len(),
        model.inertia
    );

    Ok(LabeledCustomers {
        rfm,
        clusters,
        risk_labels,
        high_risk_cluster,
        scaler,
        model,
        scaled,
    })
}

/// Raw (Recency, Frequency, Monetary_Total) matrix, one row per customer
pub fn rfm_matrix(rfm: &RfmTable) -> Array2<f64> {
    let mut data = Vec::with_capacity(rfm.len() * 3);
    for c in &rfm.customers {
        data.extend_from_slice(&[c.recency as f64, c.frequency as f64, c.monetary_total]);
    }
    Array2::from_shape_vec((rfm.len(), 3), data).unwrap_or_else(|_| Array2::zeros((0, 3)))
}

fn mean_recency_by_cluster(rfm: &RfmTable, clusters: &[usize], n_clusters: usize) -> Vec<Option<f64>> {
    let mut sums = vec![(0.0, 0usize); n_clusters];
    for (customer, &cluster) in rfm.customers.iter().zip(clusters) {
        if let Some(slot) = sums.get_mut(cluster) {
            slot.0 += customer.recency as f64;
            slot.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect()
}

/// Index of the highest mean; the lowest index wins ties
fn highest_mean(means: &[Option<f64>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, mean) in means.iter().enumerate() {
        if let Some(mean) = *mean {
            if best.map_or(true, |(_, b)| mean > b) {
                best = Some((idx, mean));
            }
        }
    }
    best.map(|(idx, _)| idx)
}

/// Within-cluster sum of squares
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| squared_distance(&features.row(i), &centroids.row(cluster)))
        .sum()
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfm::CustomerRfm;

    fn customer(id: &str, recency: i64, frequency: usize, total: f64) -> CustomerRfm {
        CustomerRfm {
            customer_id: id.to_string(),
            recency,
            frequency,
            monetary_total: total,
            monetary_mean: total / frequency as f64,
            monetary_std: 0.0,
            channel_id: "Web".to_string(),
        }
    }

    /// Three dormant low-value customers and three active high-value ones
    fn create_test_rfm() -> RfmTable {
        RfmTable {
            customers: vec![
                customer("A", 90, 1, 10.0),
                customer("B", 95, 1, 12.0),
                customer("C", 88, 2, 15.0),
                customer("D", 1, 40, 5000.0),
                customer("E", 0, 42, 5200.0),
                customer("F", 2, 38, 4900.0),
            ],
        }
    }

    fn params(n_clusters: usize) -> ClusterParams {
        ClusterParams {
            n_clusters,
            ..ClusterParams::default()
        }
    }

    #[test]
    fn test_fit_kmeans() {
        let raw = rfm_matrix(&create_test_rfm());
        let scaled = MinMaxScaler::fit(&raw).transform(&raw);
        let model = fit_kmeans(&scaled, &params(3)).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[3, 3]);
        assert_eq!(model.cluster_sizes().iter().sum::<usize>(), 6);
        assert!(model.inertia >= 0.0 && model.inertia.is_finite());
    }

    #[test]
    fn test_dormant_cluster_is_high_risk() {
        let labeled = assign_risk_label(create_test_rfm(), &params(2)).unwrap();

        assert_eq!(labeled.risk_labels, vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(labeled.high_risk_count(), 3);
    }

    #[test]
    fn test_high_risk_cluster_has_strictly_highest_recency() {
        for k in 2..=4 {
            let labeled = assign_risk_label(create_test_rfm(), &params(k)).unwrap();
            let means = labeled.cluster_mean_recency();
            let flagged = means[labeled.high_risk_cluster].unwrap();

            for (idx, mean) in means.iter().enumerate() {
                if let (true, Some(mean)) = (idx != labeled.high_risk_cluster, mean) {
                    assert!(flagged > *mean, "k={k}: cluster {idx} mean {mean} >= {flagged}");
                }
            }
            assert!(labeled.risk_labels.iter().all(|&l| l <= 1));
        }
    }

    #[test]
    fn test_labels_reproducible_for_seed() {
        let first = assign_risk_label(create_test_rfm(), &params(3)).unwrap();
        let second = assign_risk_label(create_test_rfm(), &params(3)).unwrap();

        assert_eq!(first.clusters, second.clusters);
        assert_eq!(first.risk_labels, second.risk_labels);
    }

    #[test]
    fn test_too_many_clusters() {
        let result = assign_risk_label(create_test_rfm(), &params(7));
        assert!(matches!(result, Err(StageError::Cluster { .. })));

        let result = assign_risk_label(create_test_rfm(), &params(0));
        assert!(matches!(result, Err(StageError::Cluster { .. })));
    }

    #[test]
    fn test_silhouette_well_separated() {
        let labeled = assign_risk_label(create_test_rfm(), &params(2)).unwrap();
        let score = labeled.model.silhouette_sample(&labeled.scaled, 100);
        assert!(score > 0.5, "silhouette {score}");
    }

    #[test]
    fn test_to_frame_columns() {
        let labeled = assign_risk_label(create_test_rfm(), &params(2)).unwrap();
        let frame = labeled.to_frame().unwrap();

        assert_eq!(frame.height(), 6);
        assert_eq!(
            frame.get_column_names(),
            vec![
                CUSTOMER_ID,
                RECENCY,
                FREQUENCY,
                MONETARY_TOTAL,
                MONETARY_MEAN,
                MONETARY_STD,
                CHANNEL_ID,
                CLUSTER,
                RISK_LABEL
            ]
        );
    }

    #[test]
    fn test_highest_mean_tie_keeps_lowest_index() {
        assert_eq!(highest_mean(&[Some(3.0), None, Some(3.0)]), Some(0));
        assert_eq!(highest_mean(&[None, None]), None);
    }
}
