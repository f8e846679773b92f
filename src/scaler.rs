//! Column-wise feature scalers over ndarray matrices

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Min-max scaler mapping each column onto [0, 1] using the fitted bounds.
///
/// A column whose min equals its max maps to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl MinMaxScaler {
    /// Fit on the observed per-column min and max of `data`
    pub fn fit(data: &Array2<f64>) -> Self {
        let min = data.fold_axis(Axis(0), f64::INFINITY, |&acc, &x| acc.min(x));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &x| acc.max(x));
        Self { min, max }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data.clone();
        for mut row in scaled.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                let range = self.max[j] - self.min[j];
                *value = if range > 0.0 {
                    (*value - self.min[j]) / range
                } else {
                    0.0
                };
            }
        }
        scaled
    }
}

/// Standardizing scaler whose parameters are frozen at training time.
///
/// Zero-variance columns keep a scale of 1 so they only get centered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit with population standard deviation per column
    pub fn fit(data: &Array2<f64>) -> Self {
        let n = data.nrows().max(1) as f64;
        let mut mean = Vec::with_capacity(data.ncols());
        let mut scale = Vec::with_capacity(data.ncols());

        for column in data.columns() {
            let mu = column.sum() / n;
            let var = column.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            mean.push(mu);
            scale.push(if sd > 0.0 { sd } else { 1.0 });
        }

        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Scale a single row; callers check the width against `n_features` first
    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (mu, sd))| (x - mu) / sd)
            .collect()
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data.clone();
        for mut row in scaled.rows_mut() {
            let transformed = self.transform_row(row.view());
            row.assign(&transformed);
        }
        scaled
    }
}
