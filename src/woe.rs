//! Weight of Evidence (WoE) and Information Value (IV) diagnostics.
//!
//! For every distinct value of a binned feature the rows are split into
//! "good" (target 0) and "bad" (target 1) populations:
//!
//! * `WoE = ln(distr_good / distr_bad)` per bin, clamped to 0 when undefined
//! * `IV  = sum((distr_good - distr_bad) * WoE)` over all bins
//!
//! IV is a divergence: near zero for a useless feature and growing with its
//! power to separate the two populations.

use crate::data::{f64_values, i64_values, string_values};
use crate::error::DiagnosticError;
use polars::prelude::*;
use serde::Serialize;
use std::fmt;

/// One row of the WoE table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WoeBin {
    /// Bin identity
    pub value: String,
    /// Rows carrying this value, including those with a null target
    pub all: usize,
    pub good: usize,
    pub bad: usize,
    pub distr_good: f64,
    pub distr_bad: f64,
    pub woe: f64,
    /// This bin's contribution to the total IV
    pub iv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WoeIvReport {
    pub feature: String,
    pub iv: f64,
    pub table: Vec<WoeBin>,
}

impl WoeIvReport {
    pub fn strength(&self) -> IvStrength {
        IvStrength::classify(self.iv)
    }
}

/// Conventional reading of a total IV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvStrength {
    Useless,
    Weak,
    Medium,
    Strong,
    Suspicious,
}

impl IvStrength {
    pub fn classify(iv: f64) -> Self {
        if iv < 0.02 {
            IvStrength::Useless
        } else if iv < 0.1 {
            IvStrength::Weak
        } else if iv < 0.3 {
            IvStrength::Medium
        } else if iv < 0.5 {
            IvStrength::Strong
        } else {
            IvStrength::Suspicious
        }
    }
}

impl fmt::Display for IvStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IvStrength::Useless => write!(f, "useless"),
            IvStrength::Weak => write!(f, "weak"),
            IvStrength::Medium => write!(f, "medium"),
            IvStrength::Strong => write!(f, "strong"),
            IvStrength::Suspicious => write!(f, "suspicious"),
        }
    }
}

const BIN_ROWS: &str = "all";
const BIN_GOOD: &str = "good";
const BIN_BAD: &str = "bad";

/// Compute WoE/IV of an already-discretized `feature` column against a 0/1 `target` column.
///
/// Bins appear in the table in order of first occurrence. Rows with a null feature
/// value are ignored; rows with a null target count toward `all` only.
pub fn calculate_woe_iv(
    frame: &DataFrame,
    feature: &str,
    target: &str,
) -> Result<WoeIvReport, DiagnosticError> {
    let values = frame
        .column(feature)
        .map_err(|_| DiagnosticError::MissingColumn(feature.to_string()))?
        .cast(&DataType::String)?;
    let labels = binary_target(
        frame
            .column(target)
            .map_err(|_| DiagnosticError::MissingColumn(target.to_string()))?,
    )?;

    let counts = DataFrame::new(vec![values, labels])?
        .lazy()
        .filter(col(feature).is_not_null())
        .group_by_stable([col(feature)])
        .agg([
            col(feature).count().alias(BIN_ROWS),
            col(target).eq(lit(0i64)).sum().alias(BIN_GOOD),
            col(target).eq(lit(1i64)).sum().alias(BIN_BAD),
        ])
        .collect()?;

    let bins = string_values(counts.column(feature)?)?;
    let rows = i64_values(counts.column(BIN_ROWS)?)?;
    let good = i64_values(counts.column(BIN_GOOD)?)?;
    let bad = i64_values(counts.column(BIN_BAD)?)?;

    let count = |column: &Vec<Option<i64>>, idx: usize| column[idx].unwrap_or(0) as usize;
    let table = bins
        .into_iter()
        .enumerate()
        .filter_map(|(idx, bin)| {
            bin.map(|bin| (bin, count(&rows, idx), count(&good, idx), count(&bad, idx)))
        })
        .collect();

    Ok(woe_table(feature, table))
}

/// Target column as `Int64`; any value other than 0 or 1 is rejected before casting
fn binary_target(series: &Series) -> Result<Series, DiagnosticError> {
    let values = f64_values(series)?;
    if let Some(value) = values
        .iter()
        .flatten()
        .find(|&&v| v != 0.0 && v != 1.0)
    {
        return Err(DiagnosticError::NonBinaryTarget {
            column: series.name().to_string(),
            value: *value,
        });
    }
    let labels: Vec<Option<i64>> = values.iter().map(|v| v.map(|v| v as i64)).collect();
    Ok(Series::new(series.name(), labels))
}

fn woe_table(feature: &str, counts: Vec<(String, usize, usize, usize)>) -> WoeIvReport {
    let total_good: usize = counts.iter().map(|c| c.2).sum();
    let total_bad: usize = counts.iter().map(|c| c.3).sum();
    let share = |n: usize, total: usize| {
        if total == 0 {
            0.0
        } else {
            n as f64 / total as f64
        }
    };

    let table: Vec<WoeBin> = counts
        .into_iter()
        .map(|(value, all, good, bad)| {
            let distr_good = share(good, total_good);
            let distr_bad = share(bad, total_bad);
            let woe = (distr_good / distr_bad).ln();
            // Empty good or bad side gives +-inf (or NaN); such bins contribute nothing
            let woe = if woe.is_finite() { woe } else { 0.0 };
            WoeBin {
                value,
                all,
                good,
                bad,
                distr_good,
                distr_bad,
                woe,
                iv: (distr_good - distr_bad) * woe,
            }
        })
        .collect();

    WoeIvReport {
        feature: feature.to_string(),
        iv: table.iter().map(|b| b.iv).sum(),
        table,
    }
}

/// Quantile bin edges with duplicate edges dropped
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    pub edges: Vec<f64>,
}

impl QuantileBins {
    /// Edges at the linearly interpolated quantiles `0, 1/q, ..., 1` of `values`
    pub fn fit(values: &[f64], q: usize) -> Result<Self, String> {
        if q == 0 {
            return Err("number of quantiles must be positive".to_string());
        }
        if values.is_empty() {
            return Err("no values to bin".to_string());
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err("values must be finite".to_string());
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut edges: Vec<f64> = Vec::with_capacity(q + 1);
        for i in 0..=q {
            let edge = quantile(&sorted, i as f64 / q as f64);
            if edges.last() != Some(&edge) {
                edges.push(edge);
            }
        }

        if edges.len() < 2 {
            return Err(format!(
                "only {} distinct bin edge(s); too few distinct values for {} quantiles",
                edges.len(),
                q
            ));
        }
        Ok(Self { edges })
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Right-closed bin index; the first bin also includes its lower edge
    pub fn assign(&self, value: f64) -> Option<usize> {
        if value < self.edges[0] {
            return None;
        }
        (0..self.n_bins()).find(|&idx| value <= self.edges[idx + 1])
    }

    pub fn label(&self, idx: usize) -> String {
        let (lo, hi) = (self.edges[idx], self.edges[idx + 1]);
        if idx == 0 {
            format!("[{lo}, {hi}]")
        } else {
            format!("({lo}, {hi}]")
        }
    }
}

fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Quantile-bin a numeric column into a `{feature}_Bin` string column
pub fn bin_feature(frame: &DataFrame, feature: &str, q: usize) -> Result<Series, DiagnosticError> {
    let binning = |reason: String| DiagnosticError::Binning {
        feature: feature.to_string(),
        reason,
    };

    let column = frame
        .column(feature)
        .map_err(|_| DiagnosticError::MissingColumn(feature.to_string()))?;
    let values: Vec<f64> = f64_values(column)?
        .into_iter()
        .map(|v| v.ok_or_else(|| binning("column contains nulls".to_string())))
        .collect::<Result<_, _>>()?;

    let bins = QuantileBins::fit(&values, q).map_err(binning)?;
    let labels: Vec<String> = values
        .iter()
        .map(|&v| {
            bins.assign(v)
                .map(|idx| bins.label(idx))
                .ok_or_else(|| binning(format!("value {v} falls outside the bin edges")))
        })
        .collect::<Result<_, _>>()?;

    Ok(Series::new(&format!("{feature}_Bin"), labels))
}

/// Outcome of one feature's diagnostic
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticOutcome {
    Computed(WoeIvReport),
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDiagnostic {
    pub feature: String,
    pub outcome: DiagnosticOutcome,
}

impl FeatureDiagnostic {
    pub fn iv(&self) -> Option<f64> {
        match &self.outcome {
            DiagnosticOutcome::Computed(report) => Some(report.iv),
            DiagnosticOutcome::Skipped { .. } => None,
        }
    }
}

/// Quantile-bin each feature and score it against `target`.
///
/// A feature that cannot be binned or scored is reported as skipped; the rest still run.
pub fn feature_diagnostics(
    frame: &DataFrame,
    features: &[String],
    target: &str,
    q: usize,
) -> Vec<FeatureDiagnostic> {
    features
        .iter()
        .map(|feature| {
            let outcome = match binned_woe_iv(frame, feature, target, q) {
                Ok(report) => {
                    log::info!(
                        "feature: {} | IV: {:.4} ({})",
                        feature,
                        report.iv,
                        report.strength()
                    );
                    DiagnosticOutcome::Computed(report)
                }
                Err(e) => {
                    log::warn!("could not calculate IV for {}: {}", feature, e);
                    DiagnosticOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            };
            FeatureDiagnostic {
                feature: feature.clone(),
                outcome,
            }
        })
        .collect()
}

fn binned_woe_iv(
    frame: &DataFrame,
    feature: &str,
    target: &str,
    q: usize,
) -> Result<WoeIvReport, DiagnosticError> {
    let binned = bin_feature(frame, feature, q)?;
    let bin_name = binned.name().to_string();
    let mut work = frame.clone();
    work.with_column(binned)?;
    calculate_woe_iv(&work, &bin_name, target)
}
