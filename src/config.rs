//! Pipeline configuration: defaults, optional JSON file, then CLI overrides

use crate::model::ClusterParams;
use crate::rfm::{FREQUENCY, MONETARY_TOTAL, RECENCY};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw transaction CSV; discovered in `raw_dir` when unset
    pub input: Option<PathBuf>,
    pub raw_dir: PathBuf,
    pub output: PathBuf,
    pub cluster: ClusterParams,
    /// Quantile bins per diagnostic feature
    pub woe_bins: usize,
    pub diagnostic_features: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: None,
            raw_dir: PathBuf::from("data/raw"),
            output: PathBuf::from("data/processed/data.csv"),
            cluster: ClusterParams::default(),
            woe_bins: 4,
            diagnostic_features: vec![
                RECENCY.to_string(),
                FREQUENCY.to_string(),
                MONETARY_TOTAL.to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}
