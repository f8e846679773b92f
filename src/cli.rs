//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

/// Customer risk scoring: RFM features, k-means proxy labels and model scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the labeled customer table from raw transactions
    Pipeline(PipelineArgs),
    /// Score one customer's RFM features with a trained model
    Score(ScoreArgs),
}

#[derive(ClapArgs, Debug, Default)]
pub struct PipelineArgs {
    /// Path to the raw transaction CSV (default: first CSV in the raw directory)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output path for the processed customer table
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON config file; flags given here override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Seed for cluster initialization
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of K-Means initializations
    #[arg(long)]
    pub n_runs: Option<usize>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<u64>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Quantile bins for WoE/IV diagnostics
    #[arg(long)]
    pub bins: Option<usize>,
}

impl PipelineArgs {
    /// Defaults, then the config file, then explicit flags
    pub fn resolve_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(input) = &self.input {
            config.input = Some(input.clone());
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(k) = self.clusters {
            config.cluster.n_clusters = k;
        }
        if let Some(seed) = self.seed {
            config.cluster.seed = seed;
        }
        if let Some(n_runs) = self.n_runs {
            config.cluster.n_runs = n_runs;
        }
        if let Some(max_iters) = self.max_iters {
            config.cluster.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            config.cluster.tolerance = tolerance;
        }
        if let Some(bins) = self.bins {
            config.woe_bins = bins;
        }
        Ok(config)
    }
}

#[derive(ClapArgs, Debug)]
pub struct ScoreArgs {
    /// Path to the trained model artifact (JSON)
    #[arg(short, long, default_value = "models/model.json")]
    pub model: PathBuf,

    /// Request as inline JSON
    /// Example: --request '{"Recency": 3, "Frequency": 12, "Monetary_Total": 5000,
    /// "Monetary_Mean": 416.6, "Monetary_Std": 120.5}'
    #[arg(short, long, conflicts_with = "request_file")]
    pub request: Option<String>,

    /// Path to a file holding the request JSON
    #[arg(long)]
    pub request_file: Option<PathBuf>,
}

impl ScoreArgs {
    pub fn parse_request(&self) -> crate::Result<Value> {
        let raw = match (&self.request, &self.request_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => fs::read_to_string(path)?,
            (None, None) => anyhow::bail!("provide --request or --request-file"),
        };
        serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("Invalid request JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_flags_override_defaults() {
        let args = Args::try_parse_from([
            "riskforge", "pipeline", "-i", "raw.csv", "-k", "4", "--seed", "7", "-v",
        ])
        .unwrap();
        assert!(args.verbose);

        let Command::Pipeline(pipeline) = args.command else {
            panic!("expected pipeline subcommand");
        };
        let config = pipeline.resolve_config().unwrap();
        assert_eq!(config.input, Some(PathBuf::from("raw.csv")));
        assert_eq!(config.cluster.n_clusters, 4);
        assert_eq!(config.cluster.seed, 7);
        assert_eq!(config.cluster.n_runs, 10);
        assert_eq!(config.output, PathBuf::from("data/processed/data.csv"));
    }

    #[test]
    fn test_parse_request() {
        let mut args = ScoreArgs {
            model: PathBuf::from("model.json"),
            request: Some(r#"{"Recency": 30}"#.to_string()),
            request_file: None,
        };

        let request = args.parse_request().unwrap();
        assert_eq!(request["Recency"], 30);

        args.request = Some("invalid".to_string());
        assert!(args.parse_request().is_err());

        args.request = None;
        assert!(args.parse_request().is_err());
    }
}
