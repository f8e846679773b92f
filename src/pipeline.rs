//! Batch pipeline: raw transactions to a labeled customer table

use crate::config::PipelineConfig;
use crate::data::{clean_transactions, discover_input, load_transactions, write_frame};
use crate::error::{PipelineError, Stage, StageContext};
use crate::model::{assign_risk_label, LabeledCustomers, RISK_LABEL};
use crate::rfm::calculate_rfm;
use crate::woe::{feature_diagnostics, FeatureDiagnostic};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Everything a run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub transactions: usize,
    pub labeled: LabeledCustomers,
    pub silhouette: f64,
    pub diagnostics: Vec<FeatureDiagnostic>,
    pub elapsed: Duration,
}

/// Resolve the input CSV: the configured path, else the first CSV in `raw_dir`
pub fn resolve_input(config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    match &config.input {
        Some(path) => Ok(path.clone()),
        None => discover_input(&config.raw_dir).ok_or_else(|| PipelineError::NoInput {
            dir: config.raw_dir.display().to_string(),
        }),
    }
}

/// Run every stage; the first stage failure aborts the run
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    let start_time = Instant::now();
    let input = resolve_input(config)?;

    log::info!("loading data from {}", input.display());
    let raw = load_transactions(&input).in_stage(Stage::Ingest)?;

    log::info!("cleaning data and extracting temporal features");
    let cleaned = clean_transactions(raw).in_stage(Stage::Clean)?;
    let transactions = cleaned.height();

    log::info!("engineering RFM features");
    let rfm = calculate_rfm(&cleaned).in_stage(Stage::Aggregate)?;

    log::info!("creating proxy target with {} clusters", config.cluster.n_clusters);
    let labeled = assign_risk_label(rfm, &config.cluster).in_stage(Stage::Label)?;

    let sizes = labeled.model.cluster_sizes();
    for (cluster, size) in sizes.iter().enumerate() {
        log::info!("cluster {}: {} customers", cluster, size);
    }
    let silhouette = labeled
        .model
        .silhouette_sample(&labeled.scaled, 100.min(labeled.rfm.len()));
    log::info!("silhouette score (sample): {:.3}", silhouette);

    let mut frame = labeled.to_frame().in_stage(Stage::Persist)?;

    log::info!("performing WoE/IV analysis on RFM features");
    let diagnostics = feature_diagnostics(
        &frame,
        &config.diagnostic_features,
        RISK_LABEL,
        config.woe_bins,
    );

    write_frame(&mut frame, &config.output).in_stage(Stage::Persist)?;
    log::info!("saved {} customers to {}", frame.height(), config.output.display());

    Ok(PipelineReport {
        input,
        output: config.output.clone(),
        transactions,
        labeled,
        silhouette,
        diagnostics,
        elapsed: start_time.elapsed(),
    })
}
