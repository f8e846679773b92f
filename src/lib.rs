//! RiskForge: customer risk scoring built on RFM analysis
//!
//! Raw transactions are aggregated into Recency/Frequency/Monetary features per
//! customer, K-Means clustering on those features yields a proxy risk label, and
//! Weight-of-Evidence/Information-Value diagnostics measure how well each feature
//! separates it. The scoring contract fixes the feature layout a trained
//! classifier consumes at inference time.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod rfm;
pub mod scaler;
pub mod scoring;
pub mod woe;

// Re-export public items for easier access
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{add_temporal_features, clean_transactions, load_transactions};
pub use error::{DiagnosticError, PipelineError, ResponseClass, ScoringError, Stage, StageError};
pub use model::{assign_risk_label, fit_kmeans, ClusterModel, ClusterParams, LabeledCustomers};
pub use pipeline::{run_pipeline, PipelineReport};
pub use rfm::{aggregate, calculate_rfm, CustomerRfm, RfmTable, Transaction};
pub use scoring::{
    validate_request, FeatureSchema, FeatureVector, LogisticRiskModel, ModelArtifact,
    RiskClassifier, ScoringResponse, ScoringService,
};
pub use woe::{calculate_woe_iv, feature_diagnostics, DiagnosticOutcome, FeatureDiagnostic, WoeIvReport};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
