//! Error taxonomy shared by the pipeline stages and the scoring boundary

use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Clean,
    Aggregate,
    Label,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Aggregate => "aggregate",
            Stage::Label => "label",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Unrecoverable failure inside a single stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error("required column '{column}' is missing")]
    Schema { column: String },

    #[error("clustering failed: {reason}")]
    Cluster { reason: String },

    #[error("column '{column}' has no value at row {row}")]
    MissingValue { column: String, row: usize },

    #[error("unparseable timestamp '{value}' at row {row}")]
    InvalidTimestamp { row: usize, value: String },

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn schema(column: impl Into<String>) -> Self {
        StageError::Schema {
            column: column.into(),
        }
    }

    pub fn cluster(reason: impl Into<String>) -> Self {
        StageError::Cluster {
            reason: reason.into(),
        }
    }
}

/// A stage failure tagged with the stage that raised it
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("no input CSV found in '{dir}'")]
    NoInput { dir: String },
}

impl PipelineError {
    /// Stage that aborted the run, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::NoInput { .. } => None,
        }
    }
}

/// Extension for tagging a stage result with its stage
pub trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<StageError>> StageContext<T> for Result<T, E> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::Stage {
            stage,
            source: e.into(),
        })
    }
}

/// Failure computing a single feature's WoE/IV diagnostic; never fatal to a run
#[derive(Error, Debug)]
pub enum DiagnosticError {
    #[error("cannot bin '{feature}': {reason}")]
    Binning { feature: String, reason: String },

    #[error("column '{0}' is missing")]
    MissingColumn(String),

    #[error("target column '{column}' holds non-binary value {value}")]
    NonBinaryTarget { column: String, value: f64 },

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

/// Response class the serving layer maps a scoring failure onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    BadRequest,
    ServiceUnavailable,
    Internal,
}

impl ResponseClass {
    /// HTTP status a serving layer would answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ResponseClass::BadRequest => 400,
            ResponseClass::ServiceUnavailable => 503,
            ResponseClass::Internal => 500,
        }
    }
}

/// Failure at the scoring boundary
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("invalid scoring request: {0}")]
    Validation(String),

    #[error("no trained model is loaded")]
    ModelUnavailable,

    #[error("internal scoring error: {0}")]
    Internal(String),
}

impl ScoringError {
    pub fn class(&self) -> ResponseClass {
        match self {
            ScoringError::Validation(_) => ResponseClass::BadRequest,
            ScoringError::ModelUnavailable => ResponseClass::ServiceUnavailable,
            ScoringError::Internal(_) => ResponseClass::Internal,
        }
    }

    /// Message safe to put on the wire; internal details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            ScoringError::Internal(_) => "internal scoring error".to_string(),
            other => other.to_string(),
        }
    }
}
