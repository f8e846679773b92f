//! Scoring contract: the feature vector a trained classifier consumes and the
//! service that validates one customer's submission and scores it.

use crate::data::CHANNEL_ID;
use crate::error::ScoringError;
use crate::rfm::{FREQUENCY, MONETARY_MEAN, MONETARY_STD, MONETARY_TOTAL, RECENCY};
use crate::scaler::StandardScaler;
use anyhow::Context;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Numeric features in the order every model is trained on
pub const NUMERIC_FEATURES: [&str; 5] = [
    RECENCY,
    FREQUENCY,
    MONETARY_TOTAL,
    MONETARY_MEAN,
    MONETARY_STD,
];

/// Which feature layout a model was trained against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSchema {
    Rfm,
    /// The RFM features followed by ChannelId as a categorical
    RfmWithChannel,
}

impl FeatureSchema {
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = NUMERIC_FEATURES.to_vec();
        if *self == FeatureSchema::RfmWithChannel {
            columns.push(CHANNEL_ID);
        }
        columns
    }
}

/// Validated features in schema order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub numeric: [f64; 5],
    pub channel_id: Option<String>,
}

/// Validate a raw feature mapping and lay it out in schema order.
///
/// Key order in the submission is irrelevant; unknown keys are ignored.
pub fn validate_request(schema: FeatureSchema, request: &Value) -> Result<FeatureVector, ScoringError> {
    let fields = request
        .as_object()
        .ok_or_else(|| ScoringError::Validation("request must be a JSON object".to_string()))?;

    let mut numeric = [0.0; 5];
    for (slot, name) in numeric.iter_mut().zip(NUMERIC_FEATURES) {
        *slot = if name == RECENCY || name == FREQUENCY {
            count_field(fields, name)?
        } else {
            amount_field(fields, name)?
        };
    }

    let channel_id = match schema {
        FeatureSchema::Rfm => None,
        FeatureSchema::RfmWithChannel => Some(channel_field(fields)?),
    };

    Ok(FeatureVector {
        numeric,
        channel_id,
    })
}

fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a Value, ScoringError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ScoringError::Validation(format!(
            "missing required feature '{name}'"
        ))),
        Some(value) => Ok(value),
    }
}

fn count_field(fields: &Map<String, Value>, name: &str) -> Result<f64, ScoringError> {
    let value = field(fields, name)?;
    let count = match value.as_u64() {
        Some(n) => n as f64,
        // Integral floats such as 3.0 are accepted as counts
        None => value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .ok_or_else(|| {
                ScoringError::Validation(format!(
                    "'{name}' must be a non-negative integer, got {value}"
                ))
            })?,
    };
    Ok(count)
}

fn amount_field(fields: &Map<String, Value>, name: &str) -> Result<f64, ScoringError> {
    let value = field(fields, name)?;
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| {
            ScoringError::Validation(format!(
                "'{name}' must be a non-negative number, got {value}"
            ))
        })
}

fn channel_field(fields: &Map<String, Value>) -> Result<String, ScoringError> {
    let channel = match field(fields, CHANNEL_ID)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ScoringError::Validation(format!(
                "'{CHANNEL_ID}' must be an identifier string, got {other}"
            )))
        }
    };
    if channel.is_empty() {
        return Err(ScoringError::Validation(format!(
            "'{CHANNEL_ID}' must not be empty"
        )));
    }
    Ok(channel)
}

/// An externally trained estimator.
///
/// Both calls must come from the same fitted estimator so that the class and the
/// probability share one decision threshold.
pub trait RiskClassifier: Send + Sync {
    /// `[P(normal), P(high risk)]` for one row
    fn predict_proba(&self, features: &FeatureVector) -> anyhow::Result<[f64; 2]>;

    /// Discrete class (0 or 1) for one row
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<u8>;
}

fn default_threshold() -> f64 {
    0.5
}

/// Logistic regression over the (scaled) numeric features plus an optional
/// per-channel offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRiskModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Unknown channels contribute nothing
    #[serde(default)]
    pub channel_weights: HashMap<String, f64>,
}

impl LogisticRiskModel {
    fn probability(&self, features: &FeatureVector) -> anyhow::Result<f64> {
        if self.coefficients.len() != features.numeric.len() {
            anyhow::bail!(
                "model has {} coefficients for {} features",
                self.coefficients.len(),
                features.numeric.len()
            );
        }
        let channel_offset = features
            .channel_id
            .as_ref()
            .and_then(|c| self.channel_weights.get(c))
            .copied()
            .unwrap_or(0.0);
        let z = self.intercept
            + channel_offset
            + self
                .coefficients
                .iter()
                .zip(features.numeric.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl RiskClassifier for LogisticRiskModel {
    fn predict_proba(&self, features: &FeatureVector) -> anyhow::Result<[f64; 2]> {
        let p = self.probability(features)?;
        Ok([1.0 - p, p])
    }

    fn predict(&self, features: &FeatureVector) -> anyhow::Result<u8> {
        Ok(u8::from(self.probability(features)? >= self.threshold))
    }
}

/// Serialized trained model: layout, frozen scaler and estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub model: LogisticRiskModel,
}

impl ModelArtifact {
    pub fn from_path(path: &Path) -> crate::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading model artifact {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing model artifact {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResponse {
    /// Probability of the high-risk class, rounded to 4 decimal places
    pub risk_probability: f64,
    pub is_high_risk: bool,
}

struct LoadedModel {
    schema: FeatureSchema,
    scaler: Option<StandardScaler>,
    classifier: Box<dyn RiskClassifier>,
}

/// Owns the model loaded at startup; never reloaded or mutated afterwards.
///
/// Handlers share it by reference; scoring only reads.
pub struct ScoringService {
    model: Option<LoadedModel>,
}

impl ScoringService {
    /// A service with no model; every score call reports `ModelUnavailable`
    pub fn unavailable() -> Self {
        Self { model: None }
    }

    pub fn with_model(
        schema: FeatureSchema,
        scaler: Option<StandardScaler>,
        classifier: Box<dyn RiskClassifier>,
    ) -> Self {
        Self {
            model: Some(LoadedModel {
                schema,
                scaler,
                classifier,
            }),
        }
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self::with_model(artifact.schema, artifact.scaler, Box::new(artifact.model))
    }

    /// Load the artifact at `path`; a missing file yields a not-ready service
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            log::warn!("model artifact {} not found; scoring unavailable", path.display());
            return Ok(Self::unavailable());
        }
        let artifact = ModelArtifact::from_path(path)?;
        log::info!(
            "loaded {:?} model from {} (scaler: {})",
            artifact.schema,
            path.display(),
            artifact.scaler.is_some()
        );
        Ok(Self::from_artifact(artifact))
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn schema(&self) -> Option<FeatureSchema> {
        self.model.as_ref().map(|m| m.schema)
    }

    /// Validate and score one raw feature mapping
    pub fn score(&self, request: &Value) -> Result<ScoringResponse, ScoringError> {
        let model = self.model.as_ref().ok_or(ScoringError::ModelUnavailable)?;
        let features = validate_request(model.schema, request)?;
        model.score(features)
    }
}

impl LoadedModel {
    fn score(&self, mut features: FeatureVector) -> Result<ScoringResponse, ScoringError> {
        if let Some(scaler) = &self.scaler {
            if scaler.n_features() != features.numeric.len() {
                return Err(internal(format!(
                    "scaler expects {} features, contract has {}",
                    scaler.n_features(),
                    features.numeric.len()
                )));
            }
            let scaled = scaler.transform_row(ArrayView1::from(&features.numeric[..]));
            for (slot, value) in features.numeric.iter_mut().zip(scaled.iter()) {
                *slot = *value;
            }
        }

        let proba = self
            .classifier
            .predict_proba(&features)
            .map_err(|e| internal(format!("{e:#}")))?;
        let class = self
            .classifier
            .predict(&features)
            .map_err(|e| internal(format!("{e:#}")))?;

        let p = proba[1];
        if !(0.0..=1.0).contains(&p) {
            return Err(internal(format!("probability {p} outside [0, 1]")));
        }
        if class > 1 {
            return Err(internal(format!("class {class} is not binary")));
        }

        Ok(ScoringResponse {
            risk_probability: (p * 10_000.0).round() / 10_000.0,
            is_high_risk: class == 1,
        })
    }
}

fn internal(detail: String) -> ScoringError {
    log::error!("scoring failed: {}", detail);
    ScoringError::Internal(detail)
}
