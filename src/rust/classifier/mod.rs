use std::fmt;
use async_trait::async_trait;
use serde::Serialize;

mod error;
mod utils;
pub mod embedding;
pub mod head;
pub mod transfer;
pub mod baseline;
pub mod remote;

pub use error::ClassifierError;
pub use embedding::{ExtractorHandle, ExtractorState, FeatureExtractor, OnnxExtractor};
pub use head::{LinearHead, TrainDataset, TrainOptions};
pub use transfer::{ModelSlot, TrainedModelState, TransferClassifier};
pub use baseline::BaselineClassifier;
pub use remote::{RemoteClassifier, RemoteConfig};

use crate::payload::QueryImage;
use crate::registry::ClassDefinition;

/// Identity of one of the three competing classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelIdentifier {
    TransferLearning,
    Baseline,
    Remote,
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransferLearning => write!(f, "transfer-learning"),
            Self::Baseline => write!(f, "baseline"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Why a classifier produced no score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    ModelUnavailable,
    ModelNotTrained,
    InsufficientData,
    InvalidImage,
    ModelError,
    PredictionError,
    RemoteUnavailable,
    RemoteTimeout,
    RemoteParseError,
    Internal,
}

impl From<&ClassifierError> for FailureKind {
    fn from(err: &ClassifierError) -> Self {
        match err {
            ClassifierError::ModelUnavailable(_) => Self::ModelUnavailable,
            ClassifierError::ModelNotTrained(_) => Self::ModelNotTrained,
            ClassifierError::InsufficientData(_) => Self::InsufficientData,
            ClassifierError::InvalidImage(_) => Self::InvalidImage,
            ClassifierError::ModelError(_) => Self::ModelError,
            ClassifierError::PredictionError(_) => Self::PredictionError,
        }
    }
}

/// Either a score or a failure marker in its place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    Scored { class_name: String, confidence: f32 },
    Failed { failure: FailureKind },
}

/// What one classifier concluded about a query image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub model: ModelIdentifier,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl PredictionResult {
    /// A successful prediction. Confidence is clamped into `[0, 1]`.
    pub fn scored(model: ModelIdentifier, class_name: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            model,
            outcome: Outcome::Scored {
                class_name: class_name.into(),
                confidence,
            },
            reasoning: None,
        }
    }

    pub fn failed(model: ModelIdentifier, failure: FailureKind, reasoning: impl Into<String>) -> Self {
        Self {
            model,
            outcome: Outcome::Failed { failure },
            reasoning: Some(reasoning.into()),
        }
    }

    pub fn from_error(model: ModelIdentifier, err: &ClassifierError) -> Self {
        Self::failed(model, FailureKind::from(err), err.to_string())
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Scored { class_name, .. } => Some(class_name),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self.outcome {
            Outcome::Scored { confidence, .. } => Some(confidence),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self.outcome {
            Outcome::Scored { .. } => None,
            Outcome::Failed { failure } => Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure().is_some()
    }
}

/// The shared capability of all classifiers: pick one of the current
/// classes for a query image.
///
/// `classes` is the registry snapshot taken when the query started; a
/// returned class name must be one of theirs.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    fn model(&self) -> ModelIdentifier;

    async fn classify(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<PredictionResult, ClassifierError>;
}
