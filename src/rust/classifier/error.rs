use ort::Error as OrtError;
use std::fmt;

/// Represents the different ways a single classifier can fail to produce a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// The feature extractor is still loading or failed to load
    ModelUnavailable(String),
    /// No valid trained head is available for prediction
    ModelNotTrained(String),
    /// At least one class has no samples to compare against
    InsufficientData(String),
    /// A payload could not be decoded into a raster image
    InvalidImage(String),
    /// Error occurred while loading or running the ONNX model
    ModelError(String),
    /// Error occurred while making predictions
    PredictionError(String),
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            Self::ModelNotTrained(msg) => write!(f, "Model not trained: {}", msg),
            Self::InsufficientData(msg) => write!(f, "Insufficient data: {}", msg),
            Self::InvalidImage(msg) => write!(f, "Invalid image: {}", msg),
            Self::ModelError(msg) => write!(f, "Model error: {}", msg),
            Self::PredictionError(msg) => write!(f, "Prediction error: {}", msg),
        }
    }
}

impl std::error::Error for ClassifierError {}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::ModelError(err.to_string())
    }
}
