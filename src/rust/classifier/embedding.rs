use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use image::RgbImage;
use log::{error, info};
use ndarray::Array1;
use ort::session::Session;
use ort::value::Tensor;
use tokio::sync::watch;

use super::error::ClassifierError;
use super::utils::normalize_vector;
use crate::models::ModelCharacteristics;
use crate::payload::to_nchw_tensor;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// A frozen embedding function mapping an image to a fixed-length vector.
///
/// Implementations must be pure: the same image always yields the same
/// embedding, and no call mutates the extractor. This is what allows one
/// extractor to be shared by training and any number of concurrent
/// predictions.
pub trait FeatureExtractor: Send + Sync {
    /// Embeds a single RGB image. The result has `embedding_size()` entries.
    fn embed(&self, image: &RgbImage) -> Result<Array1<f32>, ClassifierError>;

    /// Length of every vector returned by `embed`.
    fn embedding_size(&self) -> usize;
}

/// Feature extractor backed by a pretrained ONNX image network.
///
/// The model is expected to:
/// - Accept one input of shape [batch_size, 3, height, width]
/// - Produce at least one output; the first output is flattened and
///   L2-normalized to form the embedding
pub struct OnnxExtractor {
    model_path: String,
    session: Session,
    input_name: String,
    characteristics: ModelCharacteristics,
    embedding_size: usize,
}

impl fmt::Debug for OnnxExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxExtractor")
            .field("model_path", &self.model_path)
            .field("input_name", &self.input_name)
            .field("embedding_size", &self.embedding_size)
            .finish()
    }
}

impl OnnxExtractor {
    /// Loads the model and infers the embedding size by running a blank image through it.
    pub fn from_file(
        model_path: impl AsRef<Path>,
        characteristics: ModelCharacteristics,
        config: &RuntimeConfig,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(ClassifierError::ModelUnavailable(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let session = create_session_builder(config)?.commit_from_file(model_path)?;
        Self::validate_model(&session)?;
        info!("Model structure validated successfully");

        let input_name = session.inputs[0].name.clone();
        let mut extractor = Self {
            model_path: model_path.to_string_lossy().to_string(),
            session,
            input_name,
            characteristics,
            embedding_size: 0,
        };

        let blank = RgbImage::new(characteristics.input_width, characteristics.input_height);
        extractor.embedding_size = extractor.run(&blank)?.len();
        info!(
            "Loaded feature extractor {} (embedding size {})",
            extractor.model_path, extractor.embedding_size
        );
        Ok(extractor)
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    fn validate_model(session: &Session) -> Result<(), ClassifierError> {
        if session.inputs.len() != 1 {
            return Err(ClassifierError::ModelError(format!(
                "Model must have exactly 1 image input, found {}",
                session.inputs.len()
            )));
        }
        if session.outputs.is_empty() {
            return Err(ClassifierError::ModelError(
                "Model must have at least 1 output for embeddings".to_string(),
            ));
        }
        Ok(())
    }

    fn run(&self, image: &RgbImage) -> Result<Array1<f32>, ClassifierError> {
        let c = &self.characteristics;
        let input = to_nchw_tensor(image, c.input_width, c.input_height, c.mean, c.std);
        let input_dyn = input.into_dyn();
        let input_view = input_dyn.as_standard_layout();

        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.as_str(),
            Tensor::from_array(&input_view)
                .map_err(|e| ClassifierError::ModelError(format!("Failed to create input tensor: {}", e)))?,
        );

        let outputs = self.session.run(input_tensors)
            .map_err(|e| ClassifierError::ModelError(format!("Failed to run model: {}", e)))?;
        let output_tensor = outputs[0].try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::ModelError(format!("Failed to extract output tensor: {}", e)))?;

        let embedding: Array1<f32> = output_tensor.iter().copied().collect();
        if embedding.is_empty() {
            return Err(ClassifierError::ModelError("Model produced an empty embedding".into()));
        }
        Ok(normalize_vector(&embedding))
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn embed(&self, image: &RgbImage) -> Result<Array1<f32>, ClassifierError> {
        self.run(image)
    }

    fn embedding_size(&self) -> usize {
        self.embedding_size
    }
}

/// Load state of the shared feature extractor.
#[derive(Clone)]
pub enum ExtractorState {
    Loading,
    Ready(Arc<dyn FeatureExtractor>),
    Failed(String),
}

impl fmt::Debug for ExtractorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::Ready(extractor) => write!(f, "Ready(embedding_size={})", extractor.embedding_size()),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Owns the process-wide feature extractor and publishes its readiness.
///
/// The extractor is loaded once on a blocking worker; readers either poll
/// [`ExtractorHandle::get`] or await [`ExtractorHandle::wait_ready`].
#[derive(Debug)]
pub struct ExtractorHandle {
    state: watch::Sender<ExtractorState>,
}

impl ExtractorHandle {
    fn with_state(state: ExtractorState) -> Self {
        let (state, _) = watch::channel(state);
        Self { state }
    }

    /// Wraps an extractor that is already loaded.
    pub fn ready(extractor: Arc<dyn FeatureExtractor>) -> Arc<Self> {
        Arc::new(Self::with_state(ExtractorState::Ready(extractor)))
    }

    /// A handle whose extractor could not be loaded.
    pub fn failed(reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_state(ExtractorState::Failed(reason.into())))
    }

    /// Runs `loader` on the blocking pool and publishes its outcome.
    /// Must be called from within a tokio runtime.
    pub fn spawn_load<F>(loader: F) -> Arc<Self>
    where
        F: FnOnce() -> Result<Arc<dyn FeatureExtractor>, ClassifierError> + Send + 'static,
    {
        let handle = Arc::new(Self::with_state(ExtractorState::Loading));
        let publisher = Arc::clone(&handle);
        tokio::spawn(async move {
            let state = match tokio::task::spawn_blocking(loader).await {
                Ok(Ok(extractor)) => {
                    info!("Feature extractor ready");
                    ExtractorState::Ready(extractor)
                }
                Ok(Err(e)) => {
                    error!("Failed to load feature extractor: {}", e);
                    ExtractorState::Failed(e.to_string())
                }
                Err(e) => {
                    error!("Feature extractor loader panicked: {}", e);
                    ExtractorState::Failed(format!("loader panicked: {}", e))
                }
            };
            publisher.state.send_replace(state);
        });
        handle
    }

    /// Starts loading an ONNX extractor from `model_path`.
    pub fn load_onnx(
        model_path: PathBuf,
        characteristics: ModelCharacteristics,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Self::spawn_load(move || {
            let extractor = OnnxExtractor::from_file(&model_path, characteristics, &config)?;
            Ok(Arc::new(extractor) as Arc<dyn FeatureExtractor>)
        })
    }

    pub fn state(&self) -> ExtractorState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), ExtractorState::Ready(_))
    }

    /// Returns the extractor if it is loaded, without waiting.
    pub fn get(&self) -> Result<Arc<dyn FeatureExtractor>, ClassifierError> {
        Self::resolve(&self.state.borrow())
    }

    /// Waits until loading has finished, then returns the extractor or the load failure.
    pub async fn wait_ready(&self) -> Result<Arc<dyn FeatureExtractor>, ClassifierError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, ExtractorState::Loading))
            .await
            .map_err(|_| ClassifierError::ModelUnavailable("Feature extractor loader went away".into()))?
            .clone();
        Self::resolve(&state)
    }

    fn resolve(state: &ExtractorState) -> Result<Arc<dyn FeatureExtractor>, ClassifierError> {
        match state {
            ExtractorState::Ready(extractor) => Ok(Arc::clone(extractor)),
            ExtractorState::Loading => Err(ClassifierError::ModelUnavailable(
                "Feature extractor is still loading".into(),
            )),
            ExtractorState::Failed(reason) => Err(ClassifierError::ModelUnavailable(reason.clone())),
        }
    }
}
