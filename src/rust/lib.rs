//! Few-shot image classification with three competing models.
//!
//! Classes are defined by a handful of example images. A frozen ONNX feature
//! extractor plus a small trainable softmax head learns them, a mean-color
//! nearest-centroid baseline needs no training at all, and a remote
//! multimodal model gets the examples in its prompt. One query fans out to
//! all three concurrently and yields one result per model.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use occipital::{
//!     BaselineClassifier, BuiltinModel, ClassRegistry, ExtractorHandle, ImagePayload,
//!     InferenceOrchestrator, ModelManager, ModelSlot, PipelineConfig, RemoteClassifier,
//!     TrainingController, TransferClassifier,
//! };
//!
//! let config = PipelineConfig::from_env();
//! let model = BuiltinModel::MobileNetV2;
//! let path = ModelManager::new_default()?
//!     .ensure_model_downloaded(&model.get_model_info())
//!     .await?;
//! let extractor = ExtractorHandle::load_onnx(path, model.characteristics(), config.runtime.clone());
//!
//! let slot = Arc::new(ModelSlot::new());
//! let controller = TrainingController::new(ClassRegistry::new(), extractor.clone(), slot.clone(), &config);
//!
//! let cat = controller.add_class("Cat").await?;
//! for bytes in [&b"..."[..], &b"..."[..], &b"..."[..]] {
//!     controller.add_sample(cat, ImagePayload::from_bytes(bytes)).await?;
//! }
//! let metrics = controller.train(|p| println!("{:.0}%", p * 100.0)).await?;
//! println!("accuracy {:.2}", metrics.accuracy);
//!
//! let orchestrator = InferenceOrchestrator::new(
//!     controller.registry(),
//!     TransferClassifier::new(extractor, slot),
//!     BaselineClassifier::new(),
//!     RemoteClassifier::new(config.remote.clone())?,
//! );
//! for result in orchestrator.infer(ImagePayload::from_bytes(b"...")).await? {
//!     println!("{}", serde_json::to_string(&result)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod model_manager;
pub mod models;
pub mod orchestrator;
pub mod payload;
pub mod registry;
mod runtime;

pub use classifier::{
    BaselineClassifier, ClassifierError, ExtractorHandle, ExtractorState, FailureKind, FeatureExtractor,
    ImageClassifier, ModelIdentifier, ModelSlot, OnnxExtractor, Outcome, PredictionResult, RemoteClassifier,
    RemoteConfig, TrainOptions, TransferClassifier,
};
pub use config::PipelineConfig;
pub use controller::{TrainingController, TrainingError, TrainingState};
pub use metrics::TrainingMetrics;
pub use model_manager::{ModelError, ModelManager};
pub use models::{BuiltinModel, ModelCharacteristics, ModelInfo};
pub use orchestrator::{InferenceError, InferenceOrchestrator};
pub use payload::{ImagePayload, QueryImage};
pub use registry::{ClassDefinition, ClassId, ClassRegistry, RegistryError, RegistryView};
pub use runtime::{OptimizationLevel, RuntimeConfig};

pub fn init_logger() {
    env_logger::init();
}
