use std::sync::{Arc, PoisonError, RwLock};
use async_trait::async_trait;
use log::{debug, info};
use ndarray::Array1;

use super::embedding::{ExtractorHandle, FeatureExtractor};
use super::error::ClassifierError;
use super::head::{train_head, LinearHead, TrainDataset, TrainOptions};
use super::{ImageClassifier, ModelIdentifier, PredictionResult};
use crate::metrics::{ConfusionMatrix, TrainingMetrics};
use crate::payload::QueryImage;
use crate::registry::{ClassDefinition, ClassId};

/// Parameters produced by one successful training run.
///
/// `labels[k]` is the class behind head output `k`, as it was named when
/// training started.
#[derive(Debug)]
pub struct TrainedModelState {
    head: LinearHead,
    labels: Vec<(ClassId, String)>,
    registry_revision: u64,
}

impl TrainedModelState {
    pub fn head(&self) -> &LinearHead {
        &self.head
    }

    pub fn labels(&self) -> &[(ClassId, String)] {
        &self.labels
    }

    /// Registry revision the training snapshot was taken at.
    pub fn registry_revision(&self) -> u64 {
        self.registry_revision
    }
}

#[derive(Debug, Default)]
struct SlotInner {
    model: Option<Arc<TrainedModelState>>,
    ready: bool,
}

/// Publication point for the trained head.
///
/// The Training Controller is the only writer. A published state is never
/// mutated, only replaced, so readers can keep using the `Arc` they got even
/// while a new model is being trained.
#[derive(Debug, Default)]
pub struct ModelSlot {
    inner: RwLock<SlotInner>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current model, if one exists and is valid for prediction.
    pub fn current(&self) -> Option<Arc<TrainedModelState>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if inner.ready {
            inner.model.clone()
        } else {
            None
        }
    }

    /// The "model ready" flag.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.ready && inner.model.is_some()
    }

    pub fn has_model(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).model.is_some()
    }

    pub(crate) fn publish(&self, model: TrainedModelState) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.model = Some(Arc::new(model));
        inner.ready = true;
    }

    /// Refuses predictions while keeping the stored model around.
    pub(crate) fn suspend(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).ready = false;
    }

    /// Re-enables the stored model, if any, after an aborted run.
    pub(crate) fn resume(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.ready = inner.model.is_some();
    }
}

/// Trains a head on every sample of `classes` and evaluates it on the same
/// samples.
///
/// Evaluation deliberately reuses the training set, so the reported
/// accuracy is an upper bound rather than a generalization estimate.
/// `progress` receives `epoch / epochs` after each epoch.
pub fn train_transfer(
    classes: &[ClassDefinition],
    registry_revision: u64,
    extractor: &dyn FeatureExtractor,
    options: &TrainOptions,
    mut progress: impl FnMut(f32),
) -> Result<(TrainedModelState, TrainingMetrics), ClassifierError> {
    let labels: Vec<(ClassId, String)> = classes
        .iter()
        .map(|c| (c.id(), c.name().to_string()))
        .collect();

    let mut dataset = TrainDataset {
        classes: classes.len(),
        ..TrainDataset::default()
    };
    for (label, class) in classes.iter().enumerate() {
        for (i, sample) in class.samples().iter().enumerate() {
            let image = sample.decode().map_err(|e| {
                ClassifierError::InvalidImage(format!("Sample {} of class '{}': {}", i, class.name(), e))
            })?;
            dataset.x.push(extractor.embed(&image)?);
            dataset.y.push(label);
        }
        debug!("Embedded {} samples for class '{}'", class.sample_count(), class.name());
    }
    info!(
        "Training head on {} samples across {} classes",
        dataset.len(),
        dataset.classes
    );

    let head = train_head(&dataset, options, |done, total| {
        progress(done as f32 / total.max(1) as f32);
    })?;

    let mut confusion = ConfusionMatrix::new(labels.len());
    for (x, &actual) in dataset.x.iter().zip(&dataset.y) {
        let (predicted, _) = head.predict(x)?;
        confusion.add(actual, predicted);
    }
    let metrics = TrainingMetrics::from_confusion(&confusion, &labels);
    info!(
        "Training finished: accuracy {:.3} over {} samples",
        metrics.accuracy, metrics.total_samples
    );

    let state = TrainedModelState {
        head,
        labels,
        registry_revision,
    };
    Ok((state, metrics))
}

/// Transfer-learning classifier: frozen extractor plus the trained head.
#[derive(Debug, Clone)]
pub struct TransferClassifier {
    extractor: Arc<ExtractorHandle>,
    slot: Arc<ModelSlot>,
}

impl TransferClassifier {
    pub fn new(extractor: Arc<ExtractorHandle>, slot: Arc<ModelSlot>) -> Self {
        Self { extractor, slot }
    }

    /// Checks that every class the model was trained on still exists and
    /// returns the current class names in head order.
    fn current_labels(
        state: &TrainedModelState,
        classes: &[ClassDefinition],
    ) -> Result<Vec<String>, ClassifierError> {
        state
            .labels()
            .iter()
            .map(|(id, trained_name)| {
                classes
                    .iter()
                    .find(|c| c.id() == *id)
                    .map(|c| c.name().to_string())
                    .ok_or_else(|| {
                        ClassifierError::ModelNotTrained(format!(
                            "class '{}' was deleted after training; retrain before predicting",
                            trained_name
                        ))
                    })
            })
            .collect()
    }

    async fn embed(&self, query: &QueryImage) -> Result<Array1<f32>, ClassifierError> {
        let extractor = self.extractor.get()?;
        let pixels = query.shared_pixels();
        tokio::task::spawn_blocking(move || extractor.embed(&pixels))
            .await
            .map_err(|e| ClassifierError::PredictionError(format!("Embedding task failed: {}", e)))?
    }
}

#[async_trait]
impl ImageClassifier for TransferClassifier {
    fn model(&self) -> ModelIdentifier {
        ModelIdentifier::TransferLearning
    }

    async fn classify(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<PredictionResult, ClassifierError> {
        let state = self.slot.current().ok_or_else(|| {
            ClassifierError::ModelNotTrained("no trained model is available; train before predicting".into())
        })?;
        let names = Self::current_labels(&state, classes)?;

        let embedding = self.embed(query).await?;
        let (index, confidence) = state.head().predict(&embedding)?;
        Ok(PredictionResult::scored(self.model(), names[index].clone(), confidence))
    }
}
