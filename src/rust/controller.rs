use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::classifier::transfer::train_transfer;
use crate::classifier::{ClassifierError, ExtractorHandle, FeatureExtractor, ModelSlot, TrainOptions};
use crate::config::PipelineConfig;
use crate::metrics::TrainingMetrics;
use crate::payload::ImagePayload;
use crate::registry::{ClassDefinition, ClassId, ClassRegistry, RegistryError, RegistryView};

/// Where the controller is in its training lifecycle.
///
/// `Failed` is transient: a failed run passes through it and settles on
/// `Ready` when an earlier model is still in service, otherwise on `Idle`.
/// The failure itself stays readable through
/// [`TrainingController::last_error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TrainingState {
    Idle,
    Validating,
    Training { progress: f32 },
    Ready,
    Failed { reason: String },
}

impl TrainingState {
    /// Whether a run currently owns the registry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Validating | Self::Training { .. })
    }
}

fn join_ids(ids: &[ClassId]) -> String {
    ids.iter().map(ClassId::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Every class needs at least {min} samples; under-populated: {}", join_ids(.under_populated))]
    Validation {
        min: usize,
        under_populated: Vec<ClassId>,
    },
    #[error("Training needs at least one class")]
    NoClasses,
    #[error("A training run is already in progress")]
    InProgress,
    #[error("Feature extractor unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Training failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Training task aborted: {0}")]
    Aborted(String),
}

/// Owns the class registry's write access and the single training run.
///
/// The controller is the only writer of the trained model. While a run is
/// validating or training, registry mutations are rejected with
/// [`RegistryError::Locked`] and predictions are refused. Mutations after a
/// successful run leave the controller in `Ready`; use
/// [`TrainingController::is_stale`] to find out whether a retrain is due.
#[derive(Debug)]
pub struct TrainingController {
    registry: Arc<RwLock<ClassRegistry>>,
    extractor: Arc<ExtractorHandle>,
    slot: Arc<ModelSlot>,
    min_samples_per_class: usize,
    train_options: TrainOptions,
    state: Arc<Mutex<TrainingState>>,
    last_metrics: Mutex<Option<TrainingMetrics>>,
    last_error: Mutex<Option<String>>,
}

/// Restores a consistent state if a run is abandoned half-way, e.g. when the
/// `train` future is dropped by a timeout.
struct RunGuard<'a> {
    controller: &'a TrainingController,
    /// Cleared on abandonment so a still-running blocking task stops
    /// reporting progress into the shared state.
    live: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Training run abandoned before completion");
        self.controller.slot.resume();
        let settled = self.controller.settled_state();
        let mut state = self.controller.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.live.store(false, Ordering::Release);
        *state = settled;
    }
}

impl TrainingController {
    /// Takes ownership of `registry`; from here on it is only mutated through
    /// the controller.
    pub fn new(
        registry: ClassRegistry,
        extractor: Arc<ExtractorHandle>,
        slot: Arc<ModelSlot>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            extractor,
            slot,
            min_samples_per_class: config.min_samples_per_class,
            train_options: config.train.clone(),
            state: Arc::new(Mutex::new(TrainingState::Idle)),
            last_metrics: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Read-only handle for consumers such as the inference orchestrator.
    pub fn registry(&self) -> RegistryView {
        RegistryView::new(Arc::clone(&self.registry))
    }

    pub fn model_slot(&self) -> Arc<ModelSlot> {
        Arc::clone(&self.slot)
    }

    pub fn state(&self) -> TrainingState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_state(&self, state: TrainingState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// `Ready` when a usable model exists, otherwise `Idle`.
    fn settled_state(&self) -> TrainingState {
        if self.slot.has_model() {
            TrainingState::Ready
        } else {
            TrainingState::Idle
        }
    }

    fn settle(&self) {
        self.set_state(self.settled_state());
    }

    pub fn is_model_ready(&self) -> bool {
        self.slot.is_ready()
    }

    /// True when the registry changed since the current model was trained.
    pub async fn is_stale(&self) -> bool {
        match self.slot.current() {
            Some(model) => model.registry_revision() != self.registry.read().await.revision(),
            None => false,
        }
    }

    pub fn last_metrics(&self) -> Option<TrainingMetrics> {
        self.last_metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ClassRegistry) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        // The write lock is taken before the state check so a run cannot
        // start between the check and the mutation.
        let mut registry = self.registry.write().await;
        if self.state().is_busy() {
            return Err(RegistryError::Locked);
        }
        f(&mut registry)
    }

    pub async fn add_class(&self, name: impl Into<String>) -> Result<ClassId, RegistryError> {
        let name = name.into();
        self.mutate(|r| r.add_class(name)).await
    }

    pub async fn rename_class(&self, id: ClassId, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        self.mutate(|r| r.rename_class(id, name)).await
    }

    pub async fn add_sample(&self, id: ClassId, payload: ImagePayload) -> Result<(), RegistryError> {
        self.mutate(|r| r.add_sample(id, payload)).await
    }

    pub async fn remove_sample(&self, id: ClassId, index: usize) -> Result<ImagePayload, RegistryError> {
        self.mutate(|r| r.remove_sample(id, index)).await
    }

    pub async fn delete_class(&self, id: ClassId) -> Result<ClassDefinition, RegistryError> {
        self.mutate(|r| r.delete_class(id)).await
    }

    pub async fn list_classes(&self) -> Vec<ClassDefinition> {
        self.registry.read().await.list_classes().to_vec()
    }

    /// Classes that would fail the minimum-sample gate right now.
    pub async fn validate(&self) -> Vec<ClassId> {
        self.registry.read().await.validate(self.min_samples_per_class)
    }

    /// Claims the single run slot, returning the state to fall back to.
    fn begin(&self) -> Result<TrainingState, TrainingError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_busy() {
            return Err(TrainingError::InProgress);
        }
        let previous = std::mem::replace(&mut *state, TrainingState::Validating);
        Ok(previous)
    }

    fn reject(&self, previous: TrainingState, err: TrainingError) -> Result<TrainingMetrics, TrainingError> {
        warn!("Training rejected: {}", err);
        self.set_state(previous);
        Err(err)
    }

    fn fail(&self, err: TrainingError) -> Result<TrainingMetrics, TrainingError> {
        error!("Training failed: {}", err);
        let reason = err.to_string();
        self.set_state(TrainingState::Failed { reason: reason.clone() });
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.slot.resume();
        self.settle();
        Err(err)
    }

    /// Snapshots the registry and checks everything a run needs before
    /// any model state is touched.
    async fn prepare(&self) -> Result<(Vec<ClassDefinition>, u64, Arc<dyn FeatureExtractor>), TrainingError> {
        let (classes, revision) = {
            let registry = self.registry.read().await;
            (registry.list_classes().to_vec(), registry.revision())
        };

        if classes.is_empty() {
            return Err(TrainingError::NoClasses);
        }
        let under_populated: Vec<ClassId> = classes
            .iter()
            .filter(|c| c.sample_count() < self.min_samples_per_class)
            .map(ClassDefinition::id)
            .collect();
        if !under_populated.is_empty() {
            return Err(TrainingError::Validation {
                min: self.min_samples_per_class,
                under_populated,
            });
        }

        let extractor = self
            .extractor
            .wait_ready()
            .await
            .map_err(|e| TrainingError::ModelUnavailable(e.to_string()))?;
        Ok((classes, revision, extractor))
    }

    /// Runs one full training cycle.
    ///
    /// `progress` receives a fraction in `[0, 1]` after every epoch. On
    /// validation errors nothing changes; on training errors any previously
    /// trained model stays in service. Dropping the returned future leaves
    /// the controller usable again.
    pub async fn train<F>(&self, mut progress: F) -> Result<TrainingMetrics, TrainingError>
    where
        F: FnMut(f32) + Send + 'static,
    {
        let previous = self.begin()?;
        let live = Arc::new(AtomicBool::new(true));
        let mut guard = RunGuard {
            controller: self,
            live: Arc::clone(&live),
            armed: true,
        };

        let (classes, revision, extractor) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                guard.armed = false;
                return self.reject(previous, e);
            }
        };

        info!("Starting training run over {} classes", classes.len());
        self.slot.suspend();
        self.set_state(TrainingState::Training { progress: 0.0 });

        let state = Arc::clone(&self.state);
        let options = self.train_options.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            train_transfer(&classes, revision, extractor.as_ref(), &options, |fraction| {
                {
                    let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if live.load(Ordering::Acquire) {
                        *current = TrainingState::Training { progress: fraction };
                    }
                }
                progress(fraction);
            })
        })
        .await;
        guard.armed = false;

        match outcome {
            Ok(Ok((model, metrics))) => {
                self.slot.publish(model);
                *self.last_metrics.lock().unwrap_or_else(PoisonError::into_inner) = Some(metrics.clone());
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                self.set_state(TrainingState::Ready);
                info!("Model ready (accuracy {:.3})", metrics.accuracy);
                Ok(metrics)
            }
            Ok(Err(e)) => self.fail(TrainingError::Classifier(e)),
            Err(e) => self.fail(TrainingError::Aborted(e.to_string())),
        }
    }
}
