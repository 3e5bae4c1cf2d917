use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use futures::future::join_all;
use log::{debug, info, warn};

use crate::classifier::{
    BaselineClassifier, FailureKind, ImageClassifier, ModelIdentifier, PredictionResult,
    RemoteClassifier, TransferClassifier,
};
use crate::payload::{ImagePayload, QueryImage};
use crate::registry::RegistryView;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("An inference call is already in progress")]
    Busy,
}

/// Clears the in-flight flag when the call ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fans one query out to every classifier and collects one result per slot.
///
/// At most one `infer` runs at a time. A second call made while the first is
/// outstanding is rejected with [`InferenceError::Busy`] rather than queued.
pub struct InferenceOrchestrator {
    registry: RegistryView,
    classifiers: Vec<Arc<dyn ImageClassifier>>,
    predicting: AtomicBool,
}

impl std::fmt::Debug for InferenceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceOrchestrator")
            .field("models", &self.models())
            .field("predicting", &self.is_predicting())
            .finish()
    }
}

impl InferenceOrchestrator {
    /// The standard line-up: transfer-learning, baseline, remote.
    pub fn new(
        registry: RegistryView,
        transfer: TransferClassifier,
        baseline: BaselineClassifier,
        remote: RemoteClassifier,
    ) -> Self {
        let classifiers: Vec<Arc<dyn ImageClassifier>> =
            vec![Arc::new(transfer), Arc::new(baseline), Arc::new(remote)];
        Self::with_classifiers(registry, classifiers)
    }

    /// Results come back in the order of `classifiers`.
    pub fn with_classifiers(
        registry: RegistryView,
        classifiers: Vec<Arc<dyn ImageClassifier>>,
    ) -> Self {
        Self {
            registry,
            classifiers,
            predicting: AtomicBool::new(false),
        }
    }

    pub fn models(&self) -> Vec<ModelIdentifier> {
        self.classifiers.iter().map(|c| c.model()).collect()
    }

    pub fn is_predicting(&self) -> bool {
        self.predicting.load(Ordering::Acquire)
    }

    /// Classifies `payload` with every classifier concurrently.
    ///
    /// Individual classifier failures never abort the call; they come back as
    /// failure-shaped results in their slot.
    pub async fn infer(&self, payload: ImagePayload) -> Result<Vec<PredictionResult>, InferenceError> {
        if self
            .predicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejecting inference call: another one is in flight");
            return Err(InferenceError::Busy);
        }
        let _in_flight = InFlight(&self.predicting);
        let start = Instant::now();

        let query = match QueryImage::decode(payload) {
            Ok(query) => query,
            Err(e) => {
                warn!("Query image could not be decoded: {}", e);
                return Ok(self
                    .classifiers
                    .iter()
                    .map(|c| PredictionResult::from_error(c.model(), &e))
                    .collect());
            }
        };
        let classes = self.registry.snapshot().await;
        let classes: Arc<[_]> = classes.into();

        let tasks = self.classifiers.iter().map(|classifier| {
            let classifier = Arc::clone(classifier);
            let query = query.clone();
            let classes = Arc::clone(&classes);
            tokio::spawn(async move {
                let model = classifier.model();
                match classifier.classify(&query, &classes).await {
                    Ok(result) => result,
                    Err(e) => {
                        debug!("{} failed: {}", model, e);
                        PredictionResult::from_error(model, &e)
                    }
                }
            })
        });
        let joined = join_all(tasks).await;

        let results: Vec<PredictionResult> = joined
            .into_iter()
            .zip(&self.classifiers)
            .map(|(joined, classifier)| match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("{} task did not complete: {}", classifier.model(), e);
                    PredictionResult::failed(classifier.model(), FailureKind::Internal, e.to_string())
                }
            })
            .collect();

        info!(
            "Inference finished in {:.2?}: {} of {} classifiers answered",
            start.elapsed(),
            results.iter().filter(|r| !r.is_failure()).count(),
            results.len()
        );
        Ok(results)
    }
}
