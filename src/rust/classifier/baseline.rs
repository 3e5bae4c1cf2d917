use async_trait::async_trait;
use log::debug;
use ndarray::Array1;

use super::error::ClassifierError;
use super::utils::{average_vectors, euclidean_distance};
use super::{ImageClassifier, ModelIdentifier, PredictionResult};
use crate::payload::{mean_rgb, QueryImage};
use crate::registry::ClassDefinition;

const DESCRIPTOR_SIZE: usize = 3;

/// Nearest-centroid classifier over mean-color descriptors.
///
/// There is no training phase: class descriptors are recomputed from the raw
/// samples on every query, so the result always reflects the current
/// registry contents. Identical inputs give bit-identical outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineClassifier;

impl BaselineClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Largest possible distance between two descriptors (opposite RGB corners).
    fn max_distance() -> f32 {
        (DESCRIPTOR_SIZE as f32).sqrt()
    }

    fn descriptor(pixels: &image::RgbImage) -> Array1<f32> {
        Array1::from(mean_rgb(pixels).to_vec())
    }

    fn class_descriptor(class: &ClassDefinition) -> Result<Array1<f32>, ClassifierError> {
        let descriptors = class
            .samples()
            .iter()
            .map(|sample| sample.decode().map(|pixels| Self::descriptor(&pixels)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(average_vectors(&descriptors, DESCRIPTOR_SIZE))
    }

    /// Synchronous core of [`ImageClassifier::classify`].
    pub fn predict(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<PredictionResult, ClassifierError> {
        if classes.is_empty() {
            return Err(ClassifierError::InsufficientData("no classes defined".into()));
        }
        if let Some(empty) = classes.iter().find(|c| c.sample_count() == 0) {
            return Err(ClassifierError::InsufficientData(format!(
                "class '{}' has no samples",
                empty.name()
            )));
        }

        let query_descriptor = Self::descriptor(query.pixels());
        let mut best: Option<(&ClassDefinition, f32)> = None;
        for class in classes {
            let distance = euclidean_distance(&Self::class_descriptor(class)?, &query_descriptor);
            debug!("Baseline distance to '{}': {:.4}", class.name(), distance);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((class, distance)),
            }
        }

        let (class, distance) = best
            .ok_or_else(|| ClassifierError::PredictionError("no comparable classes".into()))?;
        let confidence = (1.0 - distance / Self::max_distance()).clamp(0.0, 1.0);
        Ok(PredictionResult::scored(self.model(), class.name(), confidence))
    }
}

#[async_trait]
impl ImageClassifier for BaselineClassifier {
    fn model(&self) -> ModelIdentifier {
        ModelIdentifier::Baseline
    }

    async fn classify(
        &self,
        query: &QueryImage,
        classes: &[ClassDefinition],
    ) -> Result<PredictionResult, ClassifierError> {
        let query = query.clone();
        let classes = classes.to_vec();
        let classifier = *self;
        tokio::task::spawn_blocking(move || classifier.predict(&query, &classes))
            .await
            .map_err(|e| ClassifierError::PredictionError(format!("Baseline task failed: {}", e)))?
    }
}
