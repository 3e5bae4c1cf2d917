#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use env_logger::{Builder, Env};
use image::{Rgb, RgbImage};
use ndarray::Array1;
use occipital::{
    ClassId, ClassRegistry, ClassifierError, ExtractorHandle, FeatureExtractor, ImagePayload, ModelSlot,
    PipelineConfig, RegistryView, TrainingController,
};

pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Embeds an image as its mean color, so solid-color fixtures separate cleanly.
pub struct MeanColorExtractor {
    pub delay: Duration,
}

impl MeanColorExtractor {
    pub fn instant() -> Self {
        Self { delay: Duration::ZERO }
    }
}

impl FeatureExtractor for MeanColorExtractor {
    fn embed(&self, image: &RgbImage) -> Result<Array1<f32>, ClassifierError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(Array1::from(occipital::payload::mean_rgb(image).to_vec()))
    }

    fn embedding_size(&self) -> usize {
        3
    }
}

pub fn solid(color: [u8; 3]) -> ImagePayload {
    occipital::payload::encode_png(&RgbImage::from_pixel(8, 8, Rgb(color))).unwrap()
}

/// A solid image with a small per-variant shift.
pub fn shade(color: [u8; 3], variant: u8) -> ImagePayload {
    solid(color.map(|c| c.saturating_add(variant * 3)))
}

pub const CAT: [u8; 3] = [200, 120, 40];
pub const DOG: [u8; 3] = [40, 60, 180];

pub struct Fixture {
    pub registry: RegistryView,
    pub extractor: Arc<ExtractorHandle>,
    pub slot: Arc<ModelSlot>,
    pub controller: Arc<TrainingController>,
}

pub fn fixture_with(extractor: MeanColorExtractor, config: PipelineConfig) -> Fixture {
    fixture_from_handle(ExtractorHandle::ready(Arc::new(extractor)), config)
}

pub fn fixture_from_handle(extractor: Arc<ExtractorHandle>, config: PipelineConfig) -> Fixture {
    init();
    let slot = Arc::new(ModelSlot::new());
    let controller = Arc::new(TrainingController::new(
        ClassRegistry::new(),
        Arc::clone(&extractor),
        Arc::clone(&slot),
        &config,
    ));
    let registry = controller.registry();
    Fixture { registry, extractor, slot, controller }
}

pub fn fixture() -> Fixture {
    fixture_with(MeanColorExtractor::instant(), PipelineConfig::default())
}

pub async fn add_class_with_samples(
    controller: &TrainingController,
    name: &str,
    color: [u8; 3],
    samples: u8,
) -> ClassId {
    let id = controller.add_class(name).await.unwrap();
    for variant in 0..samples {
        controller.add_sample(id, shade(color, variant)).await.unwrap();
    }
    id
}
