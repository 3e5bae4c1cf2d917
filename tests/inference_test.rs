mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{add_class_with_samples, fixture, shade, solid, Fixture, CAT, DOG};
use occipital::{
    BaselineClassifier, ClassRegistry, ExtractorHandle, FailureKind, InferenceOrchestrator, ModelIdentifier,
    ModelSlot, RegistryView, RemoteClassifier, RemoteConfig, TransferClassifier,
};

fn orchestrator(f: &Fixture) -> InferenceOrchestrator {
    InferenceOrchestrator::new(
        f.registry.clone(),
        TransferClassifier::new(f.extractor.clone(), f.slot.clone()),
        BaselineClassifier::new(),
        RemoteClassifier::new(RemoteConfig::default()).unwrap(),
    )
}

#[tokio::test]
async fn test_results_come_back_in_fixed_order() {
    let f = fixture();
    add_class_with_samples(&f.controller, "Cat", CAT, 3).await;
    add_class_with_samples(&f.controller, "Dog", DOG, 3).await;
    f.controller.train(|_| {}).await.unwrap();

    let orchestrator = orchestrator(&f);
    assert_eq!(
        orchestrator.models(),
        vec![ModelIdentifier::TransferLearning, ModelIdentifier::Baseline, ModelIdentifier::Remote]
    );

    let start = Instant::now();
    let results = orchestrator.infer(shade(DOG, 1)).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].model, ModelIdentifier::TransferLearning);
    assert_eq!(results[0].class_name(), Some("Dog"));
    assert_eq!(results[1].model, ModelIdentifier::Baseline);
    assert_eq!(results[1].class_name(), Some("Dog"));
    assert_eq!(results[2].model, ModelIdentifier::Remote);
    assert_eq!(results[2].failure(), Some(FailureKind::RemoteUnavailable));
    assert!(!orchestrator.is_predicting());
}

#[tokio::test]
async fn test_empty_class_only_fails_baseline_slot() {
    let f = fixture();
    add_class_with_samples(&f.controller, "Cat", CAT, 3).await;
    add_class_with_samples(&f.controller, "Dog", DOG, 3).await;
    f.controller.train(|_| {}).await.unwrap();
    f.controller.add_class("Empty").await.unwrap();

    let results = orchestrator(&f).infer(shade(CAT, 2)).await.unwrap();
    assert_eq!(results[0].class_name(), Some("Cat"));
    assert_eq!(results[1].failure(), Some(FailureKind::InsufficientData));
    assert_eq!(results[2].failure(), Some(FailureKind::RemoteUnavailable));
}

#[tokio::test]
async fn test_untrained_transfer_slot_fails_alone() {
    let f = fixture();
    add_class_with_samples(&f.controller, "Cat", CAT, 3).await;
    add_class_with_samples(&f.controller, "Dog", DOG, 3).await;

    let results = orchestrator(&f).infer(shade(CAT, 0)).await.unwrap();
    assert_eq!(results[0].failure(), Some(FailureKind::ModelNotTrained));
    assert_eq!(results[1].class_name(), Some("Cat"));
}

#[tokio::test]
async fn test_unavailable_extractor_only_affects_transfer_slot() {
    common::init();
    let mut registry = ClassRegistry::new();
    let id = registry.add_class("Cat").unwrap();
    registry.add_sample(id, solid(CAT)).unwrap();
    let registry = RegistryView::from(registry);

    let orchestrator = InferenceOrchestrator::new(
        registry,
        TransferClassifier::new(ExtractorHandle::failed("model file missing"), Arc::new(ModelSlot::new())),
        BaselineClassifier::new(),
        RemoteClassifier::new(RemoteConfig::default()).unwrap(),
    );
    let results = orchestrator.infer(solid(CAT)).await.unwrap();
    assert!(results[0].is_failure());
    assert_eq!(results[1].class_name(), Some("Cat"));
    assert_eq!(results[1].confidence(), Some(1.0));
}

#[tokio::test]
async fn test_results_serialize_for_display() {
    let f = fixture();
    add_class_with_samples(&f.controller, "Cat", CAT, 3).await;

    let results = orchestrator(&f).infer(solid(CAT)).await.unwrap();
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json[0]["model"], "transfer-learning");
    assert_eq!(json[0]["status"], "failed");
    assert_eq!(json[0]["failure"], "modelNotTrained");
    assert_eq!(json[1]["model"], "baseline");
    assert_eq!(json[1]["status"], "scored");
    assert_eq!(json[1]["className"], "Cat");
    assert_eq!(json[2]["failure"], "remoteUnavailable");
}
