use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use occipital::{
    BaselineClassifier, BuiltinModel, ClassRegistry, ExtractorHandle, ImagePayload, InferenceOrchestrator,
    ModelManager, ModelSlot, PipelineConfig, RemoteClassifier, TrainingController, TransferClassifier,
};
use serde_json::json;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// A class and the directory holding its example images, as NAME=DIR
    #[arg(short, long = "class", value_name = "NAME=DIR", required = true)]
    classes: Vec<String>,

    /// Image to classify after training (repeatable)
    #[arg(short, long = "query", value_name = "PATH")]
    queries: Vec<PathBuf>,

    /// Use this ONNX feature extractor instead of the built-in one
    #[arg(short, long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Force a fresh download of the built-in model
    #[arg(short, long)]
    fresh: bool,

    /// Never download; fail if the built-in model is not cached
    #[arg(long, conflicts_with = "fresh")]
    offline: bool,

    /// Training epochs for the transfer-learning head
    #[arg(long)]
    epochs: Option<usize>,

    /// Minimum number of examples per class
    #[arg(long)]
    min_samples: Option<usize>,
}

fn parse_class_arg(arg: &str) -> anyhow::Result<(&str, &Path)> {
    match arg.split_once('=') {
        Some((name, dir)) if !name.trim().is_empty() && !dir.is_empty() => Ok((name.trim(), Path::new(dir))),
        _ => bail!("Expected NAME=DIR, got '{}'", arg),
    }
}

fn load_image_dir(dir: &Path) -> anyhow::Result<Vec<ImagePayload>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot read class directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
            Ok(ImagePayload::from_bytes(&bytes))
        })
        .collect()
}

async fn resolve_model(args: &Args) -> anyhow::Result<PathBuf> {
    if let Some(path) = &args.model {
        return Ok(path.clone());
    }

    let manager = ModelManager::new_default()?;
    let info = BuiltinModel::MobileNetV2.get_model_info();
    if args.offline {
        return Ok(manager.require_model(&info.name)?);
    }
    if args.fresh {
        info!("Fresh download requested - removing any existing model files...");
        manager.remove_download(&info.name)?;
    }
    Ok(manager.ensure_model_downloaded(&info).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    if let Some(min) = args.min_samples {
        config = config.with_min_samples_per_class(min);
    }
    if config.remote.api_key.is_none() {
        warn!("No remote API key configured; the remote classifier will report itself unavailable");
    }

    let model_path = resolve_model(&args).await?;
    info!("Loading feature extractor from {}", model_path.display());
    let extractor = ExtractorHandle::load_onnx(
        model_path,
        BuiltinModel::MobileNetV2.characteristics(),
        config.runtime.clone(),
    );

    let slot = Arc::new(ModelSlot::new());
    let controller = TrainingController::new(ClassRegistry::new(), Arc::clone(&extractor), Arc::clone(&slot), &config);

    for arg in &args.classes {
        let (name, dir) = parse_class_arg(arg)?;
        let samples = load_image_dir(dir)?;
        info!("Class '{}': {} examples from {}", name, samples.len(), dir.display());
        let id = controller.add_class(name).await?;
        for sample in samples {
            controller.add_sample(id, sample).await?;
        }
    }

    let start = Instant::now();
    let metrics = controller
        .train(|progress| info!("Training: {:.0}%", progress * 100.0))
        .await?;
    info!("=== Training finished in {:.2?} ===", start.elapsed());
    println!("{}", serde_json::to_string_pretty(&json!({ "training": metrics }))?);

    let orchestrator = InferenceOrchestrator::new(
        controller.registry(),
        TransferClassifier::new(extractor, slot),
        BaselineClassifier::new(),
        RemoteClassifier::new(config.remote.clone())?,
    );

    for path in &args.queries {
        let bytes = std::fs::read(path).with_context(|| format!("Cannot read query {}", path.display()))?;
        let results = orchestrator.infer(ImagePayload::from_bytes(&bytes)).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "query": path.display().to_string(), "results": results }))?
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_class_arg() {
        let (name, dir) = parse_class_arg("Cat=./data/cat").unwrap();
        assert_eq!(name, "Cat");
        assert_eq!(dir, Path::new("./data/cat"));
        assert!(parse_class_arg("Cat").is_err());
        assert!(parse_class_arg("=dir").is_err());
    }

    #[test]
    fn test_load_image_dir_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let image = image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
        image.save(dir.path().join("a.png")).unwrap();
        let samples = load_image_dir(dir.path()).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].decode().is_ok());
    }
}
