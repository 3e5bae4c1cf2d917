//! Built-in feature extractor models.

use serde::Serialize;

/// Pretrained convolutional networks that can serve as the frozen feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinModel {
    /// MobileNetV2 (ImageNet), ONNX opset 12. The 1000-wide output layer is
    /// used as the embedding.
    MobileNetV2,
}

/// Where to fetch a model artifact and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub model_url: String,
    /// SHA-256 of the artifact. When absent the download is accepted as-is
    /// and its digest is logged.
    pub model_hash: Option<String>,
}

/// Preprocessing and size characteristics of an extractor model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelCharacteristics {
    pub input_width: u32,
    pub input_height: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub model_size_mb: usize,
}

/// ImageNet channel statistics used by most torchvision-derived exports.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

impl Default for ModelCharacteristics {
    fn default() -> Self {
        Self {
            input_width: 224,
            input_height: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            model_size_mb: 0,
        }
    }
}

impl BuiltinModel {
    pub fn get_model_info(&self) -> ModelInfo {
        match self {
            Self::MobileNetV2 => ModelInfo {
                name: "mobilenetv2".to_string(),
                model_url: "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-12.onnx".to_string(),
                model_hash: None,
            },
        }
    }

    pub fn characteristics(&self) -> ModelCharacteristics {
        match self {
            Self::MobileNetV2 => ModelCharacteristics {
                model_size_mb: 14,
                ..ModelCharacteristics::default()
            },
        }
    }
}
