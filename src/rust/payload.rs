//! Encoded image payloads and the pixel-level helpers shared by the classifiers.

use std::io::Cursor;
use std::sync::Arc;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageFormat, RgbImage};
use ndarray::Array4;

use crate::classifier::ClassifierError;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// A base64-encoded raster image, optionally wrapped in a `data:` URL.
///
/// Payloads are immutable and cheap to clone, so registry snapshots can be
/// handed to background tasks without copying image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload(Arc<str>);

impl ImagePayload {
    pub fn new(encoded: impl AsRef<str>) -> Self {
        Self(Arc::from(encoded.as_ref().trim()))
    }

    /// Encodes raw image file bytes (PNG, JPEG, ...) into a payload.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Arc::from(STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base64 part of the payload, with any `data:` URL header removed.
    pub fn base64_data(&self) -> &str {
        if self.0.starts_with(DATA_URL_PREFIX) {
            if let Some(pos) = self.0.find(BASE64_MARKER) {
                return &self.0[pos + BASE64_MARKER.len()..];
            }
        }
        &self.0
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        STANDARD
            .decode(self.base64_data())
            .map_err(|e| ClassifierError::InvalidImage(format!("Payload is not valid base64: {}", e)))
    }

    /// Decodes the payload into an 8-bit RGB raster.
    pub fn decode(&self) -> Result<RgbImage, ClassifierError> {
        let bytes = self.decode_bytes()?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| ClassifierError::InvalidImage(format!("Failed to decode image: {}", e)))?;
        Ok(image.to_rgb8())
    }

    /// Returns the payload as a `data:` URL, sniffing the MIME type if needed.
    pub fn to_data_url(&self) -> Result<String, ClassifierError> {
        if self.0.starts_with(DATA_URL_PREFIX) {
            return Ok(self.0.to_string());
        }
        let bytes = self.decode_bytes()?;
        let format = image::guess_format(&bytes)
            .map_err(|e| ClassifierError::InvalidImage(format!("Unknown image format: {}", e)))?;
        Ok(format!("data:{};base64,{}", format.to_mime_type(), self.base64_data()))
    }
}

/// A query image decoded once and shared read-only by every classifier.
#[derive(Debug, Clone)]
pub struct QueryImage {
    payload: ImagePayload,
    pixels: Arc<RgbImage>,
}

impl QueryImage {
    pub fn decode(payload: ImagePayload) -> Result<Self, ClassifierError> {
        let pixels = Arc::new(payload.decode()?);
        Ok(Self { payload, pixels })
    }

    pub fn payload(&self) -> &ImagePayload {
        &self.payload
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn shared_pixels(&self) -> Arc<RgbImage> {
        Arc::clone(&self.pixels)
    }
}

/// Encodes an RGB raster as a PNG payload.
pub fn encode_png(image: &RgbImage) -> Result<ImagePayload, ClassifierError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ClassifierError::InvalidImage(format!("Failed to encode image: {}", e)))?;
    Ok(ImagePayload::from_bytes(buffer.get_ref()))
}

/// Mean of each RGB channel, scaled to `[0, 1]`.
pub fn mean_rgb(image: &RgbImage) -> [f32; 3] {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    if pixels == 0 {
        return [0.0; 3];
    }
    let mut sums = [0u64; 3];
    for pixel in image.pixels() {
        for (sum, &channel) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += u64::from(channel);
        }
    }
    sums.map(|sum| (sum as f64 / pixels as f64 / 255.0) as f32)
}

/// Resizes `image` and lays it out as a normalized `[1, 3, height, width]` tensor.
pub fn to_nchw_tensor(
    image: &RgbImage,
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> Array4<f32> {
    let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
    let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = f32::from(pixel.0[c]) / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }
    tensor
}
