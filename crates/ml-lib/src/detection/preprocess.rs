//! Image preprocessing for the detector input tensor

use image::{imageops::FilterType, DynamicImage};
use serde::Deserialize;
use tract_onnx::prelude::tract_ndarray::Array4;

/// Detector input edge length in pixels
pub const DETECTOR_INPUT_SIZE: u32 = 300;

/// Channel ordering the detector was trained on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Detector input layout
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub input_size: u32,
    pub channel_order: ChannelOrder,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: DETECTOR_INPUT_SIZE,
            channel_order: ChannelOrder::default(),
        }
    }
}

/// Resize, reorder channels and scale pixels to `[0, 1]`.
///
/// Returns an NHWC tensor of shape `[1, size, size, 3]`. Grayscale and
/// alpha images are converted to three channels first.
pub fn preprocess(image: &DynamicImage, config: &DetectorConfig) -> Array4<f32> {
    let size = config.input_size;
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

    let edge = size as usize;
    let mut input = Array4::<f32>::zeros((1, edge, edge, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let channels = match config.channel_order {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        };
        for (c, value) in channels.into_iter().enumerate() {
            input[[0, y as usize, x as usize, c]] = value as f32 / 255.0;
        }
    }
    input
}
