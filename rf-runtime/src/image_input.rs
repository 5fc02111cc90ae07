use std::path::Path;

use image::imageops::FilterType;
use image::ImageResult;

use crate::error::{EngineError, EngineResult};

/// A decoded image with `f32` samples in `[height, width, channels]` (HWC) order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageBuffer {
    pub fn new(pixels: Vec<f32>, height: usize, width: usize, channels: usize) -> EngineResult<Self> {
        if pixels.len() != height * width * channels {
            return Err(EngineError::ShapeMismatch(format!(
                "image of {}x{}x{} needs {} samples, got {}",
                height,
                width,
                channels,
                height * width * channels,
                pixels.len()
            )));
        }

        Ok(ImageBuffer {
            pixels,
            height,
            width,
            channels,
        })
    }

    /// Decode an image file, resize it to `height x width` and convert it to RGB samples in `[0, 1]`.
    pub fn load(path: impl AsRef<Path>, height: usize, width: usize) -> ImageResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)?;
        tracing::debug!("decoded {:?} as {:?}", path, image.color());

        let rgb = image
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb8();
        let pixels = rgb.into_raw().into_iter().map(|p| p as f32 / 255.0).collect();

        Ok(ImageBuffer {
            pixels,
            height,
            width,
            channels: 3,
        })
    }

    /// The samples reordered to `[channels, height, width]` (CHW).
    pub fn to_chw(&self) -> Vec<f32> {
        let ImageBuffer {
            height,
            width,
            channels,
            ..
        } = *self;

        let mut result = Vec::with_capacity(self.pixels.len());
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    result.push(self.pixels[(y * width + x) * channels + c]);
                }
            }
        }
        result
    }
}
