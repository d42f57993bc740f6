use std::io::Cursor;

use image::{ImageError, ImageReader, RgbaImage};

use super::ImagingError;

/// A decoded source image as 8-bit RGBA
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pixels: RgbaImage,
}

impl ImageAsset {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Largest accepted width or height
    pub max_dimension: u32,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: u16::MAX as u32,
        }
    }
}

/// Decode PNG, JPEG or GIF bytes; the format is sniffed from the content, not a file name.
///
/// Animated GIF input contributes its first frame only. Dimensions are checked against `limits`
/// from the header, before any pixel buffer is allocated.
pub fn decode(bytes: &[u8], limits: &DecodeLimits) -> Result<ImageAsset, ImagingError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().map_err(ImageError::IoError)?;

    let mut image_limits = image::Limits::default();
    image_limits.max_image_width = Some(limits.max_dimension);
    image_limits.max_image_height = Some(limits.max_dimension);
    reader.limits(image_limits);

    let decoded = reader.decode()?;
    Ok(ImageAsset::new(decoded.to_rgba8()))
}
