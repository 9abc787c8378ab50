use std::path::Path;

use crate::input::domain::image_reader::ImageReader;
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::image::Image;

/// Decodes image files with the `image` crate into RGBA buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileReader;

impl ImageFileReader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageReader for ImageFileReader {
    fn read(&self, path: &Path) -> Result<Image, Box<dyn std::error::Error>> {
        let decoded = image::open(path)?;
        log::debug!(
            "Decoded {} ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );
        Ok(Image::from(decoded.to_rgba8()))
    }
}

/// Whether `path` has one of the supported image extensions.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
