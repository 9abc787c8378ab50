use std::path::Path;

use crate::shared::image::Image;

/// Loads a still image from storage into a pixel buffer.
///
/// Implementations own the decoding details; callers only see the
/// decoded [`Image`].
pub trait ImageReader: Send {
    fn read(&self, path: &Path) -> Result<Image, Box<dyn std::error::Error>>;
}
