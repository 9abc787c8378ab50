use thiserror::Error;

use crate::shared::image::ImageError;

/// Why a detection call could not produce a result.
///
/// Only visible through [`HappyDetector::classify`]; the boolean entry point
/// maps every variant to "not happy".
///
/// [`HappyDetector::classify`]: crate::detection::domain::happy_detector::HappyDetector::classify
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionFailure {
    #[error("image has no pixels")]
    EmptyImage,
    #[error("malformed image: {0}")]
    MalformedImage(#[from] ImageError),
    #[error("face region cannot be cropped: {0}")]
    InvalidCrop(#[source] ImageError),
    #[error("detection models are not loaded yet")]
    NotReady,
    #[error("locator failed: {0}")]
    Locator(String),
}

impl DetectionFailure {
    /// Short stable label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionFailure::EmptyImage => "empty_image",
            DetectionFailure::MalformedImage(_) => "malformed_image",
            DetectionFailure::InvalidCrop(_) => "invalid_crop",
            DetectionFailure::NotReady => "not_ready",
            DetectionFailure::Locator(_) => "locator",
        }
    }
}
