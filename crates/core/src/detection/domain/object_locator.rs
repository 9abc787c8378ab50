use crate::detection::domain::detection_failure::DetectionFailure;
use crate::shared::image::ImageView;
use crate::shared::rect::Rect;

/// Domain interface for finding objects (faces, smiles) in an image.
///
/// Locators hold only read-only models, hence `&self`, and may be shared
/// across threads. Returned rectangles are relative to the view's origin.
pub trait ObjectLocator: Send + Sync {
    fn locate(&self, image: &ImageView<'_>) -> Result<Vec<Rect>, DetectionFailure>;
}
