use std::sync::Arc;

use crate::detection::domain::detection_failure::DetectionFailure;
use crate::detection::domain::object_locator::ObjectLocator;
use crate::shared::image::Image;
use crate::shared::rect::Rect;

/// Decides whether the most prominent face in an image is smiling.
///
/// The face with the largest area is cropped (as a borrowed view) and
/// searched for a smile; any smile inside it means "happy".
#[derive(Clone)]
pub struct HappyDetector {
    face_locator: Arc<dyn ObjectLocator>,
    smile_locator: Arc<dyn ObjectLocator>,
}

impl HappyDetector {
    pub fn new(face_locator: Arc<dyn ObjectLocator>, smile_locator: Arc<dyn ObjectLocator>) -> Self {
        Self {
            face_locator,
            smile_locator,
        }
    }

    /// Classifies `image`, reporting why detection could not run.
    pub fn classify(&self, image: &Image) -> Result<bool, DetectionFailure> {
        if image.is_empty() {
            return Err(DetectionFailure::EmptyImage);
        }

        let faces = self.face_locator.locate(&image.view())?;
        let Some(face) = Rect::largest(&faces) else {
            log::debug!("No face found");
            return Ok(false);
        };
        log::debug!(
            "Checking largest of {} faces at ({}, {}) {}x{}",
            faces.len(),
            face.x,
            face.y,
            face.width,
            face.height
        );

        let crop = image.roi(face).map_err(DetectionFailure::InvalidCrop)?;
        if crop.is_empty() {
            return Err(DetectionFailure::EmptyImage);
        }
        let smiles = self.smile_locator.locate(&crop)?;
        log::debug!("Found {} smiles in face region", smiles.len());
        Ok(!smiles.is_empty())
    }

    /// Best-effort signal: any failure counts as "not happy".
    pub fn detect_happy(&self, image: &Image) -> bool {
        match self.classify(image) {
            Ok(happy) => happy,
            Err(failure) => {
                log::warn!("Happy detection failed ({}): {failure}", failure.kind());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::image::{ImageView, PixelLayout};
    use std::sync::Mutex;

    // --- Stubs ---

    struct StubLocator {
        result: Result<Vec<Rect>, DetectionFailure>,
    }

    impl StubLocator {
        fn returning(rects: Vec<Rect>) -> Arc<Self> {
            Arc::new(Self { result: Ok(rects) })
        }

        fn failing(failure: DetectionFailure) -> Arc<Self> {
            Arc::new(Self {
                result: Err(failure),
            })
        }
    }

    impl ObjectLocator for StubLocator {
        fn locate(&self, _image: &ImageView<'_>) -> Result<Vec<Rect>, DetectionFailure> {
            self.result.clone()
        }
    }

    /// Reports smiles (given in full-image coordinates) that lie inside
    /// the searched view, translated to view coordinates.
    struct SceneSmileLocator {
        smiles: Vec<Rect>,
        searched: Mutex<Vec<Rect>>,
    }

    impl SceneSmileLocator {
        fn new(smiles: Vec<Rect>) -> Arc<Self> {
            Arc::new(Self {
                smiles,
                searched: Mutex::new(Vec::new()),
            })
        }
    }

    impl ObjectLocator for SceneSmileLocator {
        fn locate(&self, image: &ImageView<'_>) -> Result<Vec<Rect>, DetectionFailure> {
            let b = image.bounds();
            self.searched.lock().unwrap().push(b);
            Ok(self
                .smiles
                .iter()
                .filter(|s| s.x >= b.x && s.y >= b.y && s.right() <= b.right() && s.bottom() <= b.bottom())
                .map(|s| Rect::new(s.x - b.x, s.y - b.y, s.width, s.height))
                .collect())
        }
    }

    // --- Helpers ---

    fn image(w: u32, h: u32) -> Image {
        Image::new(vec![128; (w * h * 4) as usize], w, h, PixelLayout::Rgba).unwrap()
    }

    fn detector(face: Arc<dyn ObjectLocator>, smile: Arc<dyn ObjectLocator>) -> HappyDetector {
        HappyDetector::new(face, smile)
    }

    // --- Tests ---

    #[test]
    fn test_no_faces_is_not_happy() {
        let d = detector(
            StubLocator::returning(vec![]),
            StubLocator::returning(vec![Rect::new(0, 0, 5, 5)]),
        );
        assert_eq!(d.classify(&image(50, 50)), Ok(false));
        assert!(!d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_face_without_smile_is_not_happy() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(10, 10, 20, 20)]),
            StubLocator::returning(vec![]),
        );
        assert!(!d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_face_with_smile_is_happy() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(10, 10, 20, 20)]),
            StubLocator::returning(vec![Rect::new(2, 12, 10, 4)]),
        );
        assert!(d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_single_smiling_face_scenario() {
        // Face (10,10)-(110,110), smile (30,80)-(70,100)
        let smile = SceneSmileLocator::new(vec![Rect::from_corners(30, 80, 70, 100)]);
        let d = detector(
            StubLocator::returning(vec![Rect::from_corners(10, 10, 110, 110)]),
            smile.clone(),
        );
        assert!(d.detect_happy(&image(200, 200)));
        assert_eq!(
            *smile.searched.lock().unwrap(),
            vec![Rect::new(10, 10, 100, 100)]
        );
    }

    #[test]
    fn test_largest_face_is_searched() {
        // A has area 100, B has area 400: B is searched
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(30, 30, 20, 20);
        let smile = SceneSmileLocator::new(vec![]);
        let d = detector(StubLocator::returning(vec![a, b]), smile.clone());

        d.detect_happy(&image(100, 100));

        assert_eq!(*smile.searched.lock().unwrap(), vec![b]);
    }

    #[test]
    fn test_smile_only_in_smaller_face_is_not_happy() {
        let small = Rect::new(5, 5, 50, 50);
        let large = Rect::new(100, 20, 120, 120);
        let smile_in_small = Rect::new(15, 35, 30, 10);
        let d = detector(
            StubLocator::returning(vec![small, large]),
            SceneSmileLocator::new(vec![smile_in_small]),
        );
        assert!(!d.detect_happy(&image(300, 200)));
    }

    #[test]
    fn test_equal_area_faces_use_first() {
        let first = Rect::new(0, 0, 20, 20);
        let second = Rect::new(40, 40, 20, 20);
        let smile = SceneSmileLocator::new(vec![]);
        let d = detector(StubLocator::returning(vec![first, second]), smile.clone());

        d.detect_happy(&image(100, 100));

        assert_eq!(*smile.searched.lock().unwrap(), vec![first]);
    }

    // --- Failure handling ---

    #[test]
    fn test_empty_image_fails_closed() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(0, 0, 1, 1)]),
            StubLocator::returning(vec![Rect::new(0, 0, 1, 1)]),
        );
        let empty = Image::new(Vec::new(), 0, 0, PixelLayout::Rgba).unwrap();
        assert_eq!(d.classify(&empty), Err(DetectionFailure::EmptyImage));
        assert!(!d.detect_happy(&empty));
    }

    #[test]
    fn test_face_outside_image_is_invalid_crop() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(40, 40, 30, 30)]),
            StubLocator::returning(vec![Rect::new(0, 0, 1, 1)]),
        );
        assert!(matches!(
            d.classify(&image(50, 50)),
            Err(DetectionFailure::InvalidCrop(_))
        ));
        assert!(!d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_zero_area_face_fails_closed() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(10, 10, 0, 0)]),
            StubLocator::returning(vec![Rect::new(0, 0, 1, 1)]),
        );
        assert_eq!(d.classify(&image(50, 50)), Err(DetectionFailure::EmptyImage));
    }

    #[test]
    fn test_face_locator_failure_fails_closed() {
        let d = detector(
            StubLocator::failing(DetectionFailure::NotReady),
            StubLocator::returning(vec![Rect::new(0, 0, 1, 1)]),
        );
        assert_eq!(d.classify(&image(50, 50)), Err(DetectionFailure::NotReady));
        assert!(!d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_smile_locator_failure_fails_closed() {
        let d = detector(
            StubLocator::returning(vec![Rect::new(0, 0, 20, 20)]),
            StubLocator::failing(DetectionFailure::Locator("boom".into())),
        );
        assert!(!d.detect_happy(&image(50, 50)));
    }

    #[test]
    fn test_detection_does_not_mutate_image() {
        let img = image(40, 40);
        let before = img.data().to_vec();
        let d = detector(
            StubLocator::returning(vec![Rect::new(5, 5, 20, 20)]),
            StubLocator::returning(vec![Rect::new(1, 1, 2, 2)]),
        );
        d.detect_happy(&img);
        assert_eq!(img.data(), &before[..]);
    }
}
