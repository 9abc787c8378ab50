use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::detection::domain::detection_failure::DetectionFailure;
use crate::detection::domain::object_locator::ObjectLocator;
use crate::detection::infrastructure::haar_cascade::{CascadeClassifier, WindowVerdict};
use crate::detection::infrastructure::integral_image::IntegralImages;
use crate::detection::infrastructure::math::round_even;
use crate::detection::infrastructure::rect_grouping::group_rectangles;
use crate::shared::config::{ConfigError, DetectionParams};
use crate::shared::constants::GROUPING_EPS;
use crate::shared::image::ImageView;
use crate::shared::rect::Rect;

/// One pyramid level of the multiscale search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLevel {
    pub factor: f64,
    /// Detection window size in source-image pixels.
    pub window: (i32, i32),
    /// Image size after downscaling by `factor`.
    pub scaled: (u32, u32),
}

/// [`ObjectLocator`] backed by a Haar cascade with a sliding-window
/// search over an image pyramid.
pub struct CascadeLocator {
    cascade: Arc<CascadeClassifier>,
    params: DetectionParams,
}

impl CascadeLocator {
    pub fn new(cascade: Arc<CascadeClassifier>, params: DetectionParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self { cascade, params })
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Pyramid levels searched for an image of `width × height`.
    ///
    /// Stops once the downscaled image no longer exceeds the training
    /// window or the window outgrows the max size; levels whose window is
    /// below the min size are skipped.
    pub fn scale_levels(&self, width: u32, height: u32) -> Vec<ScaleLevel> {
        let (win_w, win_h) = self.cascade.window_size();
        let (max_w, max_h) = self.params.max_size.unwrap_or((width, height));
        let (min_w, min_h) = self.params.min_size;

        let mut levels = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let window = (
                round_even(win_w as f64 * factor),
                round_even(win_h as f64 * factor),
            );
            let scaled_w = round_even(width as f64 / factor);
            let scaled_h = round_even(height as f64 / factor);
            if scaled_w - win_w as i32 <= 0 || scaled_h - win_h as i32 <= 0 {
                break;
            }
            if window.0 as i64 > max_w as i64 || window.1 as i64 > max_h as i64 {
                break;
            }
            if window.0 as i64 >= min_w as i64 && window.1 as i64 >= min_h as i64 {
                levels.push(ScaleLevel {
                    factor,
                    window,
                    scaled: (scaled_w as u32, scaled_h as u32),
                });
            }
            factor *= self.params.scale_factor;
        }
        levels
    }

    /// Raw window hits across all pyramid levels, before grouping.
    pub fn candidates(&self, gray: &GrayImage) -> Vec<Rect> {
        let (win_w, win_h) = self.cascade.window_size();
        let tilted = self.cascade.uses_tilted_features();
        let mut hits = Vec::new();

        for level in self.scale_levels(gray.width(), gray.height()) {
            let resized;
            let scaled = if level.factor == 1.0 {
                gray
            } else {
                resized = imageops::resize(gray, level.scaled.0, level.scaled.1, FilterType::Triangle);
                &resized
            };
            let ii = IntegralImages::new(scaled, tilted);

            let step = if level.factor > 2.0 { 1 } else { 2 };
            let range_w = level.scaled.0 as usize - win_w as usize;
            let range_h = level.scaled.1 as usize - win_h as usize;
            for y in (0..range_h).step_by(step) {
                let mut x = 0;
                while x < range_w {
                    match self.cascade.evaluate(&ii, x, y) {
                        WindowVerdict::Accepted => hits.push(Rect::new(
                            round_even(x as f64 * level.factor),
                            round_even(y as f64 * level.factor),
                            level.window.0,
                            level.window.1,
                        )),
                        // Nothing close by either; skip the neighbour too.
                        WindowVerdict::Rejected { stage: 0 } => x += step,
                        WindowVerdict::Rejected { .. } => {}
                    }
                    x += step;
                }
            }
        }
        hits
    }

    /// Grouped detections in `gray`'s coordinate space.
    pub fn detect_multi_scale(&self, gray: &GrayImage) -> Vec<Rect> {
        let hits = self.candidates(gray);
        let grouped = group_rectangles(&hits, self.params.min_neighbors, GROUPING_EPS);
        log::debug!("{} raw hits grouped into {} detections", hits.len(), grouped.len());
        grouped
    }
}

impl ObjectLocator for CascadeLocator {
    fn locate(&self, image: &ImageView<'_>) -> Result<Vec<Rect>, DetectionFailure> {
        if image.is_empty() {
            return Err(DetectionFailure::EmptyImage);
        }
        let gray = image.to_gray();
        Ok(self.detect_multi_scale(&gray))
    }
}
