use image::{GrayImage, Luma};
use ndarray::{s, ArrayView3};
use thiserror::Error;

use crate::shared::rect::Rect;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} {layout:?}")]
    BufferSize {
        width: u32,
        height: u32,
        layout: PixelLayout,
        expected: usize,
        actual: usize,
    },
    #[error("region {rect:?} lies outside the {width}x{height} image")]
    RoiOutOfBounds { rect: Rect, width: u32, height: u32 },
}

/// Channel layout of an [`Image`] buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// An owned image: contiguous interleaved bytes in row-major order.
///
/// Detection never mutates it; crops are borrowed [`ImageView`]s.
#[derive(Clone, Debug)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl Image {
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self, ImageError> {
        let expected = (width as usize) * (height as usize) * layout.channels();
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                layout,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.layout.channels(),
            ),
            &self.data,
        )
        .expect("Image data length is validated at construction")
    }

    /// View of the whole image.
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            image: self,
            rect: Rect::new(0, 0, self.width as i32, self.height as i32),
        }
    }

    /// Region-of-interest view; fails when `rect` is not fully inside the image.
    pub fn roi(&self, rect: Rect) -> Result<ImageView<'_>, ImageError> {
        if !rect.fits_within(self.width, self.height) {
            return Err(ImageError::RoiOutOfBounds {
                rect,
                width: self.width,
                height: self.height,
            });
        }
        Ok(ImageView { image: self, rect })
    }
}

impl From<image::RgbaImage> for Image {
    fn from(buffer: image::RgbaImage) -> Self {
        let (width, height) = buffer.dimensions();
        Self {
            data: buffer.into_raw(),
            width,
            height,
            layout: PixelLayout::Rgba,
        }
    }
}

impl From<GrayImage> for Image {
    fn from(buffer: GrayImage) -> Self {
        let (width, height) = buffer.dimensions();
        Self {
            data: buffer.into_raw(),
            width,
            height,
            layout: PixelLayout::Gray,
        }
    }
}

/// A borrowed rectangular window onto an [`Image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    image: &'a Image,
    rect: Rect,
}

impl ImageView<'_> {
    pub fn width(&self) -> u32 {
        self.rect.width as u32
    }

    pub fn height(&self) -> u32 {
        self.rect.height as u32
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    /// Position of this view inside its parent image.
    pub fn bounds(&self) -> Rect {
        self.rect
    }

    /// Single-channel copy of the viewed region.
    ///
    /// Color images use the BT.601 fixed-point weights (R 4899, G 9617,
    /// B 1868, >> 14) so gray levels match OpenCV's `RGB2GRAY`.
    pub fn to_gray(&self) -> GrayImage {
        let (x0, y0) = (self.rect.x as usize, self.rect.y as usize);
        let pixels = self.image.as_ndarray();
        let region = pixels.slice(s![
            y0..y0 + self.rect.height as usize,
            x0..x0 + self.rect.width as usize,
            ..
        ]);
        let layout = self.image.layout();
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let px = region.slice(s![y as usize, x as usize, ..]);
            let level = match layout {
                PixelLayout::Gray => px[0],
                PixelLayout::Rgb | PixelLayout::Rgba => luma(px[0], px[1], px[2]),
            };
            Luma([level])
        })
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13);
    (y >> 14).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rgba(width: u32, height: u32, fill: [u8; 4]) -> Image {
        let data = fill.repeat((width * height) as usize);
        Image::new(data, width, height, PixelLayout::Rgba).unwrap()
    }

    #[test]
    fn test_construction_and_accessors() {
        let img = rgba(3, 2, [1, 2, 3, 4]);
        assert_eq!(img.width(), 3);
        assert_eq!(img.height(), 2);
        assert_eq!(img.layout(), PixelLayout::Rgba);
        assert_eq!(img.data().len(), 24);
        assert!(!img.is_empty());
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let err = Image::new(vec![0u8; 10], 2, 2, PixelLayout::Rgb).unwrap_err();
        assert!(matches!(
            err,
            ImageError::BufferSize {
                expected: 12,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_sized_image_is_valid_but_empty() {
        let img = Image::new(Vec::new(), 0, 0, PixelLayout::Gray).unwrap();
        assert!(img.is_empty());
        assert!(img.view().is_empty());
    }

    #[test]
    fn test_as_ndarray_shape() {
        let img = rgba(4, 2, [0, 0, 0, 255]);
        assert_eq!(img.as_ndarray().shape(), &[2, 4, 4]);
    }

    // ── ROI ──────────────────────────────────────────────────────────

    #[test]
    fn test_roi_inside_bounds() {
        let img = rgba(10, 10, [0, 0, 0, 255]);
        let view = img.roi(Rect::new(2, 3, 4, 5)).unwrap();
        assert_eq!(view.width(), 4);
        assert_eq!(view.height(), 5);
        assert_eq!(view.bounds(), Rect::new(2, 3, 4, 5));
    }

    #[rstest]
    #[case::negative(Rect::new(-1, 0, 5, 5))]
    #[case::too_wide(Rect::new(8, 0, 5, 5))]
    #[case::too_tall(Rect::new(0, 8, 5, 5))]
    fn test_roi_out_of_bounds(#[case] rect: Rect) {
        let img = rgba(10, 10, [0, 0, 0, 255]);
        assert!(matches!(
            img.roi(rect),
            Err(ImageError::RoiOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_roi_does_not_mutate_source() {
        let img = rgba(4, 4, [10, 20, 30, 255]);
        let before = img.data().to_vec();
        let _gray = img.roi(Rect::new(1, 1, 2, 2)).unwrap().to_gray();
        assert_eq!(img.data(), &before[..]);
    }

    // ── Grayscale ────────────────────────────────────────────────────

    #[rstest]
    #[case::black([0, 0, 0], 0)]
    #[case::white([255, 255, 255], 255)]
    #[case::red([255, 0, 0], 76)]
    #[case::green([0, 255, 0], 150)]
    #[case::blue([0, 0, 255], 29)]
    fn test_luma_weights(#[case] rgb: [u8; 3], #[case] expected: u8) {
        assert_eq!(luma(rgb[0], rgb[1], rgb[2]), expected);
    }

    #[test]
    fn test_to_gray_uses_roi_pixels() {
        // 3x1 gray strip: 10, 20, 30
        let img = Image::new(vec![10, 20, 30], 3, 1, PixelLayout::Gray).unwrap();
        let gray = img.roi(Rect::new(1, 0, 2, 1)).unwrap().to_gray();
        assert_eq!(gray.dimensions(), (2, 1));
        assert_eq!(gray.get_pixel(0, 0)[0], 20);
        assert_eq!(gray.get_pixel(1, 0)[0], 30);
    }

    #[test]
    fn test_from_rgba_buffer() {
        let buffer = image::RgbaImage::from_pixel(5, 4, image::Rgba([1, 2, 3, 4]));
        let img = Image::from(buffer);
        assert_eq!(img.width(), 5);
        assert_eq!(img.height(), 4);
        assert_eq!(img.layout(), PixelLayout::Rgba);
    }
}
