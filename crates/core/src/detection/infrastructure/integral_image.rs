use image::GrayImage;
use ndarray::Array2;

/// Summed-area tables for one grayscale image.
///
/// `sum` and `sqsum` are `(h + 1) × (w + 1)` with a zero first row and
/// column. The optional 45° table `tilted` follows the convention
/// `T(X, Y) = Σ I(x, y)` over `y < Y` and `|x - X + 1| <= Y - y - 1`, stored
/// with `pad` extra columns on each side so its recurrence never reads
/// outside the table for columns that map into the image.
pub struct IntegralImages {
    sum: Array2<f64>,
    sqsum: Array2<f64>,
    tilted: Option<Array2<f64>>,
    pad: usize,
    width: usize,
    height: usize,
}

impl IntegralImages {
    pub fn new(gray: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sqsum = Array2::<f64>::zeros((h + 1, w + 1));

        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sqsum = 0.0;
            for x in 0..w {
                let v = gray.get_pixel(x as u32, y as u32)[0] as f64;
                row_sum += v;
                row_sqsum += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row_sum;
                sqsum[[y + 1, x + 1]] = sqsum[[y, x + 1]] + row_sqsum;
            }
        }

        let pad = h + 1;
        let tilted = with_tilted.then(|| tilted_table(gray, pad));

        Self {
            sum,
            sqsum,
            tilted,
            pad,
            width: w,
            height: h,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn has_tilted(&self) -> bool {
        self.tilted.is_some()
    }

    /// Sum of pixels in the upright rectangle; caller keeps it in bounds.
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        box_sum(&self.sum, x, y, w, h)
    }

    /// Sum of squared pixels in the upright rectangle.
    pub fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        box_sum(&self.sqsum, x, y, w, h)
    }

    /// Sum of the 45°-rotated rectangle whose top corner is `(x, y)`,
    /// extending `w` down-right and `h` down-left.
    ///
    /// Returns 0 when the tilted table was not built.
    pub fn tilted_sum(&self, x: i64, y: i64, w: i64, h: i64) -> f64 {
        let Some(t) = &self.tilted else {
            return 0.0;
        };
        let at = |px: i64, py: i64| -> f64 {
            let col = px + self.pad as i64;
            if col < 0 || py < 0 {
                return 0.0;
            }
            t.get([py as usize, col as usize]).copied().unwrap_or(0.0)
        };
        at(x, y) - at(x - h, y + h) - at(x + w, y + w) + at(x + w - h, y + w + h)
    }
}

fn box_sum(table: &Array2<f64>, x: usize, y: usize, w: usize, h: usize) -> f64 {
    table[[y + h, x + w]] - table[[y, x + w]] - table[[y + h, x]] + table[[y, x]]
}

/// Rotated summed-area table via
/// `T(X,Y) = T(X-1,Y-1) + T(X+1,Y-1) - T(X,Y-2) + I(X-1,Y-1) + I(X-1,Y-2)`.
fn tilted_table(gray: &GrayImage, pad: usize) -> Array2<f64> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let cols = w as usize + 1 + 2 * pad;
    let mut t = Array2::<f64>::zeros((h as usize + 1, cols));

    let pixel = |x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= w || y >= h {
            0.0
        } else {
            gray.get_pixel(x as u32, y as u32)[0] as f64
        }
    };

    for row in 1..=h as usize {
        for col in 0..cols {
            let x = col as i64 - pad as i64;
            let y = row as i64;
            let up_left = if col > 0 { t[[row - 1, col - 1]] } else { 0.0 };
            let up_right = if col + 1 < cols { t[[row - 1, col + 1]] } else { 0.0 };
            let up_two = if row >= 2 { t[[row - 2, col]] } else { 0.0 };
            t[[row, col]] = up_left + up_right - up_two + pixel(x - 1, y - 1) + pixel(x - 1, y - 2);
        }
    }
    t
}
