/// An axis-aligned detection rectangle in pixel coordinates.
///
/// Width and height are never negative; constructors clamp them to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    /// Builds a rectangle from its top-left and bottom-right corners.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `self` lies entirely within `width × height` anchored at the origin.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.right() as i64 <= width as i64
            && self.bottom() as i64 <= height as i64
    }

    /// Maximum-area rectangle. On exact ties the earliest one wins: a later
    /// rectangle only replaces the running maximum when strictly larger.
    pub fn largest(rects: &[Rect]) -> Option<Rect> {
        rects
            .iter()
            .copied()
            .reduce(|max, current| if current.area() > max.area() { current } else { max })
    }
}
