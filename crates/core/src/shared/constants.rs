pub const FACE_MODEL_NAME: &str = "haarcascade_frontalface_default.xml";
pub const FACE_MODEL_URL: &str =
    "https://raw.githubusercontent.com/opencv/opencv/4.x/data/haarcascades/haarcascade_frontalface_default.xml";

pub const SMILE_MODEL_NAME: &str = "haarcascade_smile.xml";
pub const SMILE_MODEL_URL: &str =
    "https://raw.githubusercontent.com/opencv/opencv/4.x/data/haarcascades/haarcascade_smile.xml";

/// Application directory name under the platform cache/config dirs.
pub const APP_DIR_NAME: &str = "HappyDetect";

pub const DEFAULT_SCALE_FACTOR: f64 = 1.2;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 3;

/// Similarity tolerance used when merging overlapping detections.
pub const GROUPING_EPS: f64 = 0.2;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "gif"];
