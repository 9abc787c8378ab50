use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR, FACE_MODEL_NAME, FACE_MODEL_URL,
    SMILE_MODEL_NAME, SMILE_MODEL_URL,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("scale factor must be greater than 1.0, got {0}")]
    ScaleFactor(f64),
    #[error("max size {max:?} is smaller than min size {min:?}")]
    SizeRange { min: (u32, u32), max: (u32, u32) },
}

/// Multiscale search parameters for one cascade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Growth of the search window between pyramid levels.
    pub scale_factor: f64,
    /// Minimum overlapping candidates a merged detection needs (exclusive).
    pub min_neighbors: u32,
    /// Smallest window `(width, height)` considered; `(0, 0)` is unconstrained.
    pub min_size: (u32, u32),
    /// Largest window considered; `None` means the image size.
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: (0, 0),
            max_size: None,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(ConfigError::ScaleFactor(self.scale_factor));
        }
        if let Some(max) = self.max_size {
            if max.0 < self.min_size.0 || max.1 < self.min_size.1 {
                return Err(ConfigError::SizeRange {
                    min: self.min_size,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Where a cascade file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Url(String),
    Path(PathBuf),
}

impl ModelSource {
    /// `http://` and `https://` locations are URLs; anything else is a local path.
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ModelSource::Url(location.to_string())
        } else {
            ModelSource::Path(PathBuf::from(location))
        }
    }
}

/// Locations of the face and smile cascades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub face_model: String,
    pub smile_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_model: FACE_MODEL_URL.to_string(),
            smile_model: SMILE_MODEL_URL.to_string(),
        }
    }
}

impl ModelConfig {
    /// `(model name, source)` for the face cascade.
    pub fn face(&self) -> (String, ModelSource) {
        model_entry(&self.face_model, FACE_MODEL_NAME)
    }

    /// `(model name, source)` for the smile cascade.
    pub fn smile(&self) -> (String, ModelSource) {
        model_entry(&self.smile_model, SMILE_MODEL_NAME)
    }
}

fn model_entry(location: &str, fallback_name: &str) -> (String, ModelSource) {
    let source = ModelSource::parse(location);
    let name = match &source {
        ModelSource::Url(url) => url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback_name)
            .to_string(),
        ModelSource::Path(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| fallback_name.to_string()),
    };
    (name, source)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HappyConfig {
    pub models: ModelConfig,
    pub detection: DetectionParams,
}

impl HappyConfig {
    /// Default location: `<config_dir>/HappyDetect/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
    }

    /// Loads an explicit config file, or the default one when present,
    /// or built-in defaults. Errors only for files that exist but are bad.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.detection.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
