use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use crate::detection::domain::happy_detector::HappyDetector;
use crate::detection::infrastructure::cascade_locator::CascadeLocator;
use crate::detection::infrastructure::haar_cascade::{CascadeClassifier, CascadeLoadError};
use crate::detection::infrastructure::model_resolver::{self, ModelResolveError, ProgressFn};
use crate::shared::config::{ConfigError, DetectionParams, ModelConfig, ModelSource};

/// The cascade bytes could not be retrieved.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Resolve(#[from] ModelResolveError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to fetch model {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to load model {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: CascadeLoadError,
    },
    #[error("loader thread for {name} panicked")]
    Worker { name: String },
}

/// Download progress: `(model name, bytes_downloaded, total_bytes)`.
pub type ModelProgressFn = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Cache directory for downloads; the platform default when `None`.
    pub cache_dir: Option<PathBuf>,
    /// Directory checked for pre-packaged cascades before downloading.
    pub bundled_dir: Option<PathBuf>,
    pub progress: Option<ModelProgressFn>,
}

/// The face and smile cascades, fully parsed and immutable.
#[derive(Clone, Debug)]
pub struct HappyModels {
    face: Arc<CascadeClassifier>,
    smile: Arc<CascadeClassifier>,
}

impl HappyModels {
    pub fn new(face: CascadeClassifier, smile: CascadeClassifier) -> Self {
        Self {
            face: Arc::new(face),
            smile: Arc::new(smile),
        }
    }

    pub fn face(&self) -> &Arc<CascadeClassifier> {
        &self.face
    }

    pub fn smile(&self) -> &Arc<CascadeClassifier> {
        &self.smile
    }

    /// Detector running both cascades with `params`.
    pub fn detector(&self, params: &DetectionParams) -> Result<HappyDetector, ConfigError> {
        let face = CascadeLocator::new(self.face.clone(), *params)?;
        let smile = CascadeLocator::new(self.smile.clone(), *params)?;
        Ok(HappyDetector::new(Arc::new(face), Arc::new(smile)))
    }
}

/// Fetches and parses one cascade.
pub fn load_model(name: &str, source: &ModelSource) -> Result<CascadeClassifier, ModelLoadError> {
    load_model_with(name, source, &LoadOptions::default())
}

pub fn load_model_with(
    name: &str,
    source: &ModelSource,
    options: &LoadOptions,
) -> Result<CascadeClassifier, ModelLoadError> {
    let fetch_err = |source: FetchError| ModelLoadError::Fetch {
        name: name.to_string(),
        source,
    };

    let path = match source {
        ModelSource::Path(path) => path.clone(),
        ModelSource::Url(url) => {
            let progress = options.progress.clone().map(|cb| {
                let model = name.to_string();
                Box::new(move |downloaded, total| cb(&model, downloaded, total)) as ProgressFn
            });
            let bundled = options.bundled_dir.as_deref();
            let resolved = match &options.cache_dir {
                Some(dir) => model_resolver::resolve_in(dir, name, url, bundled, progress),
                None => model_resolver::resolve(name, url, bundled, progress),
            };
            resolved.map_err(|e| fetch_err(e.into()))?
        }
    };

    let bytes = fs::read(&path).map_err(|e| {
        fetch_err(FetchError::Read {
            path: path.clone(),
            source: e,
        })
    })?;
    let cascade = CascadeClassifier::from_bytes(&bytes).map_err(|e| ModelLoadError::Load {
        name: name.to_string(),
        source: e,
    })?;

    let (w, h) = cascade.window_size();
    log::info!(
        "Loaded {name}: {} stages, {} features, {w}x{h} window",
        cascade.stage_count(),
        cascade.feature_count()
    );
    Ok(cascade)
}

/// Loads the face and smile cascades concurrently and returns once both
/// are parsed. The face error wins when both fail.
pub fn load_happy_detection_models(config: &ModelConfig) -> Result<HappyModels, ModelLoadError> {
    load_happy_detection_models_with(config, &LoadOptions::default())
}

pub fn load_happy_detection_models_with(
    config: &ModelConfig,
    options: &LoadOptions,
) -> Result<HappyModels, ModelLoadError> {
    let (face_name, face_source) = config.face();
    let (smile_name, smile_source) = config.smile();

    let (face, smile) = thread::scope(|s| {
        let face = s.spawn(|| load_model_with(&face_name, &face_source, options));
        let smile = s.spawn(|| load_model_with(&smile_name, &smile_source, options));
        (
            join(face, &face_name),
            join(smile, &smile_name),
        )
    });

    Ok(HappyModels::new(face?, smile?))
}

fn join(
    handle: thread::ScopedJoinHandle<'_, Result<CascadeClassifier, ModelLoadError>>,
    name: &str,
) -> Result<CascadeClassifier, ModelLoadError> {
    handle.join().unwrap_or_else(|_| {
        Err(ModelLoadError::Worker {
            name: name.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CACHED_URL: &str = "http://invalid.nonexistent.example.com/face.xml";

    fn cascade_xml(size: u32) -> String {
        format!(
            "<opencv_storage><cascade><stageType>BOOST</stageType><featureType>HAAR</featureType>\
             <height>{size}</height><width>{size}</width><stages><_><stageThreshold>-1.</stageThreshold>\
             <weakClassifiers><_><internalNodes>0 -1 0 0.</internalNodes><leafValues>1. 1.</leafValues></_>\
             </weakClassifiers></_></stages><features><_><rects><_>0 0 {size} {size} 1.</_></rects></_>\
             </features></cascade></opencv_storage>"
        )
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn config_for(face: &std::path::Path, smile: &std::path::Path) -> ModelConfig {
        ModelConfig {
            face_model: face.to_string_lossy().into_owned(),
            smile_model: smile.to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn test_load_model_from_path() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "face.xml", &cascade_xml(24));
        let cascade = load_model("face.xml", &ModelSource::Path(path)).unwrap();
        assert_eq!(cascade.window_size(), (24, 24));
    }

    #[test]
    fn test_missing_file_is_fetch_error() {
        let tmp = TempDir::new().unwrap();
        let source = ModelSource::Path(tmp.path().join("missing.xml"));
        let err = load_model("missing.xml", &source).unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::Fetch {
                source: FetchError::Read { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_file_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "face.xml", "<html>Not Found</html>");
        let err = load_model("face.xml", &ModelSource::Path(path)).unwrap_err();
        assert!(matches!(err, ModelLoadError::Load { .. }));
        assert!(err.to_string().contains("face.xml"));
    }

    #[test]
    fn test_unreachable_url_is_fetch_error() {
        let tmp = TempDir::new().unwrap();
        let options = LoadOptions {
            cache_dir: Some(tmp.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let source = ModelSource::Url("http://invalid.nonexistent.example.com/face.xml".into());
        let err = load_model_with("face.xml", &source, &options).unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::Fetch {
                source: FetchError::Resolve(_),
                ..
            }
        ));
    }

    #[test]
    fn test_url_source_uses_cached_copy() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, &model_resolver::cache_file_name("face.xml", CACHED_URL), &cascade_xml(20));
        let options = LoadOptions {
            cache_dir: Some(tmp.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let source = ModelSource::Url(CACHED_URL.into());
        let cascade = load_model_with("face.xml", &source, &options).unwrap();
        assert_eq!(cascade.window_size(), (20, 20));
    }

    #[test]
    fn test_progress_not_called_for_cached_models() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, &model_resolver::cache_file_name("face.xml", CACHED_URL), &cascade_xml(20));
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let options = LoadOptions {
            cache_dir: Some(tmp.path().to_path_buf()),
            progress: Some(Arc::new(move |_: &str, _: u64, _: u64| {
                *counter.lock().unwrap() += 1
            })),
            ..LoadOptions::default()
        };
        let source = ModelSource::Url(CACHED_URL.into());
        load_model_with("face.xml", &source, &options).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_load_both_models() {
        let tmp = TempDir::new().unwrap();
        let face = write(&tmp, "face.xml", &cascade_xml(24));
        let smile = write(&tmp, "smile.xml", &cascade_xml(12));

        let models = load_happy_detection_models(&config_for(&face, &smile)).unwrap();
        assert_eq!(models.face().window_size(), (24, 24));
        assert_eq!(models.smile().window_size(), (12, 12));
    }

    #[test]
    fn test_load_fails_when_either_model_fails() {
        let tmp = TempDir::new().unwrap();
        let face = write(&tmp, "face.xml", &cascade_xml(24));
        let smile = write(&tmp, "smile.xml", "not a cascade");

        let err = load_happy_detection_models(&config_for(&face, &smile)).unwrap_err();
        match err {
            ModelLoadError::Load { name, .. } => assert_eq!(name, "smile.xml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_face_error_reported_first() {
        let tmp = TempDir::new().unwrap();
        let face = tmp.path().join("absent_face.xml");
        let smile = write(&tmp, "smile.xml", "not a cascade");

        let err = load_happy_detection_models(&config_for(&face, &smile)).unwrap_err();
        assert!(matches!(err, ModelLoadError::Fetch { ref name, .. } if name == "absent_face.xml"));
    }

    #[test]
    fn test_models_build_detector() {
        let tmp = TempDir::new().unwrap();
        let face = write(&tmp, "face.xml", &cascade_xml(24));
        let smile = write(&tmp, "smile.xml", &cascade_xml(12));
        let models = load_happy_detection_models(&config_for(&face, &smile)).unwrap();

        assert!(models.detector(&DetectionParams::default()).is_ok());
        let bad = DetectionParams {
            scale_factor: 0.5,
            ..DetectionParams::default()
        };
        assert!(models.detector(&bad).is_err());
    }
}
