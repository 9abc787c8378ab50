use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::detection::domain::happy_detector::HappyDetector;
use crate::input::domain::image_reader::ImageReader;
use crate::pipeline::pipeline_logger::PipelineLogger;

/// Result for one input image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageVerdict {
    pub path: PathBuf,
    pub happy: bool,
    /// Why the image could not be classified; `happy` is `false` then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ImageVerdict {
    fn label(&self) -> &'static str {
        if self.happy {
            "happy"
        } else {
            "not happy"
        }
    }
}

impl std::fmt::Display for ImageVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.label())?;
        if let Some(failure) = &self.failure {
            write!(f, " ({failure})")?;
        }
        Ok(())
    }
}

/// Batch pipeline: read → classify for each input path.
///
/// A bad image never aborts the batch; it yields a `happy = false` verdict
/// carrying the failure text.
pub struct ClassifyImagesUseCase {
    reader: Box<dyn ImageReader>,
    detector: HappyDetector,
    logger: Box<dyn PipelineLogger>,
}

impl ClassifyImagesUseCase {
    pub fn new(
        reader: Box<dyn ImageReader>,
        detector: HappyDetector,
        logger: Box<dyn PipelineLogger>,
    ) -> Self {
        Self {
            reader,
            detector,
            logger,
        }
    }

    pub fn execute(&mut self, paths: &[PathBuf]) -> Vec<ImageVerdict> {
        let total = paths.len();
        let mut verdicts = Vec::with_capacity(total);

        for (i, path) in paths.iter().enumerate() {
            let verdict = self.classify_one(path);
            let outcome = match (&verdict.failure, verdict.happy) {
                (Some(_), _) => "failed",
                (None, true) => "happy",
                (None, false) => "not_happy",
            };
            self.logger.outcome(outcome);
            self.logger.progress(i + 1, total);
            verdicts.push(verdict);
        }

        self.logger.summary();
        verdicts
    }

    fn classify_one(&mut self, path: &Path) -> ImageVerdict {
        let read_start = Instant::now();
        let image = match self.reader.read(path) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Skipping {}: {e}", path.display());
                return ImageVerdict {
                    path: path.to_path_buf(),
                    happy: false,
                    failure: Some(format!("unreadable: {e}")),
                };
            }
        };
        self.logger
            .timing("read", read_start.elapsed().as_secs_f64() * 1000.0);
        self.logger.metric(
            "megapixels",
            image.width() as f64 * image.height() as f64 / 1_000_000.0,
        );

        let detect_start = Instant::now();
        let result = self.detector.classify(&image);
        self.logger
            .timing("detect", detect_start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(happy) => ImageVerdict {
                path: path.to_path_buf(),
                happy,
                failure: None,
            },
            Err(failure) => {
                log::warn!(
                    "Detection failed for {} ({}): {failure}",
                    path.display(),
                    failure.kind()
                );
                ImageVerdict {
                    path: path.to_path_buf(),
                    happy: false,
                    failure: Some(format!("{}: {failure}", failure.kind())),
                }
            }
        }
    }
}
