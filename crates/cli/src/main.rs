use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;

use happy_detect_core::detection::infrastructure::model_loader::{
    load_happy_detection_models_with, LoadOptions,
};
use happy_detect_core::input::infrastructure::image_file_reader::{is_image_path, ImageFileReader};
use happy_detect_core::pipeline::classify_images_use_case::ClassifyImagesUseCase;
use happy_detect_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use happy_detect_core::shared::config::HappyConfig;

/// Reports whether the most prominent face in each image is smiling.
#[derive(Parser)]
#[command(name = "happy-detect")]
struct Cli {
    /// Image files or directories of images.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON config file (defaults to the per-user config when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Face cascade: URL or local path.
    #[arg(long)]
    face_model: Option<String>,

    /// Smile cascade: URL or local path.
    #[arg(long)]
    smile_model: Option<String>,

    /// Pyramid scale step between detection passes (> 1.0).
    #[arg(long)]
    scale_factor: Option<f64>,

    /// Overlapping hits required to keep a detection.
    #[arg(long)]
    min_neighbors: Option<u32>,

    /// Print verdicts as a JSON array.
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = build_config(&cli)?;
    let images = collect_inputs(&cli.inputs)?;
    if images.is_empty() {
        return Err("No images found in the given inputs".into());
    }

    let options = LoadOptions {
        progress: Some(Arc::new(download_progress)),
        ..LoadOptions::default()
    };
    let models = load_happy_detection_models_with(&config.models, &options)?;
    let detector = models.detector(&config.detection)?;

    let mut use_case = ClassifyImagesUseCase::new(
        Box::new(ImageFileReader::new()),
        detector,
        Box::new(StdoutPipelineLogger::default()),
    );
    let verdicts = use_case.execute(&images);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&verdicts)?);
    } else {
        for verdict in &verdicts {
            println!("{verdict}");
        }
    }
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    for input in &cli.inputs {
        if !input.exists() {
            return Err(format!("Input not found: {}", input.display()).into());
        }
    }
    if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(format!("Config file not found: {}", path.display()).into());
        }
    }
    if let Some(scale) = cli.scale_factor {
        if !scale.is_finite() || scale <= 1.0 {
            return Err(format!("Scale factor must be greater than 1.0, got {scale}").into());
        }
    }
    Ok(())
}

/// File config with command-line overrides applied.
fn build_config(cli: &Cli) -> Result<HappyConfig, Box<dyn std::error::Error>> {
    let mut config = HappyConfig::load(cli.config.as_deref())?;
    if let Some(face) = &cli.face_model {
        config.models.face_model = face.clone();
    }
    if let Some(smile) = &cli.smile_model {
        config.models.smile_model = smile.clone();
    }
    if let Some(scale) = cli.scale_factor {
        config.detection.scale_factor = scale;
    }
    if let Some(neighbors) = cli.min_neighbors {
        config.detection.min_neighbors = neighbors;
    }
    config.detection.validate()?;
    Ok(config)
}

/// Expands directories to their image files (sorted, non-recursive).
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            images.extend(images_in_dir(input)?);
        } else {
            images.push(input.clone());
        }
    }
    Ok(images)
}

fn images_in_dir(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_path(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn download_progress(model: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {model}... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading {model}... {downloaded} bytes");
    }
}
