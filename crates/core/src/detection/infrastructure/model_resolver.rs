use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Resolve a cascade file by name, checking cache locations before downloading.
///
/// Resolution order:
/// 1. User cache directory (platform-specific), keyed by [`cache_file_name`]
/// 2. Bundled path (for development / pre-packaged installs)
/// 3. Download from URL to cache
pub fn resolve(
    name: &str,
    url: &str,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(&model_cache_dir()?, name, url, bundled_dir, progress)
}

/// [`resolve`] against an explicit cache directory.
pub fn resolve_in(
    cache_dir: &Path,
    name: &str,
    url: &str,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(cache_file_name(name, url));
    if cached_path.exists() {
        log::debug!("Using cached model {}", cached_path.display());
        return Ok(cached_path);
    }

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(name);
        if bundled_path.exists() {
            log::debug!("Using bundled model {}", bundled_path.display());
            return Ok(bundled_path);
        }
    }

    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading {name} from {url}");
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Cache file name for `name` downloaded from `url`.
///
/// The URL hash goes into the stem, so two URLs ending in the same file
/// name never share a cached copy.
pub fn cache_file_name(name: &str, url: &str) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let tag = format!("{:016x}", fnv1a(url.as_bytes()));
    match path.extension() {
        Some(ext) => format!("{stem}-{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{tag}"),
    }
}

/// 64-bit FNV-1a, stable across toolchains.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/HappyDetect/models/`
/// - Linux: `$XDG_CACHE_HOME/HappyDetect/models/` or `~/.cache/HappyDetect/models/`
/// - Windows: `%LOCALAPPDATA%/HappyDetect/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, progress);

    // Clean up .part file on any error
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = fs::File::create(temp_path).map_err(|e| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;

    let mut reader = response;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| ModelResolveError::Write {
            path: temp_path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| ModelResolveError::Write {
                path: temp_path.to_path_buf(),
                source: e,
            })?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(|e| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
