use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

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
    #[error("model {name} not found locally and has no download url")]
    NotFound { name: String },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// A model file and, when one exists, where to fetch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSource {
    pub name: &'static str,
    pub url: Option<&'static str>,
}

/// Finds model files in the user cache, then the bundled directory, and
/// downloads into the cache as a last resort.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelResolver {
    /// Resolver rooted at the platform cache directory:
    ///
    /// - macOS: `~/Library/Application Support/Facewatch/models/`
    /// - Linux: `$XDG_CACHE_HOME/Facewatch/models/` or `~/.cache/Facewatch/models/`
    /// - Windows: `%LOCALAPPDATA%/Facewatch/models/`
    pub fn new(bundled_dir: Option<PathBuf>) -> Result<Self, ModelResolveError> {
        #[cfg(target_os = "macos")]
        let base = dirs::data_dir();
        #[cfg(not(target_os = "macos"))]
        let base = dirs::cache_dir();
        let cache_dir = base
            .map(|d| d.join("Facewatch").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)?;
        Ok(Self::with_cache_dir(cache_dir, bundled_dir))
    }

    pub fn with_cache_dir(cache_dir: PathBuf, bundled_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            bundled_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn resolve(&self, source: ModelSource) -> Result<PathBuf, ModelResolveError> {
        let cached = self.cache_dir.join(source.name);
        if cached.exists() {
            return Ok(cached);
        }
        if let Some(bundled) = self
            .bundled_dir
            .as_ref()
            .map(|dir| dir.join(source.name))
            .filter(|path| path.exists())
        {
            return Ok(bundled);
        }

        let url = source.url.ok_or_else(|| ModelResolveError::NotFound {
            name: source.name.to_string(),
        })?;
        fs::create_dir_all(&self.cache_dir).map_err(ModelResolveError::CacheDir)?;
        log::info!("Downloading {} from {url}", source.name);
        fetch(url, &cached)?;
        Ok(cached)
    }
}

/// Downloads to `<dest>.part` and renames on success, so an interrupted
/// download never leaves a truncated model at `dest`.
fn fetch(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let part = dest.with_extension("part");
    let result = fetch_to(url, &part).and_then(|()| {
        fs::rename(&part, dest).map_err(|source| ModelResolveError::Write {
            path: dest.to_path_buf(),
            source,
        })
    });
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn fetch_to(url: &str, part: &Path) -> Result<(), ModelResolveError> {
    let write_err = |source| ModelResolveError::Write {
        path: part.to_path_buf(),
        source,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;
    let mut progress = DownloadProgress::new(response.content_length());
    let mut file = fs::File::create(part).map_err(write_err)?;

    // Stream the body; models are hundreds of MB
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        progress.advance(n as u64);
    }
    file.flush().map_err(write_err)
}

/// Logs download progress in 10% steps when the size is known.
struct DownloadProgress {
    total: Option<u64>,
    downloaded: u64,
    last_decile: u64,
}

impl DownloadProgress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            downloaded: 0,
            last_decile: 0,
        }
    }

    /// Returns the percentage logged by this step, if any.
    fn advance(&mut self, bytes: u64) -> Option<u64> {
        self.downloaded += bytes;
        let total = self.total?;
        let decile = (self.downloaded * 10 / total).min(10);
        if decile <= self.last_decile {
            return None;
        }
        self.last_decile = decile;
        log::info!(
            "Downloaded {}% ({:.1} MB)",
            decile * 10,
            self.downloaded as f64 / 1_048_576.0
        );
        Some(decile * 10)
    }
}
