use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::face_locator::FaceLocator;
use crate::recognition::domain::embedding::Embedding;
use crate::recognition::domain::identity_database::{IdentityDatabase, IdentityDatabaseError};
use crate::shared::constants::{ENROLLMENT_EXTENSIONS, IDENTITY_CACHE_FILENAME};
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum IdentityStoreError {
    #[error("failed to create enrollment directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to list {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove identity cache {path}")]
    RemoveCache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid identity database")]
    Database(#[from] IdentityDatabaseError),
}

/// Identity database backed by an enrollment directory and a JSON cache.
///
/// Layout: `<root>/<label>/<image>.{png,jpg,jpeg}`, cache at
/// `<root>/_encodings.json`. A readable cache is trusted as-is; it is never
/// checked against the images it was built from.
pub struct IdentityStore {
    root: PathBuf,
    threshold: f64,
    database: IdentityDatabase,
}

impl IdentityStore {
    /// Loads the cache, or builds from the enrollment images when the cache
    /// is missing or unreadable.
    pub fn open(
        root: &Path,
        threshold: f64,
        locator: &mut dyn FaceLocator,
        embedder: &mut dyn FaceEmbedder,
    ) -> Result<Self, IdentityStoreError> {
        let mut store = Self {
            root: root.to_path_buf(),
            threshold,
            database: IdentityDatabase::new(),
        };
        match store.read_cache() {
            Some(database) => {
                log::info!("Loaded identity cache ({} identities)", database.len());
                store.database = database;
            }
            None => store.rebuild(locator, embedder)?,
        }
        Ok(store)
    }

    /// Discards the cache and rebuilds from the enrollment images.
    pub fn reload(
        &mut self,
        locator: &mut dyn FaceLocator,
        embedder: &mut dyn FaceEmbedder,
    ) -> Result<(), IdentityStoreError> {
        let cache = self.cache_path();
        match fs::remove_file(&cache) {
            Ok(()) => log::info!("Removed identity cache {}", cache.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(IdentityStoreError::RemoveCache { path: cache, source }),
        }
        self.rebuild(locator, embedder)
    }

    /// Label of the enrolled identity nearest to `embedding`, if it is
    /// closer than the match threshold.
    pub fn match_face(&self, embedding: &[f32]) -> Option<&str> {
        self.database.match_embedding(embedding, self.threshold)
    }

    pub fn database(&self) -> &IdentityDatabase {
        &self.database
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join(IDENTITY_CACHE_FILENAME)
    }

    fn read_cache(&self) -> Option<IdentityDatabase> {
        let path = self.cache_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::error!("Failed to read identity cache {}: {e}; rebuilding", path.display());
                return None;
            }
        };
        let decoded = serde_json::from_slice::<IdentityDatabase>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|db| db.validate().map(|_| db).map_err(|e| e.to_string()));
        match decoded {
            Ok(db) => Some(db),
            Err(e) => {
                log::error!("Failed to decode identity cache {}: {e}; rebuilding", path.display());
                None
            }
        }
    }

    fn rebuild(
        &mut self,
        locator: &mut dyn FaceLocator,
        embedder: &mut dyn FaceEmbedder,
    ) -> Result<(), IdentityStoreError> {
        log::info!("Building identity database from {}", self.root.display());
        self.database = build_database(&self.root, locator, embedder)?;
        self.write_cache();
        Ok(())
    }

    /// Cache write failures cost a rebuild on next start, nothing more.
    fn write_cache(&self) {
        let path = self.cache_path();
        let result = serde_json::to_vec(&self.database)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));
        match result {
            Ok(()) => log::info!(
                "Saved identity cache {} ({} identities)",
                path.display(),
                self.database.len()
            ),
            Err(e) => log::error!("Failed to save identity cache {}: {e}", path.display()),
        }
    }
}

/// Scans `root` and embeds every enrollment image that shows exactly one
/// face. Identity and image order follow sorted file names.
pub fn build_database(
    root: &Path,
    locator: &mut dyn FaceLocator,
    embedder: &mut dyn FaceEmbedder,
) -> Result<IdentityDatabase, IdentityStoreError> {
    if !root.exists() {
        log::warn!("Enrollment directory {} not found; creating it", root.display());
        fs::create_dir_all(root).map_err(|source| IdentityStoreError::CreateDir {
            path: root.to_path_buf(),
            source,
        })?;
    }

    let mut database = IdentityDatabase::new();
    for identity_dir in sorted_entries(root)?.into_iter().filter(|p| p.is_dir()) {
        let Some(label) = identity_dir.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping non UTF-8 directory {}", identity_dir.display());
            continue;
        };
        let images = match sorted_entries(&identity_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Skipping identity {label:?}: {e}");
                continue;
            }
        };
        let mut embeddings = Vec::new();
        for image_path in images.into_iter().filter(|p| is_enrollment_image(p)) {
            match embed_enrollment_image(&image_path, locator, embedder) {
                Ok(Some(embedding)) => {
                    log::info!("Encoded {}", image_path.display());
                    embeddings.push(embedding);
                }
                Ok(None) => {}
                Err(e) => log::error!("Failed to process {}: {e}", image_path.display()),
            }
        }
        if embeddings.is_empty() {
            log::warn!("Identity {label:?} has no usable images; skipping");
            continue;
        }
        database.insert(label, embeddings)?;
    }
    Ok(database)
}

/// `Ok(None)` when the image does not show exactly one face.
fn embed_enrollment_image(
    path: &Path,
    locator: &mut dyn FaceLocator,
    embedder: &mut dyn FaceEmbedder,
) -> Result<Option<Embedding>, Box<dyn std::error::Error>> {
    let frame = Frame::from_rgb_image(image::open(path)?.to_rgb8(), 0);
    let faces = locator.locate(&frame)?;
    if faces.len() != 1 {
        log::warn!(
            "{} shows {} faces, expected exactly one; skipping",
            path.display(),
            faces.len()
        );
        return Ok(None);
    }
    Ok(Some(embedder.embed(&frame, &faces[0])?))
}

fn is_enrollment_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                ENROLLMENT_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, IdentityStoreError> {
    let read_err = |source| IdentityStoreError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    paths.sort();
    Ok(paths)
}
