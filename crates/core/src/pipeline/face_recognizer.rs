use std::path::Path;

use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::face_locator::FaceLocator;
use crate::detection::infrastructure::locator_factory;
use crate::recognition::domain::detected_face::{DetectedFace, DetectionBatch};
use crate::recognition::infrastructure::identity_store::IdentityStore;
use crate::shared::config::FacewatchConfig;
use crate::shared::constants::DETECTION_SCALE;
use crate::shared::frame::Frame;
use crate::shared::model_resolver::ModelResolver;

use super::frame_analyzer::FrameAnalyzer;

/// Locates faces on a downscaled copy of the frame, embeds each one and
/// looks it up in the identity store.
///
/// Boxes are scaled back up so they are reported in the caller's frame
/// coordinates.
pub struct FaceRecognizer {
    locator: Box<dyn FaceLocator>,
    embedder: Box<dyn FaceEmbedder>,
    store: IdentityStore,
    scale: u32,
}

impl FaceRecognizer {
    /// Opens (or builds) the identity store with the same locator and
    /// embedder that will serve live frames.
    pub fn new(
        mut locator: Box<dyn FaceLocator>,
        mut embedder: Box<dyn FaceEmbedder>,
        face_data_dir: &Path,
        match_threshold: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let store = IdentityStore::open(
            face_data_dir,
            match_threshold,
            locator.as_mut(),
            embedder.as_mut(),
        )?;
        log::info!(
            "Identity store ready: {} identities from {} ({}), match threshold {}",
            store.database().len(),
            store.root().display(),
            store.database().labels().join(", "),
            store.threshold()
        );
        Ok(Self {
            locator,
            embedder,
            store,
            scale: DETECTION_SCALE,
        })
    }

    /// Loads the ONNX models named by `config` and opens the identity store.
    pub fn from_config(config: &FacewatchConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let resolver = ModelResolver::new(config.model_dir.clone())?;
        let locator = locator_factory::create_locator(
            config.detection_model,
            config.detection_confidence,
            &resolver,
        )?;
        let embedder = locator_factory::create_embedder(&resolver)?;
        Self::new(
            locator,
            embedder,
            &config.face_data_dir,
            config.face_match_threshold,
        )
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale.max(1);
        self
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }
}

impl FrameAnalyzer for FaceRecognizer {
    fn analyze(&mut self, frame: &Frame) -> Result<DetectionBatch, Box<dyn std::error::Error>> {
        let small = frame.downscale(self.scale);
        let boxes = self.locator.locate(&small)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.embedder.embed(&small, &bbox)?;
            let label = self.store.match_face(&embedding).map(str::to_string);
            faces.push(DetectedFace::new(label, bbox.scale(self.scale as i32)));
        }
        Ok(DetectionBatch::new(frame.index(), faces))
    }

    fn reload(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.store
            .reload(self.locator.as_mut(), self.embedder.as_mut())?;
        log::info!(
            "Identity store reloaded: {} identities",
            self.store.database().len()
        );
        Ok(())
    }
}
