use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::domain::face_locator::FaceLocator;
use crate::shared::config::DetectionModel;
use crate::shared::constants::{
    BLAZEFACE_MODEL_NAME, EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME,
    YOLO_MODEL_URL,
};
use crate::shared::model_resolver::{ModelResolver, ModelSource};

use super::arcface_embedder::ArcFaceEmbedder;
use super::onnx_blazeface_locator::OnnxBlazefaceLocator;
use super::onnx_yolo_locator::OnnxYoloLocator;

const EMBEDDING_MODEL: ModelSource = ModelSource {
    name: EMBEDDING_MODEL_NAME,
    url: Some(EMBEDDING_MODEL_URL),
};

/// Resolves the model file for `model` and loads the matching locator.
pub fn create_locator(
    model: DetectionModel,
    confidence: f64,
    resolver: &ModelResolver,
) -> Result<Box<dyn FaceLocator>, Box<dyn std::error::Error>> {
    let path = resolver.resolve(model_source(model))?;
    log::info!("Using {model} face locator ({})", path.display());
    Ok(match model {
        DetectionModel::Blazeface => Box::new(OnnxBlazefaceLocator::new(&path, confidence)?),
        DetectionModel::Yolo => Box::new(OnnxYoloLocator::new(&path, confidence)?),
    })
}

/// Resolves and loads the ArcFace embedding model.
pub fn create_embedder(
    resolver: &ModelResolver,
) -> Result<Box<dyn FaceEmbedder>, Box<dyn std::error::Error>> {
    let path = resolver.resolve(EMBEDDING_MODEL)?;
    log::info!("Using ArcFace embedder ({})", path.display());
    Ok(Box::new(ArcFaceEmbedder::new(&path)?))
}

fn model_source(model: DetectionModel) -> ModelSource {
    match model {
        DetectionModel::Blazeface => ModelSource {
            name: BLAZEFACE_MODEL_NAME,
            url: None,
        },
        DetectionModel::Yolo => ModelSource {
            name: YOLO_MODEL_NAME,
            url: Some(YOLO_MODEL_URL),
        },
    }
}
