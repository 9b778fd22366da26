use crate::recognition::domain::detected_face::FacesUpdate;

/// Publish/subscribe boundary for per-cycle detection results.
///
/// Called once for every processed frame, including frames with no faces.
pub trait DetectionPublisher: Send + Sync {
    fn publish(&self, update: &FacesUpdate) -> Result<(), Box<dyn std::error::Error>>;
}
