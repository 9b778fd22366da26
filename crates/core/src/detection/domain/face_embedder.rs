use crate::recognition::domain::embedding::Embedding;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Domain interface for turning a located face into an identity embedding.
///
/// Every embedding produced by one implementation has the same length.
pub trait FaceEmbedder: Send {
    fn embed(
        &mut self,
        frame: &Frame,
        face: &BoundingBox,
    ) -> Result<Embedding, Box<dyn std::error::Error>>;
}
