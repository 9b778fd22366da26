use crate::recognition::domain::detected_face::DetectionBatch;
use crate::shared::frame::Frame;

/// The CPU-bound stage of a recognition cycle: find and identify every face
/// in one frame.
pub trait FrameAnalyzer: Send {
    /// Returned boxes are in `frame`'s own coordinates.
    fn analyze(&mut self, frame: &Frame) -> Result<DetectionBatch, Box<dyn std::error::Error>>;

    /// Discards cached identities and rebuilds them from the enrollment images.
    fn reload(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}
