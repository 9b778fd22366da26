use crate::shared::frame::Frame;

/// Domain interface for a continuous, URL-addressed image stream.
///
/// `read` blocks until the next frame arrives. An error from `open` or
/// `read` ends the current connection; the receiver closes the source and
/// asks its factory for a fresh one on the next attempt.
pub trait FrameSource: Send {
    fn open(&mut self, url: &str) -> Result<(), Box<dyn std::error::Error>>;
    fn read(&mut self) -> Result<Frame, Box<dyn std::error::Error>>;
    fn close(&mut self);
}
