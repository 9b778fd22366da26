use std::time::Duration;

use crate::shared::frame::Frame;

/// Read side of a live stream, as seen by the recognition worker.
pub trait FrameFeed: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Copy of the most recent frame; `None` while disconnected.
    fn latest_frame(&self) -> Option<Frame>;

    /// Blocks until connected or `timeout` elapses. Returns whether the
    /// feed is connected.
    fn wait_connected(&self, timeout: Duration) -> bool;
}
