use crate::shared::config::StreamBackend;
use crate::streaming::domain::frame_source::FrameSource;
use crate::streaming::stream_receiver::SourceFactory;

use super::mjpeg_http_source::MjpegHttpSource;

/// Builds the per-connection source factory for `backend`.
///
/// Fails for [`StreamBackend::Ffmpeg`] when built without the `ffmpeg`
/// feature.
pub fn create_source_factory(
    backend: StreamBackend,
) -> Result<SourceFactory, Box<dyn std::error::Error>> {
    match backend {
        StreamBackend::Mjpeg => Ok(Box::new(|| -> Box<dyn FrameSource> {
            Box::new(MjpegHttpSource::new())
        })),
        #[cfg(feature = "ffmpeg")]
        StreamBackend::Ffmpeg => Ok(Box::new(|| -> Box<dyn FrameSource> {
            Box::new(super::ffmpeg_stream_source::FfmpegStreamSource::new())
        })),
        #[cfg(not(feature = "ffmpeg"))]
        StreamBackend::Ffmpeg => Err("ffmpeg stream backend requires the `ffmpeg` feature".into()),
    }
}
