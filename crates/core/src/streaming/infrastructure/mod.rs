#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_stream_source;
pub mod mjpeg_http_source;
pub mod source_factory;
