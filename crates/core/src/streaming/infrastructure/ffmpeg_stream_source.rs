use crate::shared::frame::Frame;
use crate::streaming::domain::frame_source::FrameSource;

/// Demuxer options for a live network stream: no input buffering and a
/// short probe so the first frame arrives quickly.
const STREAM_OPTIONS: &[(&str, &str)] = &[
    ("fflags", "nobuffer"),
    ("flags", "low_delay"),
    ("probesize", "32768"),
    ("analyzeduration", "0"),
    ("rw_timeout", "10000000"),
];

/// Live stream decoded through libavformat/libavcodec, converted to RGB24.
pub struct FfmpegStreamSource {
    session: Option<DecodeSession>,
}

struct DecodeSession {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
}

// Safety: the ffmpeg contexts are owned by this source and only touched by
// the capture thread that owns the source.
unsafe impl Send for FfmpegStreamSource {}

impl FfmpegStreamSource {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl Default for FfmpegStreamSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FfmpegStreamSource {
    fn open(&mut self, url: &str) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let mut options = ffmpeg_next::Dictionary::new();
        for (key, value) in STREAM_OPTIONS {
            options.set(key, value);
        }
        let input = ffmpeg_next::format::input_with_dictionary(url, options)?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;
        let (width, height) = (decoder.width(), decoder.height());

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        self.session = Some(DecodeSession {
            input,
            decoder,
            scaler,
            stream_index,
            width,
            height,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        let session = self.session.as_mut().ok_or("ffmpeg stream is not open")?;
        loop {
            if let Some(frame) = session.receive()? {
                return Ok(frame);
            }
            let Some((stream, packet)) = session.input.packets().next() else {
                return Err("ffmpeg stream ended".into());
            };
            if stream.index() != session.stream_index {
                continue;
            }
            session.decoder.send_packet(&packet)?;
        }
    }

    fn close(&mut self) {
        self.session = None;
    }
}

impl DecodeSession {
    fn receive(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        // Some MJPEG cameras change resolution mid-stream
        if decoded.width() != self.width || decoded.height() != self.height {
            return Err(format!(
                "stream resolution changed from {}x{} to {}x{}",
                self.width,
                self.height,
                decoded.width(),
                decoded.height()
            )
            .into());
        }
        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut rgb)?;
        Ok(Some(Frame::new(
            packed_rgb(&rgb, self.width, self.height),
            self.width,
            self.height,
            3,
            0,
        )))
    }
}

/// Copies an RGB24 plane into a tightly packed buffer, dropping row padding.
fn packed_rgb(rgb: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_bytes = width as usize * 3;
    (0..height as usize)
        .flat_map(|row| &data[row * stride..row * stride + row_bytes])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_open_fails() {
        let mut source = FfmpegStreamSource::new();
        assert!(source.read().is_err());
    }

    #[test]
    fn test_open_unreachable_url_fails() {
        let mut source = FfmpegStreamSource::new();
        assert!(source.open("/nonexistent/stream.mjpeg").is_err());
    }
}
