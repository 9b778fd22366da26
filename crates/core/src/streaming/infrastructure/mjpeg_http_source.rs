use std::io::Read;
use std::time::Duration;

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::streaming::domain::frame_source::FrameSource;

/// Upper bound on a single JPEG; anything larger means the stream is garbage.
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Applied per body read, so a stalled camera surfaces as a read error.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("stream responded with HTTP {0}")]
    Status(u16),
    #[error("expected a multipart MJPEG stream, got content type {0:?}")]
    NotMultipart(String),
    #[error("stream is not open")]
    NotOpen,
    #[error("stream ended")]
    Ended,
    #[error("no complete JPEG within {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("failed to read stream")]
    Read(#[source] std::io::Error),
    #[error("failed to decode JPEG")]
    Decode(#[from] image::ImageError),
}

/// MJPEG-over-HTTP (`multipart/x-mixed-replace`) frame source.
///
/// Parts are located by JPEG start/end markers rather than by the multipart
/// boundary, which tolerates cameras that get the boundary syntax wrong.
pub struct MjpegHttpSource {
    client: Option<reqwest::blocking::Client>,
    scanner: Option<JpegScanner<reqwest::blocking::Response>>,
}

impl MjpegHttpSource {
    pub fn new() -> Self {
        Self {
            client: None,
            scanner: None,
        }
    }

    fn client(&mut self) -> Result<&reqwest::blocking::Client, StreamError> {
        if self.client.is_none() {
            let client = reqwest::blocking::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(READ_TIMEOUT)
                .build()?;
            self.client = Some(client);
        }
        self.client.as_ref().ok_or(StreamError::NotOpen)
    }

    fn connect(&mut self, url: &str) -> Result<(), StreamError> {
        let response = self.client()?.get(url).send()?;
        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("multipart/") {
            return Err(StreamError::NotMultipart(content_type));
        }
        self.scanner = Some(JpegScanner::new(response));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, StreamError> {
        let scanner = self.scanner.as_mut().ok_or(StreamError::NotOpen)?;
        let jpeg = scanner.next_jpeg()?;
        decode_jpeg(&jpeg)
    }
}

impl Default for MjpegHttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for MjpegHttpSource {
    fn open(&mut self, url: &str) -> Result<(), Box<dyn std::error::Error>> {
        Ok(self.connect(url)?)
    }

    fn read(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        Ok(self.next_frame()?)
    }

    fn close(&mut self) {
        self.scanner = None;
    }
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Pulls whole JPEG images out of an arbitrary byte stream.
///
/// Bytes before a start-of-image marker are discarded; scanning resumes
/// where the previous read left off.
struct JpegScanner<R> {
    reader: R,
    buffer: Vec<u8>,
    soi: Option<usize>,
    scanned: usize,
}

impl<R: Read> JpegScanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            soi: None,
            scanned: 0,
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            if let Some((start, end)) = self.scan() {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                self.soi = None;
                self.scanned = 0;
                return Ok(jpeg);
            }
            if self.buffer.len() > MAX_JPEG_BYTES {
                self.buffer.clear();
                self.soi = None;
                self.scanned = 0;
                return Err(StreamError::FrameTooLarge {
                    limit: MAX_JPEG_BYTES,
                });
            }
            let read = self.reader.read(&mut chunk).map_err(StreamError::Read)?;
            if read == 0 {
                return Err(StreamError::Ended);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn scan(&mut self) -> Option<(usize, usize)> {
        let start = match self.soi {
            Some(start) => start,
            None => match find_marker(&self.buffer[self.scanned..], SOI) {
                Some(offset) => {
                    let start = self.scanned + offset;
                    self.soi = Some(start);
                    self.scanned = start + SOI.len();
                    start
                }
                None => {
                    // Keep a trailing 0xFF that may open the next marker
                    let keep_from = self.buffer.len().saturating_sub(1);
                    self.buffer.drain(..keep_from);
                    self.scanned = 0;
                    return None;
                }
            },
        };
        match find_marker(&self.buffer[self.scanned..], EOI) {
            Some(offset) => Some((start, self.scanned + offset + EOI.len())),
            None => {
                self.scanned = self
                    .buffer
                    .len()
                    .saturating_sub(1)
                    .max(start + SOI.len());
                None
            }
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame, StreamError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?;
    Ok(Frame::from_rgb_image(image.into_rgb8(), 0))
}
