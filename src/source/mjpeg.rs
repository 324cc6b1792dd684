use super::{FrameSource, ReadOutcome, SourceStream};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::frame::{Frame, PixelFormat};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered stream data while hunting for a frame boundary
const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Frame source for MJPEG-over-HTTP endpoints (IP webcams, stream relays).
///
/// The server is expected to answer a GET with a long-lived
/// multipart/x-mixed-replace body of JPEG parts. Parts are recovered by
/// scanning for SOI/EOI markers, which tolerates the boundary-string
/// variations different cameras emit.
pub struct MjpegHttpSource {
    url: String,
    client: reqwest::Client,
    read_timeout: Duration,
}

impl MjpegHttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::connect(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            client,
            read_timeout: config.read_timeout(),
        })
    }
}

#[async_trait]
impl FrameSource for MjpegHttpSource {
    async fn connect(&self) -> Result<Box<dyn SourceStream>, SourceError> {
        debug!("Connecting to MJPEG endpoint: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::connect(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::connect(format!(
                "{} answered with HTTP status {}",
                self.url, status
            )));
        }

        info!("MJPEG stream established: {}", self.url);
        Ok(Box::new(MjpegStream::new(
            Box::pin(response.bytes_stream()),
            self.read_timeout,
        )))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A connected MJPEG byte stream being sliced into frames
struct MjpegStream {
    stream: ByteStream,
    buffer: Vec<u8>,
    frame_counter: u64,
    read_timeout: Duration,
}

impl MjpegStream {
    fn new(stream: ByteStream, read_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(256 * 1024),
            frame_counter: 0,
            read_timeout,
        }
    }
}

#[async_trait]
impl SourceStream for MjpegStream {
    async fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        loop {
            // Drain any complete JPEG already buffered before pulling more
            while let Some(jpeg) = extract_jpeg(&mut self.buffer) {
                match jpeg_dimensions(&jpeg) {
                    Some((width, height)) => {
                        self.frame_counter += 1;
                        let frame = Frame::new(
                            self.frame_counter,
                            SystemTime::now(),
                            jpeg,
                            width,
                            height,
                            PixelFormat::Mjpeg,
                        );
                        return Ok(ReadOutcome::Frame(frame));
                    }
                    None => {
                        debug!(
                            "Discarding JPEG part without frame header ({} bytes)",
                            jpeg.len()
                        );
                    }
                }
            }

            if self.buffer.len() > MAX_BUFFER_BYTES {
                self.buffer.clear();
                return Err(SourceError::read(
                    "no frame boundary found within buffer limit",
                ));
            }

            let chunk = timeout(self.read_timeout, self.stream.next())
                .await
                .map_err(|_| {
                    SourceError::read(format!(
                        "no stream data within {} seconds",
                        self.read_timeout.as_secs()
                    ))
                })?;

            match chunk {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Err(SourceError::read(format!("stream error: {}", e)));
                }
                None => {
                    if !self.buffer.is_empty() {
                        warn!(
                            "MJPEG stream ended with {} unconsumed bytes",
                            self.buffer.len()
                        );
                    }
                    return Ok(ReadOutcome::Eof);
                }
            }
        }
    }
}

/// Pull the next complete SOI..EOI slice out of the buffer.
///
/// Bytes before the first SOI are part headers or boundary text and are
/// dropped. Returns None when no complete frame is buffered yet.
fn extract_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let soi = match find_marker(buffer, &SOI, 0) {
        Some(pos) => pos,
        None => {
            // Keep a trailing byte in case the buffer ends mid-marker
            if buffer.len() > 1 {
                buffer.drain(..buffer.len() - 1);
            }
            return None;
        }
    };

    let eoi = find_marker(buffer, &EOI, soi + 2)?;
    let frame = buffer[soi..eoi + 2].to_vec();
    buffer.drain(..eoi + 2);
    Some(frame)
}

fn find_marker(buffer: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if buffer.len() < from + 2 {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| from + pos)
}

/// Read image dimensions from the SOF marker of a JPEG byte slice.
///
/// Walks the marker chain without decoding pixel data; returns None for
/// slices that carry no frame header.
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2; // skip SOI
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // Padding between markers
            0xFF => {
                pos += 1;
                continue;
            }
            // SOF0/SOF1/SOF2: baseline, extended sequential, progressive
            0xC0 | 0xC1 | 0xC2 => {
                if pos + 9 > data.len() {
                    return None;
                }
                let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
                let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
                return Some((width, height));
            }
            // Standalone markers without a length field
            0xD0..=0xD7 | 0x01 => {
                pos += 2;
            }
            0xD9 => return None, // EOI before any SOF
            _ => {
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                if len < 2 {
                    return None;
                }
                pos += 2 + len;
            }
        }
    }
    None
}
