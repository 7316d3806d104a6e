use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use screen_recap_common::frame::Frame;
use screen_recap_pipeline::traits::{AcquisitionError, FrameReadError, FrameSource};
use tracing::{debug, info};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser for `multipart/x-mixed-replace` MJPEG bodies.
///
/// Feed it byte chunks as they arrive off the wire (split anywhere, even
/// mid-boundary) and pull complete JPEGs out as they become available. The
/// trailing CRLF before each boundary is stripped; empty parts are skipped.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete JPEG, if the buffer holds one.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        // Discard everything up to and including the boundary.
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks.
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        // Discard the part headers.
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    // The next boundary tells us where this JPEG ends.
                    if let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY) {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip the trailing \r\n before the boundary.
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg_data = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;

                        if jpeg_data.is_empty() {
                            continue;
                        }
                        return Some(jpeg_data);
                    }

                    // No boundary yet; remember how far we scanned so the
                    // next call does not re-scan old data.
                    self.jpeg_start = if self.buffer.len() > BOUNDARY.len() {
                        self.buffer.len() - BOUNDARY.len()
                    } else {
                        0
                    };
                    return None;
                }
            }
        }
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame source reading a live `multipart/x-mixed-replace` MJPEG stream.
///
/// `start` connects and holds the response's byte stream; each `next_frame`
/// pulls chunks until the parser yields one JPEG. The unread stream sits in
/// the transport buffers between calls, so the session's cadence, not the
/// camera's frame rate, decides how often we read.
pub struct MjpegSource {
    stream: Option<BoxStream<'static, reqwest::Result<bytes::Bytes>>>,
    parser: MjpegParser,
    seq: u64,
}

impl MjpegSource {
    pub fn new() -> Self {
        Self {
            stream: None,
            parser: MjpegParser::new(),
            seq: 0,
        }
    }
}

impl Default for MjpegSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for MjpegSource {
    async fn start(&mut self, selection: &str) -> Result<(), AcquisitionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AcquisitionError::Connect(e.to_string()))?;

        let response = client
            .get(selection)
            .send()
            .await
            .map_err(|e| AcquisitionError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status(response.status().as_u16()));
        }

        info!(url = selection, status = %response.status(), "connected to MJPEG stream");
        self.parser = MjpegParser::new();
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                let seq = self.seq;
                self.seq += 1;
                debug!(seq, bytes = jpeg.len(), "parsed MJPEG frame");
                return Ok(Some(Frame::new(jpeg, Utc::now().timestamp_millis(), seq)));
            }
            match stream.next().await {
                Some(Ok(chunk)) => self.parser.feed(&chunk),
                Some(Err(e)) => return Err(FrameReadError::Read(e.to_string())),
                None => break,
            }
        }

        info!("MJPEG stream ended");
        self.stream = None;
        Ok(None)
    }

    async fn stop(&mut self) {
        // Dropping the response stream closes the connection.
        self.stream = None;
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
