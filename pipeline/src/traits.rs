use async_trait::async_trait;

use screen_recap_common::frame::Frame;

/// Boundary between the pipeline and whatever produces frames.
///
/// The stream handle is interior state of the implementation: `start`
/// acquires it, `next_frame` reads from it, `stop` releases it. The session
/// controller calls `next_frame` on its own adaptive cadence, so
/// implementations should return the freshest available frame rather than
/// pace themselves.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the stream named by `selection` (a URL for HTTP sources).
    async fn start(&mut self, selection: &str) -> Result<(), AcquisitionError>;

    /// Read the next frame. `Ok(None)` means the stream has ended and no
    /// further frames will arrive.
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameReadError>;

    /// Release the stream. Called once per acquired session; must be safe to
    /// call even if `next_frame` already reported the end of the stream.
    async fn stop(&mut self);
}

/// Maps one frame to a textual description of its content.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(&self, frame: &Frame) -> Result<String, DescribeError>;
}

/// Folds many per-frame analyses into one text.
#[async_trait]
pub trait TextSummarizer: Send + Sync {
    async fn summarize(&self, analyses: &[String]) -> Result<String, SummarizeError>;
}

/// Failure to acquire the frame stream. Fatal: the session cannot start.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("failed to connect to frame source: {0}")]
    Connect(String),
    #[error("frame source returned HTTP status {0}")]
    Status(u16),
}

/// Failure to read one frame. The session skips the tick and continues.
#[derive(Debug, thiserror::Error)]
pub enum FrameReadError {
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("frame endpoint returned HTTP status {0}")]
    Status(u16),
}

/// Failure to describe one frame. Recorded per-frame; never aborts a batch.
#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error("describe call timed out")]
    Timeout,
    #[error("frame is not a usable image: {0}")]
    InvalidImage(String),
    #[error("vision backend error: {0}")]
    Upstream(String),
}

/// Failure to summarize. The session falls back to concatenating the
/// per-frame analyses instead of aborting.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarize call timed out")]
    Timeout,
    #[error("summarizer backend error: {0}")]
    Upstream(String),
}
