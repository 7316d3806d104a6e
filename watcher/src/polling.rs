use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use screen_recap_common::frame::Frame;
use screen_recap_pipeline::traits::{AcquisitionError, FrameReadError, FrameSource};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Frame source fetching one image per capture from a single-frame endpoint.
///
/// Every `next_frame` costs one GET; pacing belongs to the session's
/// adaptive clock. A failed fetch skips that capture, nothing more.
pub struct PollingSource {
    client: Option<reqwest::Client>,
    url: String,
    seq: u64,
}

impl PollingSource {
    pub fn new() -> Self {
        Self {
            client: None,
            url: String::new(),
            seq: 0,
        }
    }
}

impl Default for PollingSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for PollingSource {
    async fn start(&mut self, selection: &str) -> Result<(), AcquisitionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AcquisitionError::Connect(e.to_string()))?;

        // Probe once so a dead endpoint fails the session up front instead
        // of producing an endless run of skipped ticks.
        let response = client
            .get(selection)
            .send()
            .await
            .map_err(|e| AcquisitionError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status(response.status().as_u16()));
        }

        info!(url = selection, "frame endpoint reachable");
        self.url = selection.to_string();
        self.client = Some(client);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameReadError> {
        let Some(client) = &self.client else {
            return Ok(None);
        };

        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FrameReadError::Read(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FrameReadError::Status(response.status().as_u16()));
        }
        let payload = response
            .bytes()
            .await
            .map_err(|e| FrameReadError::Read(e.to_string()))?
            .to_vec();

        let seq = self.seq;
        self.seq += 1;
        debug!(seq, bytes = payload.len(), "fetched frame");
        Ok(Some(Frame::new(payload, Utc::now().timestamp_millis(), seq)))
    }

    async fn stop(&mut self) {
        self.client = None;
    }
}
